//! Background worker pool.
//!
//! Workers pull envelopes off the shared queue and drive the agent pipeline,
//! reporting progress milestones through the tracker and the event hub.
//! They share no memory with the submitting side. A stage error becomes a
//! FAILURE snapshot; nothing in the task path is allowed to crash the loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::agents::{AgentCoordinator, AnalysisAggregate};
use crate::events::{EventHub, PushEvent};
use crate::memory::MemoryService;
use crate::store::StoreResult;
use crate::tasks::{StateUpdate, TaskEnvelope, TaskState, TaskTracker, WorkQueue};

/// Worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent workers per process
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue wait per poll in seconds
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Soft time limit in seconds: exceeded tasks are logged but continue
    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,
    /// Hard time limit in seconds: exceeded tasks fail with a timeout error
    #[serde(default = "default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,
}

fn default_workers() -> usize {
    2
}
fn default_poll_secs() -> u64 {
    5
}
fn default_soft_time_limit_secs() -> u64 {
    3300
}
fn default_hard_time_limit_secs() -> u64 {
    3600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_secs: default_poll_secs(),
            soft_time_limit_secs: default_soft_time_limit_secs(),
            hard_time_limit_secs: default_hard_time_limit_secs(),
        }
    }
}

enum PipelineOutcome {
    Completed(AnalysisAggregate),
    Cancelled,
}

/// Pool of workers executing the analysis pipeline.
pub struct WorkerPool {
    tracker: TaskTracker,
    queue: Arc<WorkQueue>,
    coordinator: Arc<AgentCoordinator>,
    hub: Arc<EventHub>,
    memory: MemoryService,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        tracker: TaskTracker,
        queue: Arc<WorkQueue>,
        coordinator: Arc<AgentCoordinator>,
        hub: Arc<EventHub>,
        memory: MemoryService,
        config: WorkerConfig,
    ) -> Self {
        Self {
            tracker,
            queue,
            coordinator,
            hub,
            memory,
            config,
        }
    }

    /// Run the pool until the surrounding task is dropped.
    pub async fn run(self: Arc<Self>) {
        info!("Starting {} workers", self.config.workers);
        let mut handles = Vec::new();
        for worker_id in 0..self.config.workers {
            let pool = self.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id).await;
            }));
        }
        for handle in handles {
            // Worker loops only return on unreachable queue errors piling up;
            // a panic inside a loop is contained to its JoinError.
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        let poll = Duration::from_secs(self.config.poll_secs.max(1));
        loop {
            match self.queue.dequeue(poll).await {
                Ok(Some(envelope)) => {
                    info!("Worker {} picked up task {}", worker_id, envelope.task_id);
                    self.process_envelope(envelope).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Worker {} dequeue failed: {}", worker_id, e);
                    sleep(poll).await;
                }
            }
        }
    }

    /// Execute one task end to end. All failure paths land in a snapshot;
    /// this never returns an error to the loop.
    pub async fn process_envelope(&self, envelope: TaskEnvelope) {
        let task_id = envelope.task_id.clone();

        // Cancelled while still queued: the CANCELLED snapshot is already
        // written, just drop the work.
        if self.tracker.is_cancel_requested(&task_id).await {
            info!("Task {} cancelled before execution", task_id);
            return;
        }

        if let Err(e) = self
            .report_progress(&task_id, 0, "Setting up analysis", "setup")
            .await
        {
            error!("Task {} setup write failed: {}", task_id, e);
            return;
        }

        let outcome = self.run_with_time_limits(&envelope).await;

        let result = match outcome {
            Some(Ok(PipelineOutcome::Completed(aggregate))) => {
                self.finish_success(&envelope, aggregate).await
            }
            Some(Ok(PipelineOutcome::Cancelled)) => {
                info!("Task {} aborted at a stage boundary after cancel", task_id);
                Ok(())
            }
            Some(Err(e)) => self.finish_failure(&task_id, &e.to_string()).await,
            None => {
                let message = format!(
                    "Analysis timed out after {}s",
                    self.config.hard_time_limit_secs
                );
                self.finish_failure(&task_id, &message).await
            }
        };

        if let Err(e) = result {
            error!("Task {} final snapshot write failed: {}", task_id, e);
        }
    }

    /// Drive the pipeline under the soft/hard time limits. None means the
    /// hard limit fired.
    async fn run_with_time_limits(
        &self,
        envelope: &TaskEnvelope,
    ) -> Option<StoreResult<PipelineOutcome>> {
        let soft = sleep(Duration::from_secs(self.config.soft_time_limit_secs));
        let hard = sleep(Duration::from_secs(self.config.hard_time_limit_secs));
        let pipeline = self.execute_pipeline(envelope);
        tokio::pin!(soft, hard, pipeline);

        let mut soft_fired = false;
        loop {
            tokio::select! {
                outcome = &mut pipeline => return Some(outcome),
                _ = &mut soft, if !soft_fired => {
                    warn!(
                        "Task {} exceeded the soft time limit ({}s), continuing",
                        envelope.task_id, self.config.soft_time_limit_secs
                    );
                    soft_fired = true;
                }
                _ = &mut hard => return None,
            }
        }
    }

    /// The pipeline proper: extraction, concurrent analysis stages, insight.
    /// The cancel flag is checked at each stage boundary; an observed cancel
    /// aborts without further snapshot writes.
    async fn execute_pipeline(&self, envelope: &TaskEnvelope) -> StoreResult<PipelineOutcome> {
        let task_id = &envelope.task_id;
        let request = &envelope.request;
        let mut aggregate = AnalysisAggregate::new(request.kinds.clone());

        self.report_progress(task_id, 20, "Extracting document structure", "extraction")
            .await?;
        let (extraction_result, text) = self.coordinator.run_extraction(&request.document_ref).await;
        let extraction_ok = extraction_result.is_success();
        aggregate
            .stages
            .insert(extraction_result.agent_name.clone(), extraction_result);
        if extraction_ok {
            self.coordinator
                .index_extracted_text(&request.document_ref, &text)
                .await;
        }

        if self.tracker.is_cancel_requested(task_id).await {
            return Ok(PipelineOutcome::Cancelled);
        }

        self.report_progress(task_id, 40, "Initializing AI agents", "agent_setup")
            .await?;
        self.report_progress(task_id, 60, "Running analysis agents", "analysis")
            .await?;
        for result in self.coordinator.run_analysis_stages(request, &text).await {
            aggregate.stages.insert(result.agent_name.clone(), result);
        }

        if self.tracker.is_cancel_requested(task_id).await {
            return Ok(PipelineOutcome::Cancelled);
        }

        let insight = self.coordinator.run_insight(&aggregate.stages).await;
        aggregate.stages.insert(insight.agent_name.clone(), insight);

        Ok(PipelineOutcome::Completed(aggregate))
    }

    async fn finish_success(
        &self,
        envelope: &TaskEnvelope,
        aggregate: AnalysisAggregate,
    ) -> StoreResult<()> {
        let task_id = &envelope.task_id;
        let result = serde_json::to_value(&aggregate)
            .map_err(|e| crate::store::StoreError::Decode(e.to_string()))?;

        let snapshot = self
            .tracker
            .update_state(task_id, TaskState::Success, StateUpdate::result(result.clone()))
            .await?;
        self.publish_update(&snapshot).await;

        // A memory makes the finished analysis available to follow-up chat.
        match self.memory.create(&envelope.request.document_ref, result).await {
            Ok(memory) => info!("Task {} completed, memory {}", task_id, memory.id),
            Err(e) => warn!("Memory creation for task {} failed: {}", task_id, e),
        }
        Ok(())
    }

    async fn finish_failure(&self, task_id: &str, message: &str) -> StoreResult<()> {
        warn!("Task {} failed: {}", task_id, message);
        let snapshot = self
            .tracker
            .update_state(task_id, TaskState::Failure, StateUpdate::error(message))
            .await?;
        self.publish_update(&snapshot).await;
        Ok(())
    }

    async fn report_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: &str,
        step: &str,
    ) -> StoreResult<()> {
        let snapshot = self
            .tracker
            .update_state(
                task_id,
                TaskState::Processing,
                StateUpdate::progress(progress, message, step),
            )
            .await?;
        self.publish_update(&snapshot).await;
        self.hub
            .publish(
                task_id,
                PushEvent::AnalysisProgress {
                    task_id: task_id.to_string(),
                    progress: snapshot.progress,
                    current_step: snapshot.current_step,
                },
            )
            .await;
        Ok(())
    }

    async fn publish_update(&self, snapshot: &crate::tasks::TaskSnapshot) {
        self.hub
            .publish(
                &snapshot.task_id,
                PushEvent::TaskUpdate {
                    task_id: snapshot.task_id.clone(),
                    state: snapshot.state,
                    progress: snapshot.progress,
                    status_message: snapshot.status_message.clone(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        CapabilityError, DocumentExtractor, DocumentStructure, ImageAnalyzer, TextBlock,
        TextClassification, TextClassifier,
    };
    use crate::guard::CacheGuard;
    use crate::retrieval::{LocalBackend, RetrievalConfig, RetrievalEngine};
    use crate::store::MemoryStore;
    use crate::tasks::{AnalysisKind, AnalysisRequest};
    use async_trait::async_trait;
    use chrono::Utc;

    struct SlowExtractor {
        delay: Duration,
    }

    #[async_trait]
    impl DocumentExtractor for SlowExtractor {
        async fn extract(&self, _document_ref: &str) -> Result<DocumentStructure, CapabilityError> {
            sleep(self.delay).await;
            Ok(DocumentStructure {
                blocks: vec![TextBlock {
                    page: 1,
                    text: "An inspection report covering structural findings and remediation \
                           recommendations for the north facility."
                        .to_string(),
                }],
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    struct StubClassifier;

    #[async_trait]
    impl TextClassifier for StubClassifier {
        async fn classify_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<TextClassification>, CapabilityError> {
            Ok(texts
                .iter()
                .map(|_| TextClassification {
                    is_human: true,
                    confidence: 0.7,
                })
                .collect())
        }
    }

    struct StubImageAnalyzer;

    #[async_trait]
    impl ImageAnalyzer for StubImageAnalyzer {
        async fn analyze_image(
            &self,
            _image_ref: &str,
        ) -> Result<serde_json::Value, CapabilityError> {
            Ok(serde_json::json!({ "similar": [] }))
        }
    }

    struct Harness {
        pool: Arc<WorkerPool>,
        tracker: TaskTracker,
        queue: Arc<WorkQueue>,
        memory: MemoryService,
        store: Arc<MemoryStore>,
    }

    fn harness(extract_delay: Duration, config: WorkerConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let tracker = TaskTracker::new(store.clone());
        let queue = Arc::new(WorkQueue::new(store.clone(), "analysis"));
        let engine = Arc::new(RetrievalEngine::new(
            vec![Arc::new(LocalBackend::new("local"))],
            None,
            CacheGuard::new(store.clone(), "veridoc:cache"),
            RetrievalConfig::default(),
        ));
        let coordinator = Arc::new(AgentCoordinator::new(
            engine,
            Arc::new(SlowExtractor {
                delay: extract_delay,
            }),
            Arc::new(StubClassifier),
            Some(Arc::new(StubImageAnalyzer) as Arc<dyn ImageAnalyzer>),
            None,
        ));
        let hub = Arc::new(EventHub::new(store.clone()));
        let memory = MemoryService::new(store.clone());
        let pool = Arc::new(WorkerPool::new(
            tracker.clone(),
            queue.clone(),
            coordinator,
            hub,
            memory.clone(),
            config,
        ));
        Harness {
            pool,
            tracker,
            queue,
            memory,
            store,
        }
    }

    fn envelope(task_id: &str) -> TaskEnvelope {
        TaskEnvelope {
            task_id: task_id.to_string(),
            request: AnalysisRequest {
                document_ref: "doc-1".to_string(),
                kinds: vec![AnalysisKind::Similarity, AnalysisKind::AiDetect],
                image_refs: vec![],
                submitted_by: None,
            },
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_successful_task_reaches_success_with_aggregate() {
        let h = harness(Duration::ZERO, WorkerConfig::default());
        let id = h
            .tracker
            .submit(envelope("x").request, &h.queue)
            .await
            .unwrap();
        let envelope = h
            .queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        h.pool.process_envelope(envelope).await;

        let snapshot = h.tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Success);
        assert_eq!(snapshot.progress, 100);

        let result = snapshot.result.unwrap();
        let stages = result["stages"].as_object().unwrap();
        assert!(stages.contains_key("document_analysis"));
        assert!(stages.contains_key("similarity"));
        assert!(stages.contains_key("ai_detection"));
        assert!(stages.contains_key("insights"));
        assert!(!stages.contains_key("image_analysis"));

        // A memory was created for the finished analysis.
        let memories = h.memory.list().await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].document_id, "doc-1");
    }

    #[tokio::test]
    async fn test_hard_time_limit_fails_the_task() {
        let config = WorkerConfig {
            soft_time_limit_secs: 1,
            hard_time_limit_secs: 1,
            ..WorkerConfig::default()
        };
        let h = harness(Duration::from_secs(10), config);
        let id = h
            .tracker
            .submit(envelope("x").request, &h.queue)
            .await
            .unwrap();
        let envelope = h
            .queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        // Virtual time auto-advances past the 1s hard limit while the
        // extractor is still sleeping.
        tokio::time::pause();
        h.pool.process_envelope(envelope).await;

        let snapshot = h.tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Failure);
        assert!(snapshot.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_execution_is_dropped() {
        let h = harness(Duration::ZERO, WorkerConfig::default());
        let id = h
            .tracker
            .submit(envelope("x").request, &h.queue)
            .await
            .unwrap();
        let envelope = h
            .queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        h.tracker.cancel(&id).await.unwrap();
        h.pool.process_envelope(envelope).await;

        let snapshot = h.tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.result.is_none());
    }

    /// Cancels its own task through the tracker while extraction is running,
    /// simulating a cancel request arriving between stage boundaries.
    struct CancellingExtractor {
        tracker: TaskTracker,
        task_id: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl DocumentExtractor for CancellingExtractor {
        async fn extract(&self, _document_ref: &str) -> Result<DocumentStructure, CapabilityError> {
            let id = self.task_id.lock().unwrap().clone();
            if let Some(id) = id {
                self.tracker.cancel(&id).await.map_err(|e| {
                    CapabilityError::Service(format!("cancel failed: {}", e))
                })?;
            }
            Ok(DocumentStructure {
                blocks: vec![TextBlock {
                    page: 1,
                    text: "A short status memo.".to_string(),
                }],
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_cancel_during_a_stage_lands_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let tracker = TaskTracker::new(store.clone());
        let queue = Arc::new(WorkQueue::new(store.clone(), "analysis"));
        let engine = Arc::new(RetrievalEngine::new(
            vec![Arc::new(LocalBackend::new("local"))],
            None,
            CacheGuard::new(store.clone(), "veridoc:cache"),
            RetrievalConfig::default(),
        ));
        let task_id_slot = Arc::new(std::sync::Mutex::new(None));
        let coordinator = Arc::new(AgentCoordinator::new(
            engine,
            Arc::new(CancellingExtractor {
                tracker: tracker.clone(),
                task_id: task_id_slot.clone(),
            }),
            Arc::new(StubClassifier),
            None,
            None,
        ));
        let memory = MemoryService::new(store.clone());
        let pool = WorkerPool::new(
            tracker.clone(),
            queue.clone(),
            coordinator,
            Arc::new(EventHub::new(store.clone())),
            memory.clone(),
            WorkerConfig::default(),
        );

        let id = tracker
            .submit(envelope("x").request, &queue)
            .await
            .unwrap();
        *task_id_slot.lock().unwrap() = Some(id.clone());
        let envelope = queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        pool.process_envelope(envelope).await;

        // The worker observed the flag at the post-extraction boundary and
        // aborted; no later progress write pulled the task out of CANCELLED.
        let snapshot = tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
        assert!(snapshot.result.is_none());
        assert!(memory.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_milestones_are_published() {
        let h = harness(Duration::ZERO, WorkerConfig::default());
        let id = h
            .tracker
            .submit(envelope("x").request, &h.queue)
            .await
            .unwrap();
        let envelope = h
            .queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        h.pool.process_envelope(envelope).await;

        let published = h.store.published().await;
        let channel = format!("events:{}", id);
        let progress_steps: Vec<u64> = published
            .iter()
            .filter(|(c, _)| c == &channel)
            .filter_map(|(_, p)| serde_json::from_str::<serde_json::Value>(p).ok())
            .filter(|v| v["event"] == "analysis_progress")
            .filter_map(|v| v["progress"].as_u64())
            .collect();
        assert_eq!(progress_steps, vec![0, 20, 40, 60]);

        // Terminal update carries 100.
        let final_update = published
            .iter()
            .filter(|(c, _)| c == &channel)
            .filter_map(|(_, p)| serde_json::from_str::<serde_json::Value>(p).ok())
            .filter(|v| v["event"] == "task_update")
            .last()
            .unwrap();
        assert_eq!(final_update["state"], "SUCCESS");
        assert_eq!(final_update["progress"], 100);
    }
}
