//! Task state tracking over the shared store.
//!
//! `update_state` is the only mutator. It writes full snapshots, which makes
//! retries idempotent, and clamps progress so it never decreases while a task
//! is PROCESSING. Unknown task ids are reported explicitly as `None` rather
//! than being conflated with PENDING.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{SharedStore, StoreError, StoreResult};

use super::{AnalysisRequest, TaskEnvelope, TaskSnapshot, TaskState, WorkQueue};

/// How long snapshots and cancel flags are retained in the store.
const SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 86400);
const CANCEL_FLAG_TTL: Duration = Duration::from_secs(86400);

/// Fields applied by a state update.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub progress: Option<u8>,
    pub status_message: Option<String>,
    pub current_step: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn progress(progress: u8, status_message: &str, current_step: &str) -> Self {
        Self {
            progress: Some(progress),
            status_message: Some(status_message.to_string()),
            current_step: Some(current_step.to_string()),
            ..Default::default()
        }
    }

    pub fn result(result: serde_json::Value) -> Self {
        Self {
            progress: Some(100),
            status_message: Some("Analysis completed".to_string()),
            current_step: Some("complete".to_string()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status_message: Some(format!("Analysis failed: {}", message)),
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The cancel signal was recorded; the worker will stop at the next
    /// stage boundary.
    Cancelled,
    /// The task had already finished; its terminal state is returned
    /// unchanged.
    AlreadyTerminal(TaskState),
    /// No such task.
    NotFound,
}

/// Persists and serves task lifecycle snapshots keyed by task id.
#[derive(Clone)]
pub struct TaskTracker {
    store: Arc<dyn SharedStore>,
}

impl TaskTracker {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    fn snapshot_key(task_id: &str) -> String {
        format!("task:{}", task_id)
    }

    fn cancel_key(task_id: &str) -> String {
        format!("task:{}:cancel", task_id)
    }

    /// Persist a PENDING snapshot and enqueue the work. Returns the task id
    /// synchronously, ahead of any processing.
    pub async fn submit(&self, request: AnalysisRequest, queue: &WorkQueue) -> StoreResult<String> {
        let task_id = Uuid::new_v4().to_string();
        let snapshot = TaskSnapshot::pending(&task_id);
        self.write_snapshot(&snapshot).await?;

        let envelope = TaskEnvelope {
            task_id: task_id.clone(),
            request,
            enqueued_at: Utc::now(),
        };
        queue.enqueue(&envelope).await?;

        info!("Submitted task {}", task_id);
        Ok(task_id)
    }

    /// Fetch the current snapshot, or None for an unknown id.
    pub async fn get_status(&self, task_id: &str) -> StoreResult<Option<TaskSnapshot>> {
        match self.store.get(&Self::snapshot_key(task_id)).await? {
            Some(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::Decode(format!("bad task snapshot: {}", e)))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Apply a state update, writing a fresh full snapshot.
    ///
    /// Progress is clamped to be non-decreasing while the task stays in
    /// PROCESSING. Terminal SUCCESS/FAILURE writes always land (last terminal
    /// write wins), so a worker finishing after a cancel overwrites
    /// CANCELLED. Non-terminal writes cannot: a progress report from a worker
    /// that has not yet observed the cancel flag is dropped, returning the
    /// CANCELLED snapshot unchanged.
    pub async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        update: StateUpdate,
    ) -> StoreResult<TaskSnapshot> {
        let previous = self.get_status(task_id).await?;

        if let Some(prev) = &previous {
            if prev.state == TaskState::Cancelled
                && !matches!(state, TaskState::Success | TaskState::Failure)
            {
                debug!("Task {} is cancelled, dropping {} write", task_id, state);
                return Ok(prev.clone());
            }
        }

        let mut snapshot = previous
            .clone()
            .unwrap_or_else(|| TaskSnapshot::pending(task_id));
        snapshot.state = state;

        if let Some(progress) = update.progress {
            let progress = progress.min(100);
            snapshot.progress = match &previous {
                Some(prev) if prev.state == TaskState::Processing && state == TaskState::Processing => {
                    progress.max(prev.progress)
                }
                _ => progress,
            };
        }
        if let Some(message) = update.status_message {
            snapshot.status_message = message;
        }
        if let Some(step) = update.current_step {
            snapshot.current_step = step;
        }
        if let Some(result) = update.result {
            snapshot.result = Some(result);
        }
        if let Some(error) = update.error {
            snapshot.error = Some(error);
        }

        self.write_snapshot(&snapshot).await?;
        debug!(
            "Task {} -> {} ({}%)",
            task_id, snapshot.state, snapshot.progress
        );
        Ok(snapshot)
    }

    /// Request cancellation of a task.
    ///
    /// Best-effort: records intent in the store for the worker to observe at
    /// its next stage boundary and writes a CANCELLED snapshot. Cancelling an
    /// already-terminal task is a no-op that reports the terminal state.
    pub async fn cancel(&self, task_id: &str) -> StoreResult<CancelOutcome> {
        let snapshot = match self.get_status(task_id).await? {
            Some(snapshot) => snapshot,
            None => return Ok(CancelOutcome::NotFound),
        };

        if snapshot.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(snapshot.state));
        }

        self.store
            .set_ex(&Self::cancel_key(task_id), "1", CANCEL_FLAG_TTL)
            .await?;

        self.update_state(
            task_id,
            TaskState::Cancelled,
            StateUpdate {
                status_message: Some("Task cancelled".to_string()),
                ..Default::default()
            },
        )
        .await?;

        info!("Cancelled task {}", task_id);
        Ok(CancelOutcome::Cancelled)
    }

    /// Whether a cancel signal is pending for this task. Checked by workers
    /// at stage boundaries.
    pub async fn is_cancel_requested(&self, task_id: &str) -> bool {
        matches!(
            self.store.get(&Self::cancel_key(task_id)).await,
            Ok(Some(_))
        )
    }

    async fn write_snapshot(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let raw =
            serde_json::to_string(snapshot).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.store
            .set_ex(&Self::snapshot_key(&snapshot.task_id), &raw, SNAPSHOT_TTL)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tasks::AnalysisKind;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            document_ref: "doc.pdf".to_string(),
            kinds: vec![AnalysisKind::Similarity],
            image_refs: vec![],
            submitted_by: None,
        }
    }

    fn tracker() -> (TaskTracker, WorkQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            TaskTracker::new(store.clone()),
            WorkQueue::new(store.clone(), "analysis"),
            store,
        )
    }

    #[tokio::test]
    async fn test_fresh_submission_is_pending_at_zero() {
        let (tracker, queue, _) = tracker();
        let task_id = tracker.submit(request(), &queue).await.unwrap();

        let snapshot = tracker.get_status(&task_id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Pending);
        assert_eq!(snapshot.progress, 0);

        // The work envelope is on the queue for a worker.
        let envelope = queue
            .dequeue(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.task_id, task_id);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found_not_pending() {
        let (tracker, _, _) = tracker();
        assert!(tracker.get_status("nope").await.unwrap().is_none());
        assert_eq!(
            tracker.cancel("nope").await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_while_processing() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();

        for (progress, step) in [(20u8, "extraction"), (60, "analysis")] {
            tracker
                .update_state(
                    &id,
                    TaskState::Processing,
                    StateUpdate::progress(progress, "working", step),
                )
                .await
                .unwrap();
        }

        // A stale, out-of-order retry with lower progress must not move the
        // bar backwards.
        let snapshot = tracker
            .update_state(
                &id,
                TaskState::Processing,
                StateUpdate::progress(20, "working", "extraction"),
            )
            .await
            .unwrap();
        assert_eq!(snapshot.progress, 60);
    }

    #[tokio::test]
    async fn test_update_state_is_idempotent_under_retries() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();

        let update = || StateUpdate::progress(40, "Initializing AI agents", "agent_setup");
        let first = tracker
            .update_state(&id, TaskState::Processing, update())
            .await
            .unwrap();
        let second = tracker
            .update_state(&id, TaskState::Processing, update())
            .await
            .unwrap();
        assert_eq!(first.progress, second.progress);
        assert_eq!(first.status_message, second.status_message);
        assert_eq!(first.current_step, second.current_step);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_noop() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();
        tracker
            .update_state(
                &id,
                TaskState::Success,
                StateUpdate::result(serde_json::json!({"ok": true})),
            )
            .await
            .unwrap();

        let outcome = tracker.cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal(TaskState::Success));

        let snapshot = tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_cancel_sets_flag_and_state() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();
        tracker
            .update_state(
                &id,
                TaskState::Processing,
                StateUpdate::progress(20, "working", "extraction"),
            )
            .await
            .unwrap();

        assert_eq!(tracker.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);
        assert!(tracker.is_cancel_requested(&id).await);
        let snapshot = tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_progress_write_does_not_resurrect_cancelled_task() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();
        tracker
            .update_state(
                &id,
                TaskState::Processing,
                StateUpdate::progress(20, "working", "extraction"),
            )
            .await
            .unwrap();
        tracker.cancel(&id).await.unwrap();

        // A worker past its last cancel check reports progress without
        // having observed the flag. The write must not pull the task back
        // into PROCESSING.
        let snapshot = tracker
            .update_state(
                &id,
                TaskState::Processing,
                StateUpdate::progress(60, "Running analysis agents", "analysis"),
            )
            .await
            .unwrap();
        assert_eq!(snapshot.state, TaskState::Cancelled);

        let stored = tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Cancelled);
        assert_eq!(stored.progress, 20);
    }

    #[tokio::test]
    async fn test_late_terminal_write_wins_over_cancel() {
        let (tracker, queue, _) = tracker();
        let id = tracker.submit(request(), &queue).await.unwrap();
        tracker.cancel(&id).await.unwrap();

        // Worker finished before observing the cancel flag.
        tracker
            .update_state(
                &id,
                TaskState::Success,
                StateUpdate::result(serde_json::json!({"ok": true})),
            )
            .await
            .unwrap();

        let snapshot = tracker.get_status(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, TaskState::Success);
        assert!(snapshot.result.is_some());
    }
}
