//! Pipeline coordinator: runs the extraction stage first, the requested
//! analysis stages concurrently, and the insight stage last over everything.
//!
//! Every stage is wrapped in error isolation: a failing stage yields an
//! error-status `AgentResult` in the aggregate and its siblings proceed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::capability::{DocumentExtractor, Generator, ImageAnalyzer, TextClassifier};
use crate::retrieval::RetrievalEngine;
use crate::tasks::{AnalysisKind, AnalysisRequest};

use super::{
    extraction, Agent, AgentResult, AgentStatus, AiDetectionAgent, AnalysisAggregate,
    ContextAgent, ExtractionAgent, ImageSimilarityAgent, InsightAgent, SimilarityAgent,
    StageInput,
};

pub struct AgentCoordinator {
    engine: Arc<RetrievalEngine>,
    extraction: ExtractionAgent,
    similarity: SimilarityAgent,
    ai_detection: AiDetectionAgent,
    image: Option<ImageSimilarityAgent>,
    context: ContextAgent,
    insight: InsightAgent,
}

impl AgentCoordinator {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        extractor: Arc<dyn DocumentExtractor>,
        classifier: Arc<dyn TextClassifier>,
        image_analyzer: Option<Arc<dyn ImageAnalyzer>>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Self {
        Self {
            extraction: ExtractionAgent::new(extractor),
            similarity: SimilarityAgent::new(engine.clone()),
            ai_detection: AiDetectionAgent::new(classifier),
            image: image_analyzer.map(ImageSimilarityAgent::new),
            context: ContextAgent::new(engine.clone()),
            insight: InsightAgent::new(generator),
            engine,
        }
    }

    /// Run one stage with timing and error isolation.
    async fn run_stage(&self, agent: &dyn Agent, input: StageInput) -> AgentResult {
        let name = agent.name();
        let started = Instant::now();
        let outcome = agent.analyze(input).await;
        let execution_time = started.elapsed().as_secs_f64();

        match outcome {
            Ok(payload) => {
                info!("Stage {} completed in {:.2}s", name, execution_time);
                AgentResult {
                    agent_name: name.to_string(),
                    status: AgentStatus::Success,
                    payload,
                    execution_time,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                warn!("Stage {} failed after {:.2}s: {:#}", name, execution_time, e);
                AgentResult {
                    agent_name: name.to_string(),
                    status: AgentStatus::Error,
                    payload: serde_json::json!({ "error": e.to_string() }),
                    execution_time,
                    errors: vec![e.to_string()],
                }
            }
        }
    }

    /// Phase 1: extract document structure. Returns the stage result and the
    /// extracted text (empty when extraction failed).
    pub async fn run_extraction(&self, document_ref: &str) -> (AgentResult, String) {
        let result = self
            .run_stage(
                &self.extraction,
                StageInput::Document {
                    document_ref: document_ref.to_string(),
                },
            )
            .await;
        let text = if result.is_success() {
            extraction::text_from_payload(&result.payload)
        } else {
            String::new()
        };
        (result, text)
    }

    /// Index the extracted text so the context stage and later questions can
    /// retrieve against it. Best-effort; backend failures are logged inside
    /// the engine.
    pub async fn index_extracted_text(&self, document_ref: &str, text: &str) -> usize {
        let chunks = self.engine.prepare_document_for_indexing(text);
        if chunks.is_empty() {
            return 0;
        }
        let metadata = HashMap::from([("document_ref".to_string(), document_ref.to_string())]);
        self.engine
            .index_document(document_ref, &chunks, &metadata)
            .await
    }

    /// Phase 2: run the requested analysis stages concurrently. The retrieval
    /// context stage always runs; the image stage runs only when requested
    /// and image references were supplied.
    pub async fn run_analysis_stages(
        &self,
        request: &AnalysisRequest,
        text: &str,
    ) -> Vec<AgentResult> {
        let text_input = StageInput::Text {
            text: text.to_string(),
            document_ref: request.document_ref.clone(),
        };

        let mut stages: Vec<(&dyn Agent, StageInput)> = Vec::new();
        if request.kinds.contains(&AnalysisKind::Similarity) {
            stages.push((&self.similarity as &dyn Agent, text_input.clone()));
        }
        if request.kinds.contains(&AnalysisKind::AiDetect) {
            stages.push((&self.ai_detection as &dyn Agent, text_input.clone()));
        }
        let mut results = Vec::new();
        if request.kinds.contains(&AnalysisKind::ImageSimilarity) && !request.image_refs.is_empty()
        {
            match &self.image {
                Some(image) => stages.push((
                    image as &dyn Agent,
                    StageInput::Images {
                        image_refs: request.image_refs.clone(),
                    },
                )),
                None => results.push(AgentResult {
                    agent_name: "image_analysis".to_string(),
                    status: AgentStatus::Error,
                    payload: serde_json::json!({ "error": "image analysis service not configured" }),
                    execution_time: 0.0,
                    errors: vec!["image analysis service not configured".to_string()],
                }),
            }
        }
        stages.push((&self.context as &dyn Agent, text_input));

        let runs = stages
            .into_iter()
            .map(|(agent, input)| self.run_stage(agent, input));
        results.extend(futures::future::join_all(runs).await);
        results
    }

    /// Phase 3: synthesize insights over everything that ran so far.
    pub async fn run_insight(&self, stages: &BTreeMap<String, AgentResult>) -> AgentResult {
        self.run_stage(
            &self.insight,
            StageInput::Aggregate {
                stages: stages.clone(),
            },
        )
        .await
    }

    /// Run the full pipeline in one shot, without external progress
    /// reporting or cancellation checks.
    pub async fn run_analysis(&self, request: &AnalysisRequest) -> AnalysisAggregate {
        let mut aggregate = AnalysisAggregate::new(request.kinds.clone());

        let (extraction_result, text) = self.run_extraction(&request.document_ref).await;
        let extraction_ok = extraction_result.is_success();
        aggregate
            .stages
            .insert(extraction_result.agent_name.clone(), extraction_result);

        if extraction_ok {
            self.index_extracted_text(&request.document_ref, &text).await;
        }

        for result in self.run_analysis_stages(request, &text).await {
            aggregate.stages.insert(result.agent_name.clone(), result);
        }

        let insight_result = self.run_insight(&aggregate.stages).await;
        aggregate
            .stages
            .insert(insight_result.agent_name.clone(), insight_result);

        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        CapabilityError, DocumentStructure, TextBlock, TextClassification,
    };
    use crate::guard::CacheGuard;
    use crate::retrieval::{LocalBackend, RetrievalConfig};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct StubExtractor {
        fail: bool,
    }

    #[async_trait]
    impl DocumentExtractor for StubExtractor {
        async fn extract(&self, _document_ref: &str) -> Result<DocumentStructure, CapabilityError> {
            if self.fail {
                return Err(CapabilityError::Service("extractor down".to_string()));
            }
            Ok(DocumentStructure {
                blocks: vec![TextBlock {
                    page: 1,
                    text: "A report about municipal water quality sampling procedures and \
                           laboratory findings collected over the past year."
                        .to_string(),
                }],
            })
        }

        async fn is_available(&self) -> bool {
            !self.fail
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
                    confidence: 0.9,
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

    fn coordinator(fail_extraction: bool) -> AgentCoordinator {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(RetrievalEngine::new(
            vec![Arc::new(LocalBackend::new("local"))],
            None,
            CacheGuard::new(store, "veridoc:cache"),
            RetrievalConfig::default(),
        ));
        AgentCoordinator::new(
            engine,
            Arc::new(StubExtractor {
                fail: fail_extraction,
            }),
            Arc::new(StubClassifier),
            Some(Arc::new(StubImageAnalyzer) as Arc<dyn ImageAnalyzer>),
            None,
        )
    }

    fn request(kinds: Vec<AnalysisKind>, image_refs: Vec<String>) -> AnalysisRequest {
        AnalysisRequest {
            document_ref: "doc-1".to_string(),
            kinds,
            image_refs,
            submitted_by: None,
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_aggregate_keys() {
        let coordinator = coordinator(false);
        let aggregate = coordinator
            .run_analysis(&request(
                vec![AnalysisKind::Similarity, AnalysisKind::AiDetect],
                vec![],
            ))
            .await;

        assert!(aggregate.stage("document_analysis").is_some());
        assert!(aggregate.stage("similarity").is_some());
        assert!(aggregate.stage("ai_detection").is_some());
        assert!(aggregate.stage("rag_context").is_some());
        assert!(aggregate.stage("insights").is_some());
        // Not requested, no image refs: stage never ran.
        assert!(aggregate.stage("image_analysis").is_none());
    }

    #[tokio::test]
    async fn test_image_stage_runs_when_requested_with_refs() {
        let coordinator = coordinator(false);
        let aggregate = coordinator
            .run_analysis(&request(
                vec![AnalysisKind::ImageSimilarity],
                vec!["img-1".to_string()],
            ))
            .await;

        let image = aggregate.stage("image_analysis").unwrap();
        assert!(image.is_success());
        assert_eq!(image.payload["image_count"], 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_isolated() {
        let coordinator = coordinator(true);
        let aggregate = coordinator
            .run_analysis(&request(vec![AnalysisKind::Similarity], vec![]))
            .await;

        let extraction = aggregate.stage("document_analysis").unwrap();
        assert_eq!(extraction.status, AgentStatus::Error);
        assert!(!extraction.errors.is_empty());

        // Downstream stages still produce results over the empty text.
        assert!(aggregate.stage("similarity").is_some());
        assert!(aggregate.stage("insights").is_some());
    }
}
