//! CLI commands implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::agents::AgentCoordinator;
use crate::capability::{
    DocumentExtractor, ExtractorClient, GenerationClient, Generator, ImageAnalyzer,
    ImageAnalyzerClient, TextClassifier, TextClassifierClient,
};
use crate::config::Settings;
use crate::events::EventHub;
use crate::guard::{CacheGuard, QuotaAction, RateDecision, RateLimiter};
use crate::memory::MemoryService;
use crate::retrieval::{
    LocalBackend, RetrievalEngine, SearchBackend, SemanticBackend, VectorBackend,
};
use crate::store::{RedisStore, SharedStore};
use crate::tasks::{AnalysisKind, AnalysisRequest, CancelOutcome, TaskState, TaskTracker, WorkQueue};
use crate::worker::WorkerPool;

/// Shared runtime wiring for every command.
struct Runtime {
    redis: RedisStore,
    tracker: TaskTracker,
    queue: Arc<WorkQueue>,
    engine: Arc<RetrievalEngine>,
    limiter: RateLimiter,
    memory: MemoryService,
    hub: Arc<EventHub>,
}

impl Runtime {
    async fn build(settings: &Settings) -> anyhow::Result<Self> {
        let redis = RedisStore::connect(&settings.redis_url)
            .await
            .with_context(|| format!("connecting to store at {}", settings.redis_url))?;
        let store: Arc<dyn SharedStore> = Arc::new(redis.clone());

        let timeout = Duration::from_secs(settings.services.timeout_secs);
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        if let Some(endpoint) = &settings.services.vector_endpoint {
            backends.push(Arc::new(VectorBackend::new("vector", endpoint, timeout)?));
        }
        if let Some(endpoint) = &settings.services.semantic_endpoint {
            backends.push(Arc::new(SemanticBackend::new("semantic", endpoint, timeout)?));
        }
        if backends.is_empty() {
            warn!("No retrieval backends configured, using the in-process index");
            backends.push(Arc::new(LocalBackend::new("local")));
        }

        let generator: Option<Arc<dyn Generator>> = if settings.generation.enabled {
            Some(Arc::new(GenerationClient::new(settings.generation.clone())?))
        } else {
            None
        };

        let engine = Arc::new(RetrievalEngine::new(
            backends,
            generator,
            CacheGuard::new(store.clone(), &settings.cache_prefix),
            settings.retrieval.clone(),
        ));

        Ok(Self {
            redis,
            tracker: TaskTracker::new(store.clone()),
            queue: Arc::new(WorkQueue::new(store.clone(), &settings.queue_name)),
            engine,
            limiter: RateLimiter::with_tiers(store.clone(), settings.tiers.clone()),
            memory: MemoryService::new(store.clone()),
            hub: Arc::new(EventHub::new(store)),
        })
    }

    /// Build the agent pipeline. Worker-only: requires the extractor and
    /// classifier endpoints to be configured.
    fn build_coordinator(&self, settings: &Settings) -> anyhow::Result<Arc<AgentCoordinator>> {
        let timeout = Duration::from_secs(settings.services.timeout_secs);

        let extractor: Arc<dyn DocumentExtractor> = Arc::new(ExtractorClient::new(
            settings
                .services
                .extractor_endpoint
                .as_deref()
                .context("services.extractor_endpoint must be configured to run workers")?,
            timeout,
        )?);
        let classifier: Arc<dyn TextClassifier> = Arc::new(TextClassifierClient::new(
            settings
                .services
                .classifier_endpoint
                .as_deref()
                .context("services.classifier_endpoint must be configured to run workers")?,
            timeout,
        )?);
        let image_analyzer: Option<Arc<dyn ImageAnalyzer>> =
            match &settings.services.image_endpoint {
                Some(endpoint) => Some(Arc::new(ImageAnalyzerClient::new(endpoint, timeout)?)),
                None => None,
            };
        let generator: Option<Arc<dyn Generator>> = if settings.generation.enabled {
            Some(Arc::new(GenerationClient::new(settings.generation.clone())?))
        } else {
            None
        };

        Ok(Arc::new(AgentCoordinator::new(
            self.engine.clone(),
            extractor,
            classifier,
            image_analyzer,
            generator,
        )))
    }
}

pub async fn cmd_worker(settings: &Settings) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    let coordinator = runtime.build_coordinator(settings)?;

    let pool = Arc::new(WorkerPool::new(
        runtime.tracker.clone(),
        runtime.queue.clone(),
        coordinator,
        runtime.hub.clone(),
        runtime.memory.clone(),
        settings.worker.clone(),
    ));

    // Relay events published by other processes into local subscribers.
    let relay = tokio::spawn(runtime.hub.clone().run_relay(runtime.redis.clone()));

    println!(
        "{} {} workers on queue {}",
        style("Starting").green().bold(),
        settings.worker.workers,
        style(&settings.queue_name).cyan()
    );

    tokio::select! {
        _ = pool.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down workers");
        }
    }
    relay.abort();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_submit(
    settings: &Settings,
    document_ref: &str,
    kinds: &[String],
    images: Vec<String>,
    user: Option<&str>,
    tier: &str,
    wait: bool,
) -> anyhow::Result<()> {
    let kinds = kinds
        .iter()
        .map(|k| k.parse::<AnalysisKind>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::msg)?;

    let request = AnalysisRequest {
        document_ref: document_ref.to_string(),
        kinds,
        image_refs: images,
        submitted_by: user.map(|u| u.to_string()),
    };
    request.validate().map_err(anyhow::Error::msg)?;

    let runtime = Runtime::build(settings).await?;

    if let Some(user) = user {
        check_quota(&runtime.limiter, user, tier, QuotaAction::AnalysisPerDay).await?;
    }

    let task_id = runtime.tracker.submit(request, &runtime.queue).await?;
    println!("{} {}", style("Submitted task").green().bold(), task_id);

    if wait {
        tail_progress(&runtime.tracker, &task_id).await?;
    }
    Ok(())
}

pub async fn cmd_status(settings: &Settings, task_id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    let Some(snapshot) = runtime.tracker.get_status(task_id).await? else {
        anyhow::bail!("task {} not found", task_id);
    };

    println!("Task:     {}", snapshot.task_id);
    println!("State:    {}", styled_state(snapshot.state));
    println!("Progress: {}%", snapshot.progress);
    if !snapshot.current_step.is_empty() {
        println!("Step:     {}", snapshot.current_step);
    }
    println!("Message:  {}", snapshot.status_message);
    println!("Created:  {}", snapshot.created_at.to_rfc3339());
    if let Some(error) = &snapshot.error {
        println!("Error:    {}", style(error).red());
    }
    if let Some(result) = &snapshot.result {
        if let Some(stages) = result["stages"].as_object() {
            let names: Vec<&str> = stages.keys().map(|k| k.as_str()).collect();
            println!("Stages:   {}", names.join(", "));
        }
    }
    Ok(())
}

pub async fn cmd_cancel(settings: &Settings, task_id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    match runtime.tracker.cancel(task_id).await? {
        CancelOutcome::Cancelled => {
            println!("{} {}", style("Cancelled").yellow().bold(), task_id);
            Ok(())
        }
        CancelOutcome::AlreadyTerminal(state) => {
            println!(
                "Task {} already finished as {}",
                task_id,
                styled_state(state)
            );
            Ok(())
        }
        CancelOutcome::NotFound => anyhow::bail!("task {} not found", task_id),
    }
}

pub async fn cmd_ask(
    settings: &Settings,
    question: &str,
    document: Option<&str>,
    top_k: usize,
    memory_id: Option<&str>,
    user: Option<&str>,
    tier: &str,
) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;

    if let Some(user) = user {
        check_quota(&runtime.limiter, user, tier, QuotaAction::ChatPerHour).await?;
    }

    let outcome = runtime.engine.answer_question(question, document, top_k).await?;

    println!("{}", style(&outcome.answer).bold());
    if !outcome.sources.is_empty() {
        println!();
        println!("{}", style("Sources:").dim());
        for source in &outcome.sources {
            println!(
                "  [{:.3}] {} ({})",
                source.score,
                crate::utils::truncate_chars(&source.text, 80),
                style(&source.backend).dim()
            );
        }
    }

    if let Some(memory_id) = memory_id {
        let context: Vec<String> = outcome.sources.iter().map(|s| s.text.clone()).collect();
        let appended = runtime
            .memory
            .append_chat_interaction(memory_id, question, &outcome.answer, &context.join("\n\n"))
            .await?;
        if appended.is_none() {
            warn!("Memory {} not found, chat round not recorded", memory_id);
        }
    }
    Ok(())
}

pub async fn cmd_index(
    settings: &Settings,
    document_id: &str,
    file: &Path,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let runtime = Runtime::build(settings).await?;
    let chunks = runtime.engine.prepare_document_for_indexing(&text);
    if chunks.is_empty() {
        anyhow::bail!("{} contains no indexable text", file.display());
    }

    let metadata = std::collections::HashMap::from([(
        "source_file".to_string(),
        file.display().to_string(),
    )]);
    let indexed = runtime
        .engine
        .index_document(document_id, &chunks, &metadata)
        .await;
    if indexed == 0 {
        anyhow::bail!("no backend accepted document {}", document_id);
    }

    println!(
        "{} {} chunks of {} into {} backend(s)",
        style("Indexed").green().bold(),
        chunks.len(),
        document_id,
        indexed
    );
    Ok(())
}

pub async fn cmd_memory_list(settings: &Settings) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    let memories = runtime.memory.list().await?;
    if memories.is_empty() {
        println!("No memories stored");
        return Ok(());
    }
    for record in memories {
        println!(
            "{}  {}  {} chat round(s)  updated {}",
            style(&record.id).cyan(),
            record.document_id,
            record.chat_history.len(),
            record.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

pub async fn cmd_memory_show(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    let Some(record) = runtime.memory.get(id).await? else {
        anyhow::bail!("memory {} not found", id);
    };

    println!("{} ({})", style(&record.id).cyan().bold(), record.document_id);
    println!("Created: {}", record.created_at.to_rfc3339());
    if let Some(context) = runtime.memory.chat_context(id).await? {
        println!();
        println!("{}", context);
    }
    if !record.chat_history.is_empty() {
        println!();
        println!("{}", style("Chat history:").dim());
        for round in &record.chat_history {
            println!("  {} {}", style("Q:").bold(), round.question);
            println!("  {} {}", style("A:").bold(), round.answer);
        }
    }
    Ok(())
}

pub async fn cmd_memory_delete(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::build(settings).await?;
    if runtime.memory.delete(id).await? {
        println!("{} {}", style("Deleted").yellow().bold(), id);
        Ok(())
    } else {
        anyhow::bail!("memory {} not found", id)
    }
}

async fn check_quota(
    limiter: &RateLimiter,
    user: &str,
    tier: &str,
    action: QuotaAction,
) -> anyhow::Result<()> {
    match limiter.check_tier(user, tier, action).await {
        RateDecision::Allowed => Ok(()),
        RateDecision::Limited {
            limit,
            requests,
            reset_in,
        } => anyhow::bail!(
            "quota exceeded for {}: {}/{} used, resets in {}s",
            user,
            requests,
            limit,
            reset_in
        ),
    }
}

/// Poll the tracker until the task reaches a terminal state, rendering a
/// progress bar.
async fn tail_progress(tracker: &TaskTracker, task_id: &str) -> anyhow::Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        let Some(snapshot) = tracker.get_status(task_id).await? else {
            bar.abandon();
            anyhow::bail!("task {} disappeared from the store", task_id);
        };

        bar.set_position(snapshot.progress as u64);
        bar.set_message(snapshot.status_message.clone());

        if snapshot.state.is_terminal() {
            bar.finish_and_clear();
            println!("Task finished: {}", styled_state(snapshot.state));
            if let Some(error) = &snapshot.error {
                println!("{}", style(error).red());
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn styled_state(state: TaskState) -> console::StyledObject<String> {
    let text = state.to_string();
    match state {
        TaskState::Success => style(text).green().bold(),
        TaskState::Failure => style(text).red().bold(),
        TaskState::Cancelled => style(text).yellow().bold(),
        TaskState::Pending | TaskState::Processing => style(text).cyan(),
    }
}
