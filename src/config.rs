//! Runtime settings.
//!
//! Loaded from an optional TOML file, with every field defaulting to a
//! workable local setup. A handful of environment variables override the
//! file for deployment.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::capability::GenerationConfig;
use crate::guard::{default_tiers, TierLimits};
use crate::retrieval::RetrievalConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Shared store connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Name of the shared work queue
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Key prefix for cache entries
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub services: ServiceSettings,
    /// Quota table keyed by identity tier
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierLimits>,
}

/// Endpoints for the collaborator services. Absent endpoints disable the
/// corresponding capability or backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub extractor_endpoint: Option<String>,
    #[serde(default)]
    pub classifier_endpoint: Option<String>,
    #[serde(default)]
    pub image_endpoint: Option<String>,
    #[serde(default)]
    pub vector_endpoint: Option<String>,
    #[serde(default)]
    pub semantic_endpoint: Option<String>,
    /// HTTP timeout for collaborator calls in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_queue_name() -> String {
    "analysis".to_string()
}
fn default_cache_prefix() -> String {
    "veridoc:cache".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            extractor_endpoint: None,
            classifier_endpoint: None,
            image_endpoint: None,
            vector_endpoint: None,
            semantic_endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            queue_name: default_queue_name(),
            cache_prefix: default_cache_prefix(),
            worker: WorkerConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            services: ServiceSettings::default(),
            tiers: default_tiers(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when no file
    /// is given or present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("VERIDOC_REDIS_URL") {
            self.redis_url = url;
        }
        if let Ok(queue) = std::env::var("VERIDOC_QUEUE") {
            self.queue_name = queue;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.redis_url, "redis://localhost:6379");
        assert_eq!(settings.queue_name, "analysis");
        assert_eq!(settings.worker.workers, 2);
        assert_eq!(settings.retrieval.top_k, 5);
        assert!(settings.tiers.contains_key("enterprise"));
        assert!(settings.services.extractor_endpoint.is_none());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: Settings = toml::from_str(
            r#"
            redis_url = "redis://cache:6379"

            [worker]
            workers = 8

            [services]
            extractor_endpoint = "http://extractor:8000"

            [generation]
            model = "mistral:instruct"
            "#,
        )
        .unwrap();

        assert_eq!(settings.redis_url, "redis://cache:6379");
        assert_eq!(settings.worker.workers, 8);
        assert_eq!(settings.worker.hard_time_limit_secs, 3600);
        assert_eq!(
            settings.services.extractor_endpoint.as_deref(),
            Some("http://extractor:8000")
        );
        assert_eq!(settings.generation.model, "mistral:instruct");
    }
}
