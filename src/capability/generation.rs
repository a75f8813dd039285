//! LLM generation service client.
//!
//! Supports the Ollama API for local inference.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CapabilityError;

/// Configuration for the generation client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Whether generation is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Generation API endpoint (default: http://localhost:11434)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model to use for generation
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum characters of prompt context sent to the model
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3.2:instruct".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_prompt_chars() -> usize {
    24000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

/// Generates text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, CapabilityError>;

    async fn is_available(&self) -> bool;
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// LLM generation client.
pub struct GenerationClient {
    config: GenerationConfig,
    client: Client,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // slow models
            .build()
            .map_err(|e| CapabilityError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Truncate a prompt to the configured maximum (UTF-8 safe).
    fn truncate_prompt<'a>(&self, prompt: &'a str) -> &'a str {
        crate::utils::truncate_chars(prompt, self.config.max_prompt_chars)
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, CapabilityError> {
        if !self.config.enabled {
            return Err(CapabilityError::Disabled);
        }

        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt: self.truncate_prompt(prompt).to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: max_tokens.min(self.config.max_tokens),
            },
        };

        debug!("Calling generation model {}", self.config.model);
        let url = format!("{}/api/generate", self.config.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CapabilityError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Service(format!("HTTP {}: {}", status, body)));
        }

        let parsed: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }

    async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let url = format!("{}/api/tags", self.config.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert!(config.enabled);
        assert!(config.endpoint.contains("11434"));
        assert!(config.max_tokens >= 512);
    }
}
