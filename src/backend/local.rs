//! Local runtime backend using an Ollama-compatible server

use super::{Backend, BackendError, BackendTier};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Configuration for a local runtime backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Runtime server URL
    pub base_url: String,
    /// Model to request (e.g. "qwen2.5-coder:7b", "llama3.2")
    pub model: String,
    /// Sampling temperature; artifact generation wants low variance
    pub temperature: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            temperature: 0.1,
        }
    }
}

/// Local model runtime reached over the Ollama generate API.
pub struct OllamaBackend {
    id: String,
    config: OllamaConfig,
    client: Client,
}

impl OllamaBackend {
    pub fn new(id: impl Into<String>, config: OllamaConfig) -> Self {
        Self {
            id: id.into(),
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "system": system,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": max_tokens
            }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::Unreachable(e.to_string())
                } else {
                    BackendError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response.json().await?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Provider {
                status: status.as_u16(),
                message: "no response field in runtime reply".to_string(),
            })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> BackendTier {
        BackendTier::Local
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
