//! Remote provider backends (OpenAI-compatible and Anthropic wire shapes)

use super::{Backend, BackendError, BackendTier};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Configuration shared by remote providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl RemoteConfig {
    pub fn openai_defaults() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
        }
    }

    pub fn anthropic_defaults() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.2,
        }
    }
}

/// Map a non-2xx provider status into the transport error taxonomy.
///
/// 429 is ambiguous: exhausted credit reads as a quota failure that must not
/// be retried, a plain rate limit is transient.
fn map_provider_error(status: u16, body: String) -> BackendError {
    match status {
        401 | 403 => BackendError::Auth(body),
        429 => {
            let lowered = body.to_lowercase();
            if lowered.contains("insufficient")
                || lowered.contains("quota")
                || lowered.contains("balance")
                || lowered.contains("billing")
            {
                BackendError::Quota(body)
            } else {
                BackendError::RateLimited {
                    retry_after_secs: 60,
                }
            }
        }
        _ => BackendError::Provider {
            status,
            message: body,
        },
    }
}

fn map_send_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() {
        BackendError::Unreachable(e.to_string())
    } else {
        BackendError::Http(e)
    }
}

/// Remote provider speaking the chat-completions wire shape.
pub struct OpenAiBackend {
    id: String,
    config: RemoteConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(id: impl Into<String>, config: RemoteConfig) -> Self {
        Self {
            id: id.into(),
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_provider_error(status.as_u16(), text));
        }

        let json: Value = response.json().await?;
        Ok(json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }

    async fn health_check(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> BackendTier {
        BackendTier::Remote
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Remote provider speaking the Anthropic messages wire shape.
pub struct AnthropicBackend {
    id: String,
    config: RemoteConfig,
    client: Client,
}

impl AnthropicBackend {
    pub fn new(id: impl Into<String>, config: RemoteConfig) -> Self {
        Self {
            id: id.into(),
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let body = json!({
            "model": self.config.model,
            "system": system,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "max_tokens": max_tokens,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_provider_error(status.as_u16(), text));
        }

        let json: Value = response.json().await?;
        Ok(json["content"][0]["text"].as_str().unwrap_or("").to_string())
    }

    async fn health_check(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> BackendTier {
        BackendTier::Remote
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_text_maps_to_quota_error() {
        let err = map_provider_error(429, "insufficient balance".to_string());
        assert!(matches!(err, BackendError::Quota(_)));
    }

    #[test]
    fn test_plain_429_maps_to_rate_limit() {
        let err = map_provider_error(429, "too many requests".to_string());
        assert!(matches!(err, BackendError::RateLimited { .. }));
    }

    #[test]
    fn test_auth_statuses() {
        assert!(matches!(
            map_provider_error(401, String::new()),
            BackendError::Auth(_)
        ));
        assert!(matches!(
            map_provider_error(403, String::new()),
            BackendError::Auth(_)
        ));
    }

    #[test]
    fn test_server_error_keeps_status() {
        match map_provider_error(503, "overloaded".to_string()) {
            BackendError::Provider { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
