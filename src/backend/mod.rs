//! Backend abstraction layer for inference providers
//!
//! Every backend, local runtime or remote API, is reached through the same
//! `complete(prompt, system, max_tokens)` contract. The orchestrator never
//! branches on a concrete provider; priority and capability live in the
//! candidate table.

mod local;
mod remote;

pub use local::{OllamaBackend, OllamaConfig};
pub use remote::{AnthropicBackend, OpenAiBackend, RemoteConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Quota exhausted: {0}")]
    Quota(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which pool a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTier {
    /// Cheap, resource-constrained, tried first
    Local,
    /// Costlier, used only on local exhaustion
    Remote,
}

impl std::fmt::Display for BackendTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendTier::Local => write!(f, "local"),
            BackendTier::Remote => write!(f, "remote"),
        }
    }
}

/// Approximate cost class of a candidate, for operators reading policy dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostClass {
    Free,
    Budget,
    Standard,
    Premium,
}

/// Read-only description of one candidate backend.
///
/// Priority is the candidate's position in its policy list; candidates are
/// configuration data and are never owned or mutated by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCandidate {
    pub id: String,
    pub tier: BackendTier,
    /// Model served by this candidate (gate key for local candidates)
    pub model: String,
    /// Input budget the compressor must honor
    pub max_input_tokens: usize,
    pub cost: CostClass,
}

/// Uniform completion interface implemented once per backend type.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one completion round-trip.
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, BackendError>;

    /// Cheap availability probe. Transport-level only; the health cache
    /// applies the timeout and memoizes the result.
    async fn health_check(&self) -> bool;

    /// Identifier matching the candidate table.
    fn id(&self) -> &str;

    fn tier(&self) -> BackendTier;

    /// Model this backend serves.
    fn model_name(&self) -> &str;
}

/// Backends resolved by candidate id at orchestration time.
pub type BackendRegistry = HashMap<String, Arc<dyn Backend>>;
