//! Configuration management for artifact-relay
//!
//! Supports configuration via:
//! 1. Config file (~/.config/artifact-relay/config.toml)
//! 2. Environment variables (OPENAI_API_KEY, ANTHROPIC_API_KEY, etc.)
//! 3. Programmatic construction through `ConfigBuilder`
//!
//! The file holds the candidate table and the per-artifact policies as
//! data; `policy_table()` and `build_backends()` turn them into the
//! immutable runtime objects the orchestrator is constructed with.

use crate::backend::{
    AnthropicBackend, Backend, BackendCandidate, BackendRegistry, BackendTier, CostClass,
    OllamaBackend, OllamaConfig, OpenAiBackend, RemoteConfig,
};
use crate::policy::{ArtifactKind, ArtifactPolicy, PolicyTable};
use crate::validate::ValidatorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid policy configuration: {0}")]
    InvalidPolicy(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local runtime (Ollama) settings
    pub local: LocalSettings,

    /// Remote provider settings
    pub remote: RemoteProviders,

    /// Orchestration timeouts and budgets
    pub orchestrator: OrchestratorSettings,

    /// Validator penalty magnitudes
    pub validator: ValidatorConfig,

    /// Fine-tuning capture settings
    pub capture: CaptureSettings,

    /// Candidate table; every policy references entries here by id
    pub backends: Vec<BackendEntry>,

    /// Per-artifact routing policies, keyed by artifact kind name
    pub policies: HashMap<String, PolicySettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local: LocalSettings::default(),
            remote: RemoteProviders::default(),
            orchestrator: OrchestratorSettings::default(),
            validator: ValidatorConfig::default(),
            capture: CaptureSettings::default(),
            backends: default_backends(),
            policies: default_policies(),
        }
    }
}

/// Local runtime (Ollama) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Runtime server URL (ARTIFACT_RELAY_LOCAL_URL overrides)
    pub url: String,

    /// Sampling temperature for local models
    pub temperature: f32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            temperature: 0.1,
        }
    }
}

/// Remote provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteProviders {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
}

/// Settings shared by each remote provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key (provider env var overrides)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL; empty means the provider default
    pub base_url: String,

    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: String::new(),
            temperature: 0.2,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Per-attempt timeout against local candidates
    pub local_timeout_secs: u64,

    /// Per-attempt timeout against remote candidates
    pub remote_timeout_secs: u64,

    /// How long an attempt waits for the local model gate
    pub gate_timeout_secs: u64,

    /// Health probe memoization window
    pub health_ttl_secs: u64,

    /// Budget for one health probe
    pub probe_timeout_ms: u64,

    /// Completion budget handed to every backend
    pub max_output_tokens: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            local_timeout_secs: 60,
            remote_timeout_secs: 20,
            gate_timeout_secs: 90,
            health_ttl_secs: 5,
            probe_timeout_ms: 1000,
            max_output_tokens: 4096,
        }
    }
}

/// Fine-tuning capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Whether qualifying remote outputs are persisted
    pub enabled: bool,

    /// Directory for the per-kind JSONL streams
    /// (ARTIFACT_RELAY_CAPTURE_DIR overrides)
    pub dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("artifact-relay")
                .join("captures"),
        }
    }
}

/// Which transport serves a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    Openai,
    Anthropic,
}

impl ProviderKind {
    pub fn tier(&self) -> BackendTier {
        match self {
            ProviderKind::Ollama => BackendTier::Local,
            ProviderKind::Openai | ProviderKind::Anthropic => BackendTier::Remote,
        }
    }
}

/// One row of the candidate table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub max_input_tokens: usize,
    pub cost: CostClass,
}

impl BackendEntry {
    fn candidate(&self) -> BackendCandidate {
        BackendCandidate {
            id: self.id.clone(),
            tier: self.provider.tier(),
            model: self.model.clone(),
            max_input_tokens: self.max_input_tokens,
            cost: self.cost,
        }
    }
}

/// Per-artifact routing policy, as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Local candidate ids in priority order
    pub local: Vec<String>,

    /// Remote candidate ids in priority order
    pub remote: Vec<String>,

    pub pass_threshold: u8,
    pub capture_threshold: u8,
    pub max_local_attempts: usize,
    pub max_remote_attempts: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            local: vec!["local-qwen".to_string()],
            remote: vec!["remote-claude".to_string(), "remote-gpt".to_string()],
            pass_threshold: 70,
            capture_threshold: 85,
            max_local_attempts: 2,
            max_remote_attempts: 2,
        }
    }
}

fn default_backends() -> Vec<BackendEntry> {
    vec![
        BackendEntry {
            id: "local-qwen".to_string(),
            provider: ProviderKind::Ollama,
            model: "qwen2.5-coder:7b".to_string(),
            max_input_tokens: 8192,
            cost: CostClass::Free,
        },
        BackendEntry {
            id: "remote-claude".to_string(),
            provider: ProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            max_input_tokens: 16384,
            cost: CostClass::Premium,
        },
        BackendEntry {
            id: "remote-gpt".to_string(),
            provider: ProviderKind::Openai,
            model: "gpt-4o".to_string(),
            max_input_tokens: 16384,
            cost: CostClass::Standard,
        },
    ]
}

fn default_policies() -> HashMap<String, PolicySettings> {
    ArtifactKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), PolicySettings::default()))
        .collect()
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("artifact-relay")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path; a missing file yields defaults
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("ARTIFACT_RELAY_LOCAL_URL") {
            self.local.url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.remote.openai.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.remote.anthropic.api_key = Some(key);
        }
        if let Ok(dir) = std::env::var("ARTIFACT_RELAY_CAPTURE_DIR") {
            self.capture.dir = PathBuf::from(dir);
        }
        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration: every policy must parse, reference known
    /// backend ids, keep its thresholds ordered, and name at least one
    /// candidate in some tier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy_table().map(|_| ())
    }

    /// Materialize the immutable policy table.
    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        if self.policies.is_empty() {
            return Err(ConfigError::MissingRequired(
                "at least one [policies.<kind>] section".to_string(),
            ));
        }

        let by_id: HashMap<&str, &BackendEntry> =
            self.backends.iter().map(|b| (b.id.as_str(), b)).collect();

        let mut policies = Vec::with_capacity(self.policies.len());
        for (name, settings) in &self.policies {
            let artifact = ArtifactKind::from_str(name)
                .map_err(|e| ConfigError::InvalidPolicy(e.to_string()))?;

            let resolve = |ids: &[String], tier: BackendTier| -> Result<Vec<BackendCandidate>, ConfigError> {
                ids.iter()
                    .map(|id| {
                        let entry = by_id.get(id.as_str()).ok_or_else(|| {
                            ConfigError::InvalidPolicy(format!(
                                "policy '{name}' references unknown backend '{id}'"
                            ))
                        })?;
                        if entry.provider.tier() != tier {
                            return Err(ConfigError::InvalidPolicy(format!(
                                "policy '{name}' lists '{id}' in the {tier} tier, but its provider is {}",
                                entry.provider.tier()
                            )));
                        }
                        Ok(entry.candidate())
                    })
                    .collect()
            };

            let local = resolve(&settings.local, BackendTier::Local)?;
            let remote = resolve(&settings.remote, BackendTier::Remote)?;
            if local.is_empty() && remote.is_empty() {
                return Err(ConfigError::InvalidPolicy(format!(
                    "policy '{name}' has no candidates in either tier"
                )));
            }

            policies.push(ArtifactPolicy {
                artifact,
                local,
                remote,
                pass_threshold: settings.pass_threshold,
                capture_threshold: settings.capture_threshold,
                max_local_attempts: settings.max_local_attempts,
                max_remote_attempts: settings.max_remote_attempts,
            });
        }

        PolicyTable::new(policies).map_err(|e| ConfigError::InvalidPolicy(e.to_string()))
    }

    /// Construct the backend transports for every candidate table entry.
    pub fn build_backends(&self) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        for entry in &self.backends {
            let backend: Arc<dyn Backend> = match entry.provider {
                ProviderKind::Ollama => Arc::new(OllamaBackend::new(
                    &entry.id,
                    OllamaConfig {
                        base_url: self.local.url.clone(),
                        model: entry.model.clone(),
                        temperature: self.local.temperature,
                    },
                )),
                ProviderKind::Openai => Arc::new(OpenAiBackend::new(
                    &entry.id,
                    remote_config(&self.remote.openai, RemoteConfig::openai_defaults(), entry),
                )),
                ProviderKind::Anthropic => Arc::new(AnthropicBackend::new(
                    &entry.id,
                    remote_config(
                        &self.remote.anthropic,
                        RemoteConfig::anthropic_defaults(),
                        entry,
                    ),
                )),
            };
            registry.insert(entry.id.clone(), backend);
        }
        registry
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

fn remote_config(
    settings: &ProviderSettings,
    defaults: RemoteConfig,
    entry: &BackendEntry,
) -> RemoteConfig {
    RemoteConfig {
        api_key: settings.api_key.clone().unwrap_or_default(),
        base_url: if settings.base_url.is_empty() {
            defaults.base_url
        } else {
            settings.base_url.clone()
        },
        model: entry.model.clone(),
        temperature: settings.temperature,
    }
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn local_url(mut self, url: impl Into<String>) -> Self {
        self.config.local.url = url.into();
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.openai.api_key = Some(key.into());
        self
    }

    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.anthropic.api_key = Some(key.into());
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.capture.dir = dir.into();
        self
    }

    pub fn capture_enabled(mut self, enabled: bool) -> Self {
        self.config.capture.enabled = enabled;
        self
    }

    /// Replace the candidate table.
    pub fn backends(mut self, backends: Vec<BackendEntry>) -> Self {
        self.config.backends = backends;
        self
    }

    /// Register or replace one artifact policy.
    pub fn policy(mut self, kind: ArtifactKind, settings: PolicySettings) -> Self {
        self.config.policies.insert(kind.to_string(), settings);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
