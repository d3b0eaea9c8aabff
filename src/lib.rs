//! artifact-relay - Quality-gated artifact generation over tiered model backends
//!
//! This library routes generation requests for engineering artifacts (entity
//! relationship diagrams, flowcharts, code, issue tickets) across a prioritized
//! set of inference backends, preferring cheap local models and escalating to
//! remote providers only when the local tier cannot produce acceptable output.
//!
//! ## Key Features
//!
//! - **Tiered Fallback**: Local candidates first, remote providers on failure
//! - **Quality Gates**: Structural and topical validation scores every output
//! - **Context Compression**: Fit context bundles into per-backend token budgets
//! - **Local Serialization**: One loaded model at a time, shared across requests
//! - **Fine-Tuning Capture**: High-scoring remote outputs recorded as JSONL

pub mod backend;
pub mod capture;
pub mod compress;
pub mod config;
pub mod health;
pub mod orchestrator;
pub mod policy;
pub mod request;
pub mod validate;

pub use backend::{Backend, BackendCandidate, BackendError, BackendRegistry, BackendTier, CostClass};
pub use capture::{CaptureError, CaptureStore, FineTuningRecord};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use health::HealthCache;
pub use orchestrator::{
    AttemptExecutor, AttemptRecord, Disposition, FailureKind, LocalGate, OrchestrationError,
    OrchestrationResult, Orchestrator, OrchestratorConfig, ValidationReport,
};
pub use policy::{ArtifactKind, ArtifactPolicy, PolicyError, PolicyTable};
pub use request::{ContextSegment, GenerationRequest, SegmentOrigin};
pub use validate::{Finding, Severity, ValidationResult, Validator, ValidatorConfig};
