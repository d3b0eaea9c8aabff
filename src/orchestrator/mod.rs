//! The generation state machine
//!
//! One request walks SELECT_POLICY → TRY_LOCAL → TRY_REMOTE → terminal.
//! Local candidates are tried in policy order first; a validated pass ends
//! the run. When the local tier is exhausted (or skipped by `force_remote`)
//! the remote tier is dispatched, and a remote pass that clears the capture
//! bar is additionally persisted as a fine-tuning example. Every attempt,
//! failed or not, lands in the result's trail; only configuration problems
//! surface as errors to the caller.

mod dispatch;
mod executor;

pub use executor::{Attempt, AttemptExecutor, FailureKind, LocalGate};

use crate::backend::{BackendRegistry, BackendTier};
use crate::capture::{CaptureStore, FineTuningRecord};
use crate::compress;
use crate::health::HealthCache;
use crate::policy::{ArtifactKind, PolicyError, PolicyTable};
use crate::request::GenerationRequest;
use crate::validate::{Finding, ValidationResult, Validator};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How much of the instruction a capture record keeps.
const SUMMARY_LEN: usize = 200;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("no backends configured for artifact type '{0}'")]
    NoCandidates(ArtifactKind),

    #[error("policy references unregistered backend '{0}'")]
    UnknownBackend(String),
}

/// Timeouts and output budget shared by every request.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub local_timeout: Duration,
    pub remote_timeout: Duration,
    pub gate_timeout: Duration,
    pub max_output_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            local_timeout: Duration::from_secs(60),
            remote_timeout: Duration::from_secs(20),
            gate_timeout: Duration::from_secs(90),
            max_output_tokens: 4096,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Disposition {
    Passed { score: u8 },
    ValidationFailed { score: u8 },
    Failed { failure: FailureKind },
}

/// One entry in the attempt trail. Output text is not retained here.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub backend_id: String,
    pub tier: BackendTier,
    pub disposition: Disposition,
    pub elapsed_ms: u64,
    pub input_tokens: u32,
    pub retried: bool,
}

/// The single authoritative answer for one request.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub artifact: ArtifactKind,
    pub output: Option<String>,
    pub validation: Option<ValidationResult>,
    /// Backend that produced the accepted output
    pub winner: Option<String>,
    pub tier: Option<BackendTier>,
    pub used_remote: bool,
    pub captured: bool,
    pub trail: Vec<AttemptRecord>,
}

impl OrchestrationResult {
    pub fn succeeded(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.pass)
    }

    /// Flat summary for the presentation layer.
    pub fn report(&self) -> ValidationReport {
        let (score, pass, findings) = match &self.validation {
            Some(v) => (v.score, v.pass, v.findings.clone()),
            None => (0, false, Vec::new()),
        };
        ValidationReport {
            score,
            pass,
            findings,
            attempts_tried: self.trail.len(),
        }
    }
}

/// Pass/fail explanation consumable without re-deriving anything.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub score: u8,
    pub pass: bool,
    pub findings: Vec<Finding>,
    pub attempts_tried: usize,
}

/// Composes selector, health cache, compressor, executor, validator,
/// dispatcher and capture store into the per-request state machine.
///
/// All collaborators are injected at construction; concurrent requests
/// share only the health cache and the local model gate.
pub struct Orchestrator {
    config: OrchestratorConfig,
    policies: PolicyTable,
    backends: BackendRegistry,
    health: Arc<HealthCache>,
    executor: AttemptExecutor,
    validator: Validator,
    capture: Option<CaptureStore>,
}

impl Orchestrator {
    /// Wire up the machine, rejecting policies that reference backends the
    /// registry does not hold.
    pub fn new(
        config: OrchestratorConfig,
        policies: PolicyTable,
        backends: BackendRegistry,
        health: Arc<HealthCache>,
        validator: Validator,
        capture: Option<CaptureStore>,
    ) -> Result<Self, OrchestrationError> {
        for kind in policies.kinds() {
            let policy = policies.policy_for(kind)?;
            for candidate in policy.local.iter().chain(policy.remote.iter()) {
                if !backends.contains_key(&candidate.id) {
                    return Err(OrchestrationError::UnknownBackend(candidate.id.clone()));
                }
            }
        }

        let executor = AttemptExecutor::new(Arc::new(LocalGate::default()), config.gate_timeout);
        Ok(Self {
            config,
            policies,
            backends,
            health,
            executor,
            validator,
            capture,
        })
    }

    /// Run the state machine for one request.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let policy = self.policies.policy_for(request.artifact)?;
        if policy.local.is_empty() && policy.remote.is_empty() {
            return Err(OrchestrationError::NoCandidates(request.artifact));
        }

        let system = request.artifact.system_prompt();
        let mut trail: Vec<AttemptRecord> = Vec::new();
        let mut last_validation: Option<ValidationResult> = None;

        if request.force_remote {
            info!(artifact = %request.artifact, "force-remote set, skipping local tier");
        } else {
            info!(
                artifact = %request.artifact,
                candidates = policy.local.len(),
                "trying local tier"
            );

            let mut attempts = 0;
            for candidate in &policy.local {
                if attempts >= policy.max_local_attempts {
                    debug!(artifact = %request.artifact, "local attempt cap reached");
                    break;
                }
                let Some(backend) = self.backends.get(&candidate.id) else {
                    warn!(candidate = %candidate.id, "candidate missing from registry");
                    continue;
                };
                if !self.health.is_available(backend.as_ref()).await {
                    debug!(candidate = %candidate.id, "skipping unavailable local candidate");
                    continue;
                }

                attempts += 1;
                let bundle = compress::compress(&request.context, candidate.max_input_tokens as u32);
                let prompt = request.render_prompt(&bundle);

                let Attempt {
                    outcome,
                    elapsed,
                    input_tokens,
                    retried,
                    ..
                } = self
                    .executor
                    .run(
                        backend.as_ref(),
                        &prompt,
                        system,
                        self.config.max_output_tokens,
                        self.config.local_timeout,
                    )
                    .await;

                match outcome {
                    Ok(output) => {
                        let validation = self.validator.validate(
                            request.artifact,
                            &output,
                            &request.instruction,
                            policy.pass_threshold,
                        );
                        let passed = validation.pass;
                        let score = validation.score;
                        trail.push(AttemptRecord {
                            backend_id: candidate.id.clone(),
                            tier: BackendTier::Local,
                            disposition: if passed {
                                Disposition::Passed { score }
                            } else {
                                Disposition::ValidationFailed { score }
                            },
                            elapsed_ms: elapsed.as_millis() as u64,
                            input_tokens,
                            retried,
                        });
                        last_validation = Some(validation.clone());

                        if passed {
                            info!(
                                artifact = %request.artifact,
                                winner = %candidate.id,
                                score,
                                "local candidate passed"
                            );
                            return Ok(OrchestrationResult {
                                artifact: request.artifact,
                                output: Some(output),
                                validation: Some(validation),
                                winner: Some(candidate.id.clone()),
                                tier: Some(BackendTier::Local),
                                used_remote: false,
                                captured: false,
                                trail,
                            });
                        }
                        warn!(
                            candidate = %candidate.id,
                            score,
                            threshold = policy.pass_threshold,
                            "local output failed validation"
                        );
                    }
                    Err(failure) => {
                        if failure == FailureKind::AuthOrQuota {
                            self.health.mark_unavailable(&candidate.id).await;
                        }
                        trail.push(AttemptRecord {
                            backend_id: candidate.id.clone(),
                            tier: BackendTier::Local,
                            disposition: Disposition::Failed { failure },
                            elapsed_ms: elapsed.as_millis() as u64,
                            input_tokens,
                            retried,
                        });
                    }
                }
            }
        }

        info!(
            artifact = %request.artifact,
            candidates = policy.remote.len(),
            "local tier exhausted, trying remote tier"
        );

        match self.dispatch_remote(policy, request, &mut trail).await {
            Some(success) => {
                let captured = if success.validation.score >= policy.capture_threshold {
                    self.try_capture(request, &success).await
                } else {
                    debug!(
                        score = success.validation.score,
                        bar = policy.capture_threshold,
                        "remote pass below the capture bar"
                    );
                    false
                };
                Ok(OrchestrationResult {
                    artifact: request.artifact,
                    output: Some(success.output),
                    validation: Some(success.validation),
                    winner: Some(success.backend_id),
                    tier: Some(BackendTier::Remote),
                    used_remote: true,
                    captured,
                    trail,
                })
            }
            None => {
                warn!(
                    artifact = %request.artifact,
                    attempts = trail.len(),
                    "all candidates exhausted without a passing output"
                );
                let used_remote = trail.iter().any(|r| r.tier == BackendTier::Remote);
                Ok(OrchestrationResult {
                    artifact: request.artifact,
                    output: None,
                    validation: last_validation,
                    winner: None,
                    tier: None,
                    used_remote,
                    captured: false,
                    trail,
                })
            }
        }
    }

    /// Best-effort capture append; an IO error never fails the request.
    async fn try_capture(
        &self,
        request: &GenerationRequest,
        success: &dispatch::RemoteSuccess,
    ) -> bool {
        let Some(store) = &self.capture else {
            return false;
        };

        let record = FineTuningRecord {
            timestamp: Utc::now(),
            artifact: request.artifact,
            prompt_summary: request.summary(SUMMARY_LEN),
            output: success.output.clone(),
            score: success.validation.score,
            backend_id: success.backend_id.clone(),
        };

        match store.append(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to append fine-tuning record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{Backend, BackendCandidate, BackendError, CostClass};
    use crate::policy::ArtifactPolicy;
    use tempfile::TempDir;

    // scores 100 for intent "phone swap request"
    const TOPICAL_ERD: &str = "\
erDiagram
    SWAP_REQUEST {
        int id
        string status
    }
    PHONE {
        int id
        string model
    }
    REQUESTER ||--o{ SWAP_REQUEST : opens
    SWAP_REQUEST ||--|| PHONE : covers
";

    // no relationships: scores 85, passes at 70 but misses a 90 capture bar
    const PARTIAL_ERD: &str = "\
erDiagram
    SWAP_REQUEST {
        int id
    }
    PHONE {
        string model
    }
";

    // well-formed but about the wrong domain: scores 25
    const GENERIC_ERD: &str = "\
erDiagram
    USER {
        int id
    }
    ORDER {
        int id
    }
    USER ||--o{ ORDER : places
";

    fn candidate(id: &str, tier: BackendTier) -> BackendCandidate {
        BackendCandidate {
            id: id.to_string(),
            tier,
            model: format!("{id}-model"),
            max_input_tokens: 4096,
            cost: CostClass::Budget,
        }
    }

    fn erd_policy(local: &[&str], remote: &[&str]) -> ArtifactPolicy {
        ArtifactPolicy {
            artifact: ArtifactKind::Erd,
            local: local.iter().map(|id| candidate(id, BackendTier::Local)).collect(),
            remote: remote.iter().map(|id| candidate(id, BackendTier::Remote)).collect(),
            pass_threshold: 70,
            capture_threshold: 90,
            max_local_attempts: 4,
            max_remote_attempts: 4,
        }
    }

    fn orchestrator(
        backends: &[Arc<MockBackend>],
        policy: ArtifactPolicy,
        capture: Option<CaptureStore>,
    ) -> Orchestrator {
        let registry: BackendRegistry = backends
            .iter()
            .map(|b| (b.id().to_string(), Arc::clone(b) as Arc<dyn Backend>))
            .collect();
        Orchestrator::new(
            OrchestratorConfig::default(),
            PolicyTable::new(vec![policy]).unwrap(),
            registry,
            Arc::new(HealthCache::default()),
            Validator::default(),
            capture,
        )
        .unwrap()
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(ArtifactKind::Erd, "phone swap request")
    }

    #[tokio::test]
    async fn test_first_local_pass_never_touches_remote() {
        let local = Arc::new(MockBackend::local("local-a", "m1", TOPICAL_ERD));
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(
            &[Arc::clone(&local), Arc::clone(&remote)],
            erd_policy(&["local-a"], &["remote-a"]),
            None,
        );

        let result = orch.generate(&request()).await.unwrap();

        assert!(result.succeeded());
        assert_eq!(result.trail.len(), 1);
        assert_eq!(result.winner.as_deref(), Some("local-a"));
        assert_eq!(result.tier, Some(BackendTier::Local));
        assert!(!result.used_remote);
        assert!(!result.captured);
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_force_remote_skips_local_entirely() {
        let local = Arc::new(MockBackend::local("local-a", "m1", TOPICAL_ERD));
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(
            &[Arc::clone(&local), Arc::clone(&remote)],
            erd_policy(&["local-a"], &["remote-a"]),
            None,
        );

        let result = orch.generate(&request().force_remote()).await.unwrap();

        assert!(result.succeeded());
        assert_eq!(local.calls(), 0);
        assert!(result.trail.iter().all(|r| r.tier == BackendTier::Remote));
        assert!(result.used_remote);
    }

    #[tokio::test]
    async fn test_remote_pass_over_capture_bar_is_persisted() {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(MockBackend::local("local-a", "m1", GENERIC_ERD));
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(
            &[local, Arc::clone(&remote)],
            erd_policy(&["local-a"], &["remote-a"]),
            Some(CaptureStore::new(dir.path())),
        );

        let result = orch.generate(&request()).await.unwrap();

        assert!(result.succeeded());
        assert!(result.used_remote);
        assert!(result.captured);
        assert_eq!(result.winner.as_deref(), Some("remote-a"));
        assert!(result.validation.as_ref().unwrap().score >= 80);
        assert!(matches!(
            result.trail[0].disposition,
            Disposition::ValidationFailed { .. }
        ));

        let records = CaptureStore::new(dir.path())
            .tail(ArtifactKind::Erd, 10)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].backend_id, "remote-a");
    }

    #[tokio::test]
    async fn test_remote_pass_below_capture_bar_succeeds_uncaptured() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", PARTIAL_ERD));
        let orch = orchestrator(
            &[remote],
            erd_policy(&[], &["remote-a"]),
            Some(CaptureStore::new(dir.path())),
        );

        let result = orch.generate(&request()).await.unwrap();

        assert!(result.succeeded());
        assert_eq!(result.validation.as_ref().unwrap().score, 85);
        assert!(!result.captured);
        assert!(CaptureStore::new(dir.path())
            .tail(ArtifactKind::Erd, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_quota_everywhere_exhausts_without_retries() {
        let quota = || Err(BackendError::Quota("empty".to_string()));
        let local = Arc::new(MockBackend::local("local-a", "m1", "out").script(quota()));
        let remote_a = Arc::new(MockBackend::remote("remote-a", "m2", "out").script(quota()));
        let remote_b = Arc::new(MockBackend::remote("remote-b", "m3", "out").script(quota()));
        let orch = orchestrator(
            &[Arc::clone(&local), Arc::clone(&remote_a), Arc::clone(&remote_b)],
            erd_policy(&["local-a"], &["remote-a", "remote-b"]),
            None,
        );

        let result = orch.generate(&request()).await.unwrap();

        assert!(!result.succeeded());
        assert!(result.output.is_none());
        assert_eq!(result.trail.len(), 3);
        for record in &result.trail {
            assert_eq!(
                record.disposition,
                Disposition::Failed {
                    failure: FailureKind::AuthOrQuota
                }
            );
            assert!(!record.retried);
        }
        assert_eq!(local.calls(), 1);
        assert_eq!(remote_a.calls(), 1);
        assert_eq!(remote_b.calls(), 1);
    }

    #[tokio::test]
    async fn test_quota_blackout_shared_across_requests() {
        let remote_a = Arc::new(
            MockBackend::remote("remote-a", "m2", TOPICAL_ERD)
                .script(Err(BackendError::Quota("empty".to_string()))),
        );
        let remote_b = Arc::new(MockBackend::remote("remote-b", "m3", TOPICAL_ERD));
        let orch = orchestrator(
            &[Arc::clone(&remote_a), Arc::clone(&remote_b)],
            erd_policy(&[], &["remote-a", "remote-b"]),
            None,
        );

        let first = orch.generate(&request()).await.unwrap();
        assert_eq!(first.winner.as_deref(), Some("remote-b"));

        // remote-a is blacked out for the TTL window, so the second
        // request skips straight to remote-b
        let second = orch.generate(&request()).await.unwrap();
        assert_eq!(second.winner.as_deref(), Some("remote-b"));
        assert_eq!(remote_a.calls(), 1);
        assert_eq!(second.trail.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_local_skipped_without_attempt() {
        let local = Arc::new(MockBackend::local("local-a", "m1", TOPICAL_ERD).with_health(false));
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(
            &[Arc::clone(&local), remote],
            erd_policy(&["local-a"], &["remote-a"]),
            None,
        );

        let result = orch.generate(&request()).await.unwrap();

        assert!(result.succeeded());
        assert_eq!(local.calls(), 0);
        assert_eq!(result.trail.len(), 1);
        assert_eq!(result.tier, Some(BackendTier::Remote));
    }

    #[tokio::test]
    async fn test_local_attempt_cap_respected() {
        let local_a = Arc::new(MockBackend::local("local-a", "m1", GENERIC_ERD));
        let local_b = Arc::new(MockBackend::local("local-b", "m1", GENERIC_ERD));
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let mut policy = erd_policy(&["local-a", "local-b"], &["remote-a"]);
        policy.max_local_attempts = 1;
        let orch = orchestrator(&[local_a, Arc::clone(&local_b), remote], policy, None);

        let result = orch.generate(&request()).await.unwrap();

        assert!(result.succeeded());
        assert_eq!(local_b.calls(), 0);
        assert_eq!(result.trail.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_artifact_type_is_terminal() {
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(&[remote], erd_policy(&[], &["remote-a"]), None);

        let result = orch
            .generate(&GenerationRequest::new(ArtifactKind::Jira, "write a ticket"))
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::Policy(PolicyError::UnknownArtifactType(
                ArtifactKind::Jira
            )))
        ));
    }

    #[tokio::test]
    async fn test_empty_policy_is_terminal() {
        let remote = Arc::new(MockBackend::remote("remote-a", "m2", TOPICAL_ERD));
        let orch = orchestrator(&[remote], erd_policy(&[], &[]), None);

        let result = orch.generate(&request()).await;
        assert!(matches!(result, Err(OrchestrationError::NoCandidates(_))));
    }

    #[test]
    fn test_unregistered_candidate_rejected_at_construction() {
        let result = Orchestrator::new(
            OrchestratorConfig::default(),
            PolicyTable::new(vec![erd_policy(&["local-a"], &[])]).unwrap(),
            BackendRegistry::new(),
            Arc::new(HealthCache::default()),
            Validator::default(),
            None,
        );
        assert!(matches!(
            result,
            Err(OrchestrationError::UnknownBackend(id)) if id == "local-a"
        ));
    }

    #[tokio::test]
    async fn test_exhausted_result_keeps_last_validation_for_reporting() {
        let local = Arc::new(MockBackend::local("local-a", "m1", GENERIC_ERD));
        let orch = orchestrator(&[local], erd_policy(&["local-a"], &[]), None);

        let result = orch.generate(&request()).await.unwrap();

        assert!(!result.succeeded());
        let report = result.report();
        assert!(!report.pass);
        assert_eq!(report.score, 25);
        assert_eq!(report.attempts_tried, 1);
        assert!(!report.findings.is_empty());
    }
}
