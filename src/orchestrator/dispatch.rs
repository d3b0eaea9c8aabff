//! Remote-tier fallback dispatch
//!
//! Walks the remote candidates strictly in priority order and stops at the
//! first output that passes validation; a higher-priority pass is final
//! even if a cheaper candidate later might have scored better. Auth and
//! quota failures black the candidate out in the shared health cache so
//! every request within the TTL window skips it.

use super::{Attempt, AttemptRecord, Disposition, FailureKind, Orchestrator};
use crate::backend::BackendTier;
use crate::compress;
use crate::policy::ArtifactPolicy;
use crate::request::GenerationRequest;
use crate::validate::ValidationResult;
use tracing::{debug, info, warn};

/// A remote output that cleared the pass bar.
pub(super) struct RemoteSuccess {
    pub backend_id: String,
    pub output: String,
    pub validation: ValidationResult,
}

impl Orchestrator {
    pub(super) async fn dispatch_remote(
        &self,
        policy: &ArtifactPolicy,
        request: &GenerationRequest,
        trail: &mut Vec<AttemptRecord>,
    ) -> Option<RemoteSuccess> {
        let system = request.artifact.system_prompt();
        let mut attempts = 0;

        for candidate in &policy.remote {
            if attempts >= policy.max_remote_attempts {
                debug!(artifact = %request.artifact, "remote attempt cap reached");
                break;
            }
            let Some(backend) = self.backends.get(&candidate.id) else {
                warn!(candidate = %candidate.id, "candidate missing from registry");
                continue;
            };
            if !self.health.is_available(backend.as_ref()).await {
                debug!(candidate = %candidate.id, "skipping unavailable remote candidate");
                continue;
            }

            attempts += 1;
            // each candidate gets the bundle compressed to its own budget
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
                    self.config.remote_timeout,
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
                        tier: BackendTier::Remote,
                        disposition: if passed {
                            Disposition::Passed { score }
                        } else {
                            Disposition::ValidationFailed { score }
                        },
                        elapsed_ms: elapsed.as_millis() as u64,
                        input_tokens,
                        retried,
                    });

                    if passed {
                        info!(
                            artifact = %request.artifact,
                            winner = %candidate.id,
                            score,
                            "remote candidate passed"
                        );
                        return Some(RemoteSuccess {
                            backend_id: candidate.id.clone(),
                            output,
                            validation,
                        });
                    }
                    warn!(
                        candidate = %candidate.id,
                        score,
                        threshold = policy.pass_threshold,
                        "remote output failed validation"
                    );
                }
                Err(failure) => {
                    if failure == FailureKind::AuthOrQuota {
                        // blackout is cache-wide: concurrent and future
                        // requests within the TTL window skip this candidate
                        self.health.mark_unavailable(&candidate.id).await;
                    }
                    trail.push(AttemptRecord {
                        backend_id: candidate.id.clone(),
                        tier: BackendTier::Remote,
                        disposition: Disposition::Failed { failure },
                        elapsed_ms: elapsed.as_millis() as u64,
                        input_tokens,
                        retried,
                    });
                }
            }
        }

        None
    }
}
