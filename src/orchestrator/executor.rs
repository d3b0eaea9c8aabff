//! Single-attempt execution
//!
//! One executor run is one unit in the attempt trail: it wraps the backend
//! round-trip in a timeout, folds transport errors into the small failure
//! taxonomy, and retries a transient failure exactly once on the same
//! backend. Local backends additionally pass through the process-wide
//! model gate so two models never load into the shared runtime at once.

use crate::backend::{Backend, BackendError, BackendTier};
use crate::compress::estimate_tokens;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, warn};

/// Normalized failure taxonomy for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend unreachable; skip this candidate for the rest of the call
    Unavailable,
    /// Auth or quota failure; the candidate is blacked out for the TTL window
    AuthOrQuota,
    /// Timeout or server-side error; one immediate same-backend retry
    Transient,
    /// Empty or visibly cut-off output; a failed attempt, no retry
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Unavailable => write!(f, "unavailable"),
            FailureKind::AuthOrQuota => write!(f, "auth or quota exceeded"),
            FailureKind::Transient => write!(f, "transient failure"),
            FailureKind::Malformed => write!(f, "malformed output"),
        }
    }
}

/// Product of one executor run, retry included.
#[derive(Debug)]
pub struct Attempt {
    pub backend_id: String,
    pub outcome: Result<String, FailureKind>,
    pub elapsed: Duration,
    pub input_tokens: u32,
    pub retried: bool,
}

fn normalize(error: &BackendError) -> FailureKind {
    match error {
        BackendError::Unreachable(_) => FailureKind::Unavailable,
        BackendError::Auth(_) | BackendError::Quota(_) => FailureKind::AuthOrQuota,
        BackendError::RateLimited { .. } => FailureKind::Transient,
        BackendError::Provider { status, .. } if (500..600).contains(status) => {
            FailureKind::Transient
        }
        BackendError::Http(e) if e.is_timeout() => FailureKind::Transient,
        _ => FailureKind::Malformed,
    }
}

/// Empty output, or an odd number of code fences (the tail was cut off).
fn is_malformed(text: &str) -> bool {
    text.trim().is_empty() || text.matches("```").count() % 2 == 1
}

/// Process-wide exclusive-load token for the local runtime.
///
/// The runtime serves one loaded model at a time. Calls against the model
/// already loaded share the gate read-side; switching models takes the
/// write side, waiting out in-flight calls, then downgrades so the
/// switcher's own inference runs under a read guard. Guards release on
/// drop, so a cancelled attempt cannot strand the gate.
#[derive(Default)]
pub struct LocalGate {
    loaded: RwLock<Option<String>>,
}

pub struct GateGuard<'a> {
    _slot: RwLockReadGuard<'a, Option<String>>,
}

impl LocalGate {
    /// Hold the gate for a call against `model`, waiting at most `limit`
    /// for any in-flight calls on a different model to drain.
    pub async fn acquire(
        &self,
        model: &str,
        limit: Duration,
    ) -> Result<GateGuard<'_>, FailureKind> {
        match tokio::time::timeout(limit, self.acquire_inner(model)).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(model, "gave up waiting for the local model gate");
                Err(FailureKind::Transient)
            }
        }
    }

    async fn acquire_inner(&self, model: &str) -> GateGuard<'_> {
        {
            let slot = self.loaded.read().await;
            if slot.as_deref() == Some(model) {
                return GateGuard { _slot: slot };
            }
        }

        let mut slot = self.loaded.write().await;
        // a concurrent switcher may have loaded it while we queued
        if slot.as_deref() != Some(model) {
            debug!(model, "switching loaded local model");
            *slot = Some(model.to_string());
        }
        GateGuard {
            _slot: slot.downgrade(),
        }
    }
}

/// Runs one backend call under a timeout and the local gate.
pub struct AttemptExecutor {
    gate: Arc<LocalGate>,
    gate_timeout: Duration,
}

impl AttemptExecutor {
    pub fn new(gate: Arc<LocalGate>, gate_timeout: Duration) -> Self {
        Self { gate, gate_timeout }
    }

    pub async fn run(
        &self,
        backend: &dyn Backend,
        prompt: &str,
        system: &str,
        max_tokens: u32,
        limit: Duration,
    ) -> Attempt {
        let input_tokens = estimate_tokens(prompt) + estimate_tokens(system);
        let started = Instant::now();

        let _gate = if backend.tier() == BackendTier::Local {
            match self.gate.acquire(backend.model_name(), self.gate_timeout).await {
                Ok(guard) => Some(guard),
                Err(kind) => {
                    return Attempt {
                        backend_id: backend.id().to_string(),
                        outcome: Err(kind),
                        elapsed: started.elapsed(),
                        input_tokens,
                        retried: false,
                    };
                }
            }
        } else {
            None
        };

        let mut retried = false;
        let mut outcome = call_once(backend, prompt, system, max_tokens, limit).await;

        if outcome == Err(FailureKind::Transient) {
            warn!(backend = backend.id(), "transient failure, retrying once");
            retried = true;
            outcome = call_once(backend, prompt, system, max_tokens, limit).await;
        }

        Attempt {
            backend_id: backend.id().to_string(),
            outcome,
            elapsed: started.elapsed(),
            input_tokens,
            retried,
        }
    }
}

async fn call_once(
    backend: &dyn Backend,
    prompt: &str,
    system: &str,
    max_tokens: u32,
    limit: Duration,
) -> Result<String, FailureKind> {
    match tokio::time::timeout(limit, backend.complete(prompt, system, max_tokens)).await {
        Ok(Ok(text)) => {
            if is_malformed(&text) {
                warn!(backend = backend.id(), "empty or truncated output");
                Err(FailureKind::Malformed)
            } else {
                Ok(text)
            }
        }
        Ok(Err(error)) => {
            let kind = normalize(&error);
            warn!(backend = backend.id(), %error, "attempt failed: {kind}");
            Err(kind)
        }
        Err(_) => {
            warn!(backend = backend.id(), timeout = ?limit, "attempt timed out");
            Err(FailureKind::Transient)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{CallSpan, MockBackend};
    use std::sync::Mutex;

    fn executor() -> AttemptExecutor {
        AttemptExecutor::new(Arc::new(LocalGate::default()), Duration::from_secs(5))
    }

    async fn run(executor: &AttemptExecutor, backend: &MockBackend) -> Attempt {
        executor
            .run(backend, "prompt", "system", 256, Duration::from_secs(1))
            .await
    }

    #[tokio::test]
    async fn test_transient_failure_retried_exactly_once() {
        let backend = MockBackend::remote("remote-a", "m1", "fine output").script(Err(
            BackendError::Provider {
                status: 500,
                message: "overloaded".to_string(),
            },
        ));

        let attempt = run(&executor(), &backend).await;

        assert_eq!(attempt.outcome, Ok("fine output".to_string()));
        assert!(attempt.retried);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let backend = MockBackend::remote("remote-a", "m1", "out")
            .script(Err(BackendError::Auth("bad key".to_string())));

        let attempt = run(&executor(), &backend).await;

        assert_eq!(attempt.outcome, Err(FailureKind::AuthOrQuota));
        assert!(!attempt.retried);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_quota_maps_to_auth_or_quota() {
        let backend = MockBackend::remote("remote-a", "m1", "out")
            .script(Err(BackendError::Quota("balance empty".to_string())));

        let attempt = run(&executor(), &backend).await;
        assert_eq!(attempt.outcome, Err(FailureKind::AuthOrQuota));
    }

    #[tokio::test]
    async fn test_empty_output_is_malformed_without_retry() {
        let backend = MockBackend::local("local-a", "m1", "   \n");

        let attempt = run(&executor(), &backend).await;

        assert_eq!(attempt.outcome, Err(FailureKind::Malformed));
        assert!(!attempt.retried);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_unclosed_fence_is_malformed() {
        let backend = MockBackend::local("local-a", "m1", "```mermaid\nerDiagram\n");

        let attempt = run(&executor(), &backend).await;
        assert_eq!(attempt.outcome, Err(FailureKind::Malformed));
    }

    #[tokio::test]
    async fn test_timeout_is_transient_and_retried() {
        let backend =
            MockBackend::remote("remote-a", "m1", "out").with_delay(Duration::from_millis(200));
        let executor = executor();

        let attempt = executor
            .run(&backend, "prompt", "system", 256, Duration::from_millis(20))
            .await;

        assert_eq!(attempt.outcome, Err(FailureKind::Transient));
        assert!(attempt.retried);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_input_tokens_estimated_from_prompt_and_system() {
        let backend = MockBackend::remote("remote-a", "m1", "out");

        let attempt = executor()
            .run(&backend, "abcdabcd", "abcd", 256, Duration::from_secs(1))
            .await;

        assert_eq!(attempt.input_tokens, 3);
    }

    #[tokio::test]
    async fn test_gate_never_runs_two_models_concurrently() {
        let log: Arc<Mutex<Vec<CallSpan>>> = Arc::new(Mutex::new(Vec::new()));
        let m1 = Arc::new(
            MockBackend::local("local-a", "m1", "out")
                .with_delay(Duration::from_millis(60))
                .with_call_log(Arc::clone(&log)),
        );
        let m2 = Arc::new(
            MockBackend::local("local-b", "m2", "out")
                .with_delay(Duration::from_millis(60))
                .with_call_log(Arc::clone(&log)),
        );
        let executor = Arc::new(executor());

        let first = tokio::spawn({
            let executor = Arc::clone(&executor);
            let m1 = Arc::clone(&m1);
            async move {
                executor
                    .run(m1.as_ref(), "p", "s", 256, Duration::from_secs(1))
                    .await
            }
        });
        let second = tokio::spawn({
            let executor = Arc::clone(&executor);
            let m2 = Arc::clone(&m2);
            async move {
                executor
                    .run(m2.as_ref(), "p", "s", 256, Duration::from_secs(1))
                    .await
            }
        });

        assert!(first.await.unwrap().outcome.is_ok());
        assert!(second.await.unwrap().outcome.is_ok());

        let spans = log.lock().unwrap();
        assert_eq!(spans.len(), 2);
        let (earlier, later) = if spans[0].started <= spans[1].started {
            (&spans[0], &spans[1])
        } else {
            (&spans[1], &spans[0])
        };
        assert_ne!(earlier.model, later.model);
        assert!(earlier.ended <= later.started);
    }

    #[tokio::test]
    async fn test_gate_timeout_fails_transient_without_calling_backend() {
        let gate = Arc::new(LocalGate::default());
        let holder = MockBackend::local("local-a", "m1", "out")
            .with_delay(Duration::from_millis(300));
        let blocked = MockBackend::local("local-b", "m2", "out");

        let slow = AttemptExecutor::new(Arc::clone(&gate), Duration::from_secs(5));
        let impatient = AttemptExecutor::new(Arc::clone(&gate), Duration::from_millis(20));

        let holding = tokio::spawn(async move {
            slow.run(&holder, "p", "s", 256, Duration::from_secs(1)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let attempt = impatient
            .run(&blocked, "p", "s", 256, Duration::from_secs(1))
            .await;

        assert_eq!(attempt.outcome, Err(FailureKind::Transient));
        assert!(!attempt.retried);
        assert_eq!(blocked.calls(), 0);
        holding.await.unwrap();
    }
}
