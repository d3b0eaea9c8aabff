//! Backend availability cache
//!
//! Memoizes health probes for a short TTL so a burst of requests does not
//! stack redundant probe traffic on one backend. Concurrent callers asking
//! about the same backend collapse into a single in-flight probe; the rest
//! wait and reuse its result. A probe failure or timeout is cached as
//! unavailable for the same window — callers cannot tell "never checked"
//! from "checked and down", both read as `false` until the window rolls.

use crate::backend::Backend;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Default memoization window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Default budget for one real probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    available: bool,
    checked_at: Instant,
}

/// TTL-memoized availability checks, shared by every in-flight request.
///
/// Constructed once and injected into the orchestrator; never persisted
/// across process restarts.
pub struct HealthCache {
    ttl: Duration,
    probe_timeout: Duration,
    entries: RwLock<HashMap<String, HealthEntry>>,
    /// Per-backend guards so concurrent cache misses run one probe
    probes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HealthCache {
    pub fn new(ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            ttl,
            probe_timeout,
            entries: RwLock::new(HashMap::new()),
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Cached availability for `backend`, probing at most once per TTL window.
    pub async fn is_available(&self, backend: &dyn Backend) -> bool {
        let id = backend.id();

        if let Some(cached) = self.lookup(id).await {
            return cached;
        }

        let guard = self.probe_guard(id).await;
        let _held = guard.lock().await;

        // another waiter may have finished the probe while we queued
        if let Some(cached) = self.lookup(id).await {
            return cached;
        }

        let available =
            match tokio::time::timeout(self.probe_timeout, backend.health_check()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(backend = id, "health probe timed out");
                    false
                }
            };

        debug!(backend = id, available, "health probe completed");
        self.store(id, available).await;
        available
    }

    /// Force a backend unavailable for the remainder of the TTL window.
    ///
    /// Used when a call fails with an auth or quota error: every request,
    /// not just the one that hit the error, should skip the backend until
    /// the window rolls.
    pub async fn mark_unavailable(&self, backend_id: &str) {
        warn!(backend = backend_id, "marked unavailable for the TTL window");
        self.store(backend_id, false).await;
    }

    async fn lookup(&self, id: &str) -> Option<bool> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.available)
    }

    async fn store(&self, id: &str, available: bool) {
        let mut entries = self.entries.write().await;
        entries.insert(
            id.to_string(),
            HealthEntry {
                available,
                checked_at: Instant::now(),
            },
        );
    }

    async fn probe_guard(&self, id: &str) -> Arc<Mutex<()>> {
        let mut probes = self.probes.lock().await;
        probes
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for HealthCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_PROBE_TIMEOUT)
    }
}
