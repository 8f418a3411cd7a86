//! Distributed endpoint gate (C2): paces upstream HTTP calls to at most one
//! successful acquisition per endpoint per second, across every gateway
//! process sharing the coordination store.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};
use vortex_types::GateConfig;

use crate::store::{LocalStore, SharedStore, StoreError};

/// Result of attempting to acquire the gate for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// This caller won the acquisition for the current window; it should
    /// make the upstream call.
    Acquired,
    /// Another caller already acquired this endpoint's window; the caller
    /// should wait for the in-flight result rather than calling upstream
    /// again.
    AlreadyHeld,
}

/// Paces calls to a named upstream endpoint to at most one success per
/// second across every process sharing the coordination store.
///
/// When the coordination store is unreachable at acquire time, the gate
/// degrades to an in-process `LocalStore`: cross-process pacing accuracy is
/// lost, but the gate keeps functioning rather than blocking every caller
/// (see `DESIGN.md`, Open Question (b)).
pub struct EndpointGate {
    store: Arc<dyn SharedStore>,
    local_fallback: Arc<LocalStore>,
    config: GateConfig,
}

impl EndpointGate {
    /// Construct a gate backed by `store`, with a private `LocalStore` used
    /// whenever `store` reports itself unreachable.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: GateConfig) -> Self {
        Self {
            store,
            local_fallback: Arc::new(LocalStore::new()),
            config,
        }
    }

    /// Construct a gate that only ever uses the in-process fallback, for
    /// tests and single-process deployments.
    #[must_use]
    pub fn local_only(config: GateConfig) -> Self {
        let local = Arc::new(LocalStore::new());
        Self {
            store: local.clone(),
            local_fallback: local,
            config,
        }
    }

    /// Attempt to acquire the gate for `endpoint`. Returns `Acquired` at
    /// most once per `config.interval` window across every process sharing
    /// the coordination store; all other callers within that window get
    /// `AlreadyHeld`.
    pub async fn acquire(&self, endpoint: &str) -> GateOutcome {
        let key = format!("rate:gate:{endpoint}");
        let jitter = self.jitter();
        let ttl = self.config.interval + jitter;

        let count = match self.store.incr_and_get(&key, ttl).await {
            Ok(count) => count,
            Err(StoreError::Unreachable(_reason)) => {
                #[cfg(feature = "tracing")]
                warn!(
                    target = "vortex::middleware::gate",
                    endpoint, error = %_reason, "coordination store unreachable, degrading to local gate"
                );
                self.local_fallback
                    .incr_and_get(&key, ttl)
                    .await
                    .unwrap_or(1)
            }
        };

        if count == 1 {
            #[cfg(feature = "tracing")]
            debug!(target = "vortex::middleware::gate", endpoint, "gate acquired");
            GateOutcome::Acquired
        } else {
            GateOutcome::AlreadyHeld
        }
    }

    /// Push `endpoint`'s current window further into the future, e.g. after
    /// the upstream answers a call this gate already admitted with a 429.
    /// Degrades to the local fallback on the same terms as `acquire`.
    pub async fn extend(&self, endpoint: &str, extra: Duration) {
        let key = format!("rate:gate:{endpoint}");
        if let Err(StoreError::Unreachable(_reason)) = self.store.expire(&key, extra).await {
            #[cfg(feature = "tracing")]
            warn!(
                target = "vortex::middleware::gate",
                endpoint, error = %_reason, "coordination store unreachable, extending local gate instead"
            );
            let _ = self.local_fallback.expire(&key, extra).await;
        }
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::rng().random_range(0..=self.config.jitter_ms);
        Duration::from_millis(u64::from(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GateConfig {
        GateConfig {
            interval: Duration::from_millis(50),
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn only_one_acquisition_succeeds_per_window() {
        let gate = EndpointGate::local_only(config());
        assert_eq!(gate.acquire("quotes").await, GateOutcome::Acquired);
        assert_eq!(gate.acquire("quotes").await, GateOutcome::AlreadyHeld);
        assert_eq!(gate.acquire("quotes").await, GateOutcome::AlreadyHeld);
    }

    #[tokio::test]
    async fn windows_are_independent_per_endpoint() {
        let gate = EndpointGate::local_only(config());
        assert_eq!(gate.acquire("quotes").await, GateOutcome::Acquired);
        assert_eq!(gate.acquire("history").await, GateOutcome::Acquired);
    }

    #[tokio::test]
    async fn acquisition_reopens_after_the_window_elapses() {
        let gate = EndpointGate::local_only(config());
        assert_eq!(gate.acquire("quotes").await, GateOutcome::Acquired);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(gate.acquire("quotes").await, GateOutcome::Acquired);
    }

    #[tokio::test]
    async fn extend_holds_the_window_open_past_its_normal_interval() {
        let gate = EndpointGate::local_only(config());
        assert_eq!(gate.acquire("quotes").await, GateOutcome::Acquired);
        gate.extend("quotes", Duration::from_millis(200)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            gate.acquire("quotes").await,
            GateOutcome::AlreadyHeld,
            "extend must outlast the gate's normal 50ms interval"
        );
    }
}
