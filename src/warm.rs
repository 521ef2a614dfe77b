//! Warm-session manager.
//!
//! Fires a trivial request to each configured provider at startup to
//! eliminate first-call latency, then re-pings each provider on a fixed
//! interval from its own background task. Warming is best-effort: failures
//! are logged and never propagate. Every ping consumes provider quota; that
//! is an accepted cost.
//!
//! Warm flags are written only by this manager's background tasks and read
//! by the router and execution engine through atomic loads (single-writer,
//! many-reader).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WarmConfig;
use crate::provider::{ProviderError, ProviderId, ProviderPool};

/// Per-provider warmth state.
struct ProviderWarmth {
    is_warm: AtomicBool,
    /// Epoch milliseconds of the last successful ping; 0 means never.
    last_ping_ms: AtomicI64,
    consecutive_failures: AtomicU32,
}

impl ProviderWarmth {
    fn new() -> Self {
        Self {
            is_warm: AtomicBool::new(false),
            last_ping_ms: AtomicI64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }
}

/// Keeps provider sessions warm and exposes per-provider liveness.
///
/// Created once at process start; torn down by aborting all heartbeat
/// tasks. No persisted state.
pub struct WarmSessionManager {
    pool: Arc<ProviderPool>,
    states: HashMap<ProviderId, Arc<ProviderWarmth>>,
    heartbeats: Mutex<Vec<JoinHandle<()>>>,
    config: WarmConfig,
}

impl WarmSessionManager {
    /// Create a manager for every provider registered in the pool.
    pub fn new(pool: Arc<ProviderPool>, config: WarmConfig) -> Arc<Self> {
        let states = pool
            .ids()
            .into_iter()
            .map(|id| (id, Arc::new(ProviderWarmth::new())))
            .collect();

        Arc::new(Self {
            pool,
            states,
            heartbeats: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Warm every configured provider concurrently, then start the
    /// per-provider heartbeat tasks. Never fails; cold providers are
    /// logged and left cold.
    pub async fn start_warming(self: &Arc<Self>) {
        let pings = self
            .pool
            .handles()
            .map(|provider| {
                let provider = provider.clone();
                let manager = self.clone();
                async move {
                    let id = provider.id();
                    let result = provider.warm_ping().await;
                    manager.apply_ping_result(id, result.map_err(|e| e.to_string()));
                }
            })
            .collect::<Vec<_>>();

        futures::future::join_all(pings).await;

        let warm_count = self.warm_providers().len();
        info!(
            "Warming complete: {}/{} providers warm",
            warm_count,
            self.states.len()
        );

        self.spawn_heartbeats();
    }

    /// Spawn one periodic heartbeat task per provider.
    fn spawn_heartbeats(self: &Arc<Self>) {
        let mut handles = self.heartbeats.lock().expect("heartbeat lock poisoned");
        if !handles.is_empty() {
            return;
        }

        for provider in self.pool.handles() {
            let provider = provider.clone();
            let manager = self.clone();
            let interval = self.config.interval();

            handles.push(tokio::spawn(async move {
                let id = provider.id();
                let mut ticker = tokio::time::interval(interval);
                // The warming pass already pinged; skip the immediate tick.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let result = provider.warm_ping().await;
                    manager.apply_ping_result(id, result.map_err(|e| e.to_string()));
                }
            }));
        }
    }

    /// Record a ping outcome. A single failure is tolerated silently;
    /// only `demote_after` consecutive failures flip a warm provider cold.
    fn apply_ping_result(&self, id: ProviderId, result: Result<(), String>) {
        let Some(state) = self.states.get(&id) else {
            return;
        };

        match result {
            Ok(()) => {
                state.is_warm.store(true, Ordering::Release);
                state
                    .last_ping_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                state.consecutive_failures.store(0, Ordering::Relaxed);
                debug!("{} ping ok", id);
            }
            Err(error) => {
                let failures = state.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.demote_after && state.is_warm.load(Ordering::Acquire) {
                    state.is_warm.store(false, Ordering::Release);
                    warn!(
                        "{} demoted to cold after {} consecutive ping failures: {}",
                        id, failures, error
                    );
                } else {
                    debug!("{} ping failed ({}): {}", id, failures, error);
                }
            }
        }
    }

    /// Whether the provider responded to its most recent pings.
    pub fn is_warm(&self, id: ProviderId) -> bool {
        self.states
            .get(&id)
            .is_some_and(|s| s.is_warm.load(Ordering::Acquire))
    }

    /// Warm providers in static priority order.
    pub fn warm_providers(&self) -> Vec<ProviderId> {
        ProviderId::PRIORITY
            .iter()
            .copied()
            .filter(|id| self.is_warm(*id))
            .collect()
    }

    /// When the provider last answered a ping.
    pub fn last_ping(&self, id: ProviderId) -> Option<DateTime<Utc>> {
        let ms = self.states.get(&id)?.last_ping_ms.load(Ordering::Relaxed);
        if ms == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(ms).single()
    }

    /// Abort all heartbeat tasks.
    pub fn shutdown(&self) {
        let mut handles = self.heartbeats.lock().expect("heartbeat lock poisoned");
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for WarmSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        ExtractProvider, ProviderRequest, ProviderResponse,
    };
    use async_trait::async_trait;

    struct PingProvider {
        id: ProviderId,
        ping_ok: AtomicBool,
    }

    #[async_trait]
    impl ExtractProvider for PingProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn is_available(&self) -> bool {
            true
        }

        fn availability_hint(&self) -> String {
            "test provider".to_string()
        }

        async fn extract(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            if self.ping_ok.load(Ordering::Relaxed) {
                Ok(ProviderResponse {
                    text: "ready".to_string(),
                    confidence: 1.0,
                    model: None,
                    metadata: Default::default(),
                })
            } else {
                Err(ProviderError::Invocation {
                    provider: self.id,
                    message: "down".to_string(),
                })
            }
        }
    }

    fn manager_with(ping_ok: bool) -> Arc<WarmSessionManager> {
        let mut pool = ProviderPool::new();
        pool.register(Arc::new(PingProvider {
            id: ProviderId::Gemini,
            ping_ok: AtomicBool::new(ping_ok),
        }));
        WarmSessionManager::new(Arc::new(pool), WarmConfig::default())
    }

    #[tokio::test]
    async fn successful_ping_marks_warm() {
        let manager = manager_with(true);
        assert!(!manager.is_warm(ProviderId::Gemini));
        manager.start_warming().await;
        assert!(manager.is_warm(ProviderId::Gemini));
        assert!(manager.last_ping(ProviderId::Gemini).is_some());
        assert_eq!(manager.warm_providers(), vec![ProviderId::Gemini]);
        manager.shutdown();
    }

    #[tokio::test]
    async fn failed_ping_stays_cold() {
        let manager = manager_with(false);
        manager.start_warming().await;
        assert!(!manager.is_warm(ProviderId::Gemini));
        assert!(manager.last_ping(ProviderId::Gemini).is_none());
        manager.shutdown();
    }

    #[tokio::test]
    async fn single_failure_is_tolerated() {
        let manager = manager_with(true);
        manager.start_warming().await;
        assert!(manager.is_warm(ProviderId::Gemini));

        // One failure: still warm.
        manager.apply_ping_result(ProviderId::Gemini, Err("blip".to_string()));
        assert!(manager.is_warm(ProviderId::Gemini));

        // Two more: demoted at the configured threshold of 3.
        manager.apply_ping_result(ProviderId::Gemini, Err("blip".to_string()));
        assert!(manager.is_warm(ProviderId::Gemini));
        manager.apply_ping_result(ProviderId::Gemini, Err("blip".to_string()));
        assert!(!manager.is_warm(ProviderId::Gemini));

        // Recovery resets the failure counter.
        manager.apply_ping_result(ProviderId::Gemini, Ok(()));
        assert!(manager.is_warm(ProviderId::Gemini));
        manager.shutdown();
    }

    #[tokio::test]
    async fn unknown_provider_is_never_warm() {
        let manager = manager_with(true);
        manager.start_warming().await;
        assert!(!manager.is_warm(ProviderId::Tesseract));
        manager.shutdown();
    }
}
