//! Quote cache (C4): a bounded in-process `moka` tier in front of a shared
//! `last_tick:{token}` tier in the coordination store, a `moka`-backed
//! cache store wrapping upstream calls.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;
#[cfg(feature = "tracing")]
use tracing::info;
use vortex_core::Pair;
use vortex_types::CacheConfig;

use crate::store::{SharedStore, StoreError};

/// Bounded TTL/LRU in-memory cache of composed quotes, keyed by `Pair`,
/// fronting the shared `last_tick:*` tier written exclusively by the tick
/// ingestor.
pub struct QuoteCache {
    memory: MokaCache<Pair, String>,
    shared: Arc<dyn SharedStore>,
    tick_ttl: Duration,
}

impl QuoteCache {
    /// Construct a quote cache with the given tuning and shared-store
    /// backing for the `last_tick:*` tier.
    #[must_use]
    pub fn new(config: &CacheConfig, shared: Arc<dyn SharedStore>) -> Self {
        let memory = MokaCache::builder()
            .max_capacity(config.memory_max)
            .time_to_live(config.memory_ttl)
            .build();
        #[cfg(feature = "tracing")]
        info!(
            target = "vortex::middleware::cache",
            max_capacity = config.memory_max,
            ttl_ms = config.memory_ttl.as_millis() as u64,
            "initialized quote memory cache"
        );
        Self {
            memory,
            shared,
            tick_ttl: config.tick_ttl,
        }
    }

    /// Look up a cached last-price string for `pair`, checking the memory
    /// tier first and falling back to the shared `last_tick:{token}` tier.
    pub async fn get(&self, pair: Pair) -> Option<String> {
        if let Some(value) = self.memory.get(&pair).await {
            return Some(value);
        }
        let key = Self::shared_key(pair);
        match self.shared.get(&key).await {
            Ok(Some(value)) => {
                self.memory.insert(pair, value.clone()).await;
                Some(value)
            }
            Ok(None) | Err(StoreError::Unreachable(_)) => None,
        }
    }

    /// Write a freshly decoded tick's last price into both tiers. Only the
    /// tick ingestor calls this, per the design note that the shared
    /// store's `last_tick:*` keys are single-writer.
    pub async fn put_tick(&self, pair: Pair, last_price_str: String) {
        self.memory.insert(pair, last_price_str.clone()).await;
        let key = Self::shared_key(pair);
        let _ = self
            .shared
            .set_with_ttl(&key, last_price_str, self.tick_ttl)
            .await;
    }

    /// Write a successful provider response's last price into the memory
    /// tier. Unlike `put_tick`, this never touches the shared `last_tick:*`
    /// tier: that tier stays single-writer for the tick ingestor, while
    /// every REST caller still warms its own process's memory tier so a
    /// REST-only instrument hits the fast path on the next lookup.
    pub async fn put(&self, pair: Pair, last_price_str: String) {
        self.memory.insert(pair, last_price_str).await;
    }

    fn shared_key(pair: Pair) -> String {
        format!("last_tick:{}", pair.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use vortex_types::Exchange;

    fn cache() -> QuoteCache {
        QuoteCache::new(
            &CacheConfig {
                memory_ttl: Duration::from_millis(50),
                memory_max: 100,
                tick_ttl: Duration::from_secs(5),
                resolver_ttl: Duration::from_secs(60),
            },
            Arc::new(LocalStore::new()),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = cache();
        let pair = Pair::new(Exchange::NseEq, 26000);
        cache.put_tick(pair, "540.1".into()).await;
        assert_eq!(cache.get(pair).await.as_deref(), Some("540.1"));
    }

    #[tokio::test]
    async fn put_warms_the_memory_tier_without_writing_the_shared_store() {
        let cache = cache();
        let pair = Pair::new(Exchange::NseEq, 26000);
        cache.put(pair, "540.1".into()).await;
        assert_eq!(cache.get(pair).await.as_deref(), Some("540.1"));
        assert_eq!(cache.shared.get(&QuoteCache::shared_key(pair)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_tier_expires_but_shared_tier_survives() {
        let cache = cache();
        let pair = Pair::new(Exchange::NseEq, 26000);
        cache.put_tick(pair, "540.1".into()).await;
        tokio::time::sleep(Duration::from_millis(70)).await;
        cache.memory.run_pending_tasks().await;
        assert_eq!(
            cache.get(pair).await.as_deref(),
            Some("540.1"),
            "shared tier still answers after memory tier TTL elapses"
        );
    }

    #[tokio::test]
    async fn unknown_pair_returns_none() {
        let cache = cache();
        let pair = Pair::new(Exchange::NseEq, 9_999_999);
        assert_eq!(cache.get(pair).await, None);
    }
}
