//! Exchange resolver (C1): normalizes bare numeric tokens into authoritative
//! `(exchange, token)` pairs before any upstream call, per the invariant that
//! no pair reaches the upstream HTTP client or WS ingestor without having
//! first passed through here.
//!
//! Multiple catalogue tiers are modeled here as a `CatalogueSource` trait so
//! the tiering mechanism itself stays unit-testable against in-memory
//! fakes, with a single production tier that delegates to the upstream
//! adapter's own catalogue (`UpstreamAdapter::resolve_token`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
#[cfg(feature = "tracing")]
use tracing::debug;

use vortex_core::{GatewayError, Pair, UpstreamAdapter};
use vortex_types::Exchange;

/// One tier of the token→exchange catalogue, queried in fixed order by
/// `TieredCatalogue` until the first hit.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// Look up `token` in this tier. `Ok(None)` means "not present here",
    /// not a failure — the caller moves on to the next tier.
    async fn lookup(&self, token: u32) -> Result<Option<Exchange>, GatewayError>;
}

/// Adapts the single upstream adapter's `resolve_token` into a
/// `CatalogueSource` tier.
pub struct UpstreamCatalogue {
    adapter: Arc<dyn UpstreamAdapter>,
}

impl UpstreamCatalogue {
    /// Wrap an upstream adapter as a catalogue tier.
    #[must_use]
    pub fn new(adapter: Arc<dyn UpstreamAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl CatalogueSource for UpstreamCatalogue {
    async fn lookup(&self, token: u32) -> Result<Option<Exchange>, GatewayError> {
        self.adapter.resolve_token(token).await
    }
}

/// Drives a fixed, ordered list of catalogue tiers and stops at the first
/// hit. Catalogue read errors are swallowed into "unresolved" rather than
/// propagated — a transient lookup failure must not be fatal to a snapshot
/// or subscribe request.
pub struct TieredCatalogue {
    tiers: Vec<Arc<dyn CatalogueSource>>,
}

impl TieredCatalogue {
    /// Build a catalogue from its tiers, queried in the given order.
    #[must_use]
    pub fn new(tiers: Vec<Arc<dyn CatalogueSource>>) -> Self {
        Self { tiers }
    }

    async fn lookup(&self, token: u32) -> Option<Exchange> {
        for tier in &self.tiers {
            match tier.lookup(token).await {
                Ok(Some(exchange)) => return Some(exchange),
                Ok(None) => continue,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    debug!(token, error = %_err, "catalogue tier read failed, trying next tier");
                    continue;
                }
            }
        }
        None
    }
}

/// Result of resolving a batch of bare tokens.
#[derive(Debug, Default, Clone)]
pub struct ResolveOutcome {
    /// Tokens that mapped to an exchange.
    pub resolved: HashMap<u32, Exchange>,
    /// Tokens with no entry in any catalogue tier.
    pub unresolved: HashSet<u32>,
}

/// Result of building authoritative pairs from bare tokens.
#[derive(Debug, Default, Clone)]
pub struct BuildPairsOutcome {
    /// Pairs built for every resolvable token.
    pub pairs: Vec<Pair>,
    /// Tokens that could not be resolved; never mapped to a default exchange.
    pub unresolved: Vec<u32>,
}

/// Exchange resolver (C1): the sole authority for minting `Pair` values from
/// bare tokens, backed by a bounded-TTL memoization cache in front of the
/// tiered catalogue.
pub struct Resolver {
    catalogue: TieredCatalogue,
    cache: MokaCache<u32, Exchange>,
}

impl Resolver {
    /// Build a resolver from its catalogue tiers and memoization TTL.
    #[must_use]
    pub fn new(catalogue: TieredCatalogue, ttl: Duration) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self { catalogue, cache }
    }

    /// Resolve a set of bare tokens to their exchanges, deterministically
    /// for a given catalogue state. Memoized entries are served without
    /// touching the catalogue tiers.
    pub async fn resolve(&self, tokens: &HashSet<u32>) -> ResolveOutcome {
        let mut outcome = ResolveOutcome::default();
        for &token in tokens {
            if let Some(exchange) = self.cache.get(&token).await {
                outcome.resolved.insert(token, exchange);
                continue;
            }
            match self.catalogue.lookup(token).await {
                Some(exchange) => {
                    self.cache.insert(token, exchange).await;
                    outcome.resolved.insert(token, exchange);
                }
                None => {
                    outcome.unresolved.insert(token);
                }
            }
        }
        outcome
    }

    /// Thin wrapper over `resolve` producing authoritative pairs only; never
    /// returns a default-exchange fallback for an unresolved token.
    pub async fn build_pairs(&self, tokens: &[u32]) -> BuildPairsOutcome {
        let set: HashSet<u32> = tokens.iter().copied().collect();
        let outcome = self.resolve(&set).await;
        let mut out = BuildPairsOutcome::default();
        for token in tokens {
            if let Some(&exchange) = outcome.resolved.get(token) {
                out.pairs.push(Pair::new(exchange, *token));
            } else if outcome.unresolved.contains(token) {
                out.unresolved.push(*token);
            }
        }
        out
    }

    /// Accept explicit pairs from a trusted caller (already-parsed
    /// `"EXCHANGE-TOKEN"` strings from a client request) and prime the
    /// memoization cache, bypassing catalogue lookup entirely.
    pub async fn prime(&self, pairs: &[Pair]) {
        for pair in pairs {
            self.cache.insert(pair.token(), pair.exchange()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeTier {
        entries: HashMap<u32, Exchange>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CatalogueSource for FakeTier {
        async fn lookup(&self, token: u32) -> Result<Option<Exchange>, GatewayError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.entries.get(&token).copied())
        }
    }

    struct FailingTier;

    #[async_trait]
    impl CatalogueSource for FailingTier {
        async fn lookup(&self, _token: u32) -> Result<Option<Exchange>, GatewayError> {
            Err(GatewayError::Internal("boom".into()))
        }
    }

    fn resolver_with(entries: HashMap<u32, Exchange>) -> Resolver {
        let tier = Arc::new(FakeTier { entries, calls: AtomicU32::new(0) });
        Resolver::new(TieredCatalogue::new(vec![tier]), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn resolves_known_tokens_and_reports_unresolved() {
        let mut entries = HashMap::new();
        entries.insert(26000, Exchange::NseEq);
        let resolver = resolver_with(entries);

        let tokens: HashSet<u32> = [26000, 9_999_999].into_iter().collect();
        let outcome = resolver.resolve(&tokens).await;
        assert_eq!(outcome.resolved.get(&26000), Some(&Exchange::NseEq));
        assert!(outcome.unresolved.contains(&9_999_999));
    }

    #[tokio::test]
    async fn build_pairs_never_fabricates_a_default_exchange() {
        let mut entries = HashMap::new();
        entries.insert(26000, Exchange::NseEq);
        let resolver = resolver_with(entries);

        let out = resolver.build_pairs(&[26000, 1]).await;
        assert_eq!(out.pairs, vec![Pair::new(Exchange::NseEq, 26000)]);
        assert_eq!(out.unresolved, vec![1]);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let mut entries = HashMap::new();
        entries.insert(26000, Exchange::NseEq);
        let tier = Arc::new(FakeTier { entries, calls: AtomicU32::new(0) });
        let resolver = Resolver::new(TieredCatalogue::new(vec![tier.clone()]), Duration::from_secs(60));

        let tokens: HashSet<u32> = [26000].into_iter().collect();
        resolver.resolve(&tokens).await;
        resolver.resolve(&tokens).await;
        assert_eq!(tier.calls.load(Ordering::Relaxed), 1, "second resolve should hit the memoization cache");
    }

    #[tokio::test]
    async fn prime_bypasses_catalogue_lookup() {
        let resolver = resolver_with(HashMap::new());
        resolver.prime(&[Pair::new(Exchange::NseFo, 135_938)]).await;
        let tokens: HashSet<u32> = [135_938].into_iter().collect();
        let outcome = resolver.resolve(&tokens).await;
        assert_eq!(outcome.resolved.get(&135_938), Some(&Exchange::NseFo));
    }

    #[tokio::test]
    async fn a_failing_tier_is_skipped_not_fatal() {
        let mut entries = HashMap::new();
        entries.insert(26000, Exchange::NseEq);
        let good = Arc::new(FakeTier { entries, calls: AtomicU32::new(0) });
        let resolver = Resolver::new(
            TieredCatalogue::new(vec![Arc::new(FailingTier), good]),
            Duration::from_secs(60),
        );
        let tokens: HashSet<u32> = [26000].into_iter().collect();
        let outcome = resolver.resolve(&tokens).await;
        assert_eq!(outcome.resolved.get(&26000), Some(&Exchange::NseEq));
    }
}
