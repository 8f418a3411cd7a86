//! Shared coordination store abstraction backing both the distributed
//! endpoint gate (C2) and the shared tick-cache tier (C4).
//!
//! Two call sites share one trait: the gate's `rate:gate:{endpoint}`
//! counters and the tick cache's `last_tick:{token}` values. A `redis`-backed
//! implementation provides cross-process coordination; a `LocalStore`
//! fallback is used both for the documented degrade-to-local trade-off and
//! for tests that run without a redis instance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Cross-process key/value coordination store with per-key TTL and atomic
/// increment, used by the gate and the shared tick cache.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment `key` and return the resulting value. If `key`
    /// has no TTL set yet, `ttl` is applied on first creation.
    async fn incr_and_get(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Fetch the raw string value stored at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` at `key` with the given TTL.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
    -> Result<(), StoreError>;

    /// Push an already-set key's TTL out to `ttl` without touching its
    /// value. A no-op if `key` does not currently exist. Used by the
    /// endpoint gate to hold a window open longer than its normal interval
    /// after the upstream reports a throttled response.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Error returned by a `SharedStore` operation; callers degrade to a
/// `LocalStore` on any `Unreachable` error rather than failing the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, DNS failure, …).
    #[error("coordination store unreachable: {0}")]
    Unreachable(String),
}

/// In-process fallback store, used when the coordination store is
/// unreachable and by tests. Trades cross-process accuracy for
/// availability, per the gate's documented degrade path.
#[derive(Default)]
pub struct LocalStore {
    entries: Mutex<HashMap<String, (String, Instant, Duration)>>,
}

impl LocalStore {
    /// Construct an empty local store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(inserted_at: Instant, ttl: Duration) -> bool {
        inserted_at.elapsed() >= ttl
    }
}

#[async_trait]
impl SharedStore for LocalStore {
    async fn incr_and_get(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().expect("local store mutex poisoned");
        let now = Instant::now();
        let entry = entries.get(key).copied();
        let current = match entry {
            Some((value, inserted_at, entry_ttl)) if !Self::is_expired(inserted_at, entry_ttl) => {
                value.parse::<i64>().unwrap_or(0)
            }
            _ => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), (next.to_string(), now, ttl));
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().expect("local store mutex poisoned");
        Ok(entries.get(key).and_then(|(value, inserted_at, ttl)| {
            if Self::is_expired(*inserted_at, *ttl) {
                None
            } else {
                Some(value.clone())
            }
        }))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("local store mutex poisoned");
        entries.insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("local store mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.1 = Instant::now();
            entry.2 = ttl;
        }
        Ok(())
    }
}

impl Clone for LocalStore {
    fn clone(&self) -> Self {
        let entries = self.entries.lock().expect("local store mutex poisoned");
        Self {
            entries: Mutex::new(entries.clone()),
        }
    }
}

/// `redis`-backed `SharedStore`, the coordination store used in production
/// deployments spanning multiple gateway processes.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Connect to a redis instance at `url`. Connection failures surface as
    /// `StoreError::Unreachable` at call time rather than at construction,
    /// matching redis's lazy connection model.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn incr_and_get(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let value: i64 = conn
            .incr(key, 1)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        if value == 1 {
            let _: () = conn
                .expire(key, ttl.as_secs().max(1).try_into().unwrap_or(i64::MAX))
                .await
                .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        }
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        let mut conn = self.connection().await?;
        let _: () = conn
            .expire(key, ttl.as_secs().max(1).try_into().unwrap_or(i64::MAX))
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_increments_and_expires() {
        let store = LocalStore::new();
        assert_eq!(
            store.incr_and_get("rate:gate:x", Duration::from_millis(50)).await.unwrap(),
            1
        );
        assert_eq!(
            store.incr_and_get("rate:gate:x", Duration::from_millis(50)).await.unwrap(),
            2
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            store.incr_and_get("rate:gate:x", Duration::from_millis(50)).await.unwrap(),
            1,
            "counter resets after TTL elapses"
        );
    }

    #[tokio::test]
    async fn local_store_get_set_round_trip() {
        let store = LocalStore::new();
        store
            .set_with_ttl("last_tick:26000", "540.1".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("last_tick:26000").await.unwrap().as_deref(), Some("540.1"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_pushes_an_existing_key_s_ttl_out() {
        let store = LocalStore::new();
        store.incr_and_get("rate:gate:quotes", Duration::from_millis(30)).await.unwrap();
        store.expire("rate:gate:quotes", Duration::from_millis(200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            store.incr_and_get("rate:gate:quotes", Duration::from_millis(200)).await.unwrap(),
            2,
            "extended TTL must outlive the original short window"
        );
    }

    #[tokio::test]
    async fn expire_on_a_missing_key_is_a_no_op() {
        let store = LocalStore::new();
        store.expire("missing", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
