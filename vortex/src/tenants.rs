//! Tenant directory: the read-only `api_key → TenantContext` lookup the
//! auth middleware resolves against on every request.
//!
//! Provisioning, persistence, and OAuth/session plumbing for tenants are an
//! out-of-scope external collaborator; this module models only the lookup
//! seam, the same shape as `resolver::CatalogueSource` models the
//! instrument catalogue's seam.

use std::collections::HashMap;

use async_trait::async_trait;

use vortex_core::{GatewayError, TenantContext};

/// Resolves an API key to its tenant context. The only implementation
/// shipped here is a static in-memory map; a production deployment plugs
/// in whatever store actually owns tenant provisioning.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Resolve `api_key` to its tenant context.
    ///
    /// # Errors
    /// Returns `GatewayError::InvalidApiKey` if the key does not match a
    /// known, enabled tenant.
    async fn resolve(&self, api_key: &str) -> Result<TenantContext, GatewayError>;
}

/// A fixed, in-memory tenant directory keyed by API key.
#[derive(Default)]
pub struct StaticTenantDirectory {
    tenants: HashMap<String, TenantContext>,
}

impl StaticTenantDirectory {
    /// Construct an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a directory pre-populated from `tenants`, keyed by each
    /// context's `api_key`.
    #[must_use]
    pub fn from_tenants(tenants: impl IntoIterator<Item = TenantContext>) -> Self {
        Self {
            tenants: tenants.into_iter().map(|t| (t.api_key.clone(), t)).collect(),
        }
    }

    /// Add or replace a tenant's entry.
    pub fn insert(&mut self, tenant: TenantContext) {
        self.tenants.insert(tenant.api_key.clone(), tenant);
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn resolve(&self, api_key: &str) -> Result<TenantContext, GatewayError> {
        self.tenants.get(api_key).cloned().ok_or(GatewayError::InvalidApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use vortex_types::Exchange;

    fn tenant(api_key: &str) -> TenantContext {
        TenantContext {
            api_key: api_key.to_string(),
            tenant_id: "t1".into(),
            rate_limit_per_minute: 60,
            connection_limit: 5,
            entitlements: HashSet::from([Exchange::NseEq]),
            ws_rps_overrides: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn known_key_resolves_its_tenant() {
        let dir = StaticTenantDirectory::from_tenants([tenant("key-a")]);
        let resolved = dir.resolve("key-a").await.unwrap();
        assert_eq!(resolved.tenant_id, "t1");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let dir = StaticTenantDirectory::from_tenants([tenant("key-a")]);
        let err = dir.resolve("key-b").await.unwrap_err();
        assert_eq!(err.code(), "invalid_api_key");
    }
}
