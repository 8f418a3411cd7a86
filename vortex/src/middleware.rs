//! Auth and rate-limit middleware layers composed around the gateway's
//! router via `vortex_middleware::HandlerBuilder`, in the same
//! wrap-a-handler idiom `vortex_middleware::gate`/`cache` use to wrap a
//! collaborator.
//!
//! Ordering is fixed: auth must run outermost so every inner layer (rate
//! limit, the router itself) can assume `req.payload["_tenant"]` is a
//! resolved `TenantContext` — `GatewayRequest` has no dedicated tenant
//! field, so the resolved context rides along in the payload the same way
//! an HTTP framework might thread it through request extensions.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use vortex_core::middleware::{GatewayRequest, Middleware, RequestHandler, ValidationContext};
use vortex_core::{GatewayError, TenantContext};

use crate::tenants::TenantDirectory;

const TENANT_KEY: &str = "_tenant";

/// Pull the tenant context an outer `AuthMiddleware` attached to `req`.
///
/// # Errors
/// Returns `GatewayError::Internal` if no `AuthMiddleware` ran first —
/// a stack-composition bug, not a client-facing condition.
pub fn tenant_of(req: &GatewayRequest) -> Result<TenantContext, GatewayError> {
    req.payload
        .get(TENANT_KEY)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| GatewayError::Internal(format!("corrupt tenant context: {e}")))?
        .ok_or_else(|| GatewayError::Internal("AuthMiddleware did not run before the router".into()))
}

fn with_tenant_attached(payload: Value, tenant: &TenantContext) -> Value {
    let tenant_value = serde_json::to_value(tenant).unwrap_or(Value::Null);
    match payload {
        Value::Object(mut map) => {
            map.insert(TENANT_KEY.to_string(), tenant_value);
            Value::Object(map)
        }
        other => {
            let mut map = serde_json::Map::new();
            map.insert("_payload".to_string(), other);
            map.insert(TENANT_KEY.to_string(), tenant_value);
            Value::Object(map)
        }
    }
}

/// Resolves the request's API key to a `TenantContext` and rejects the
/// request outright on a missing or unknown key, before any inner layer
/// runs.
pub struct AuthMiddleware {
    directory: Arc<dyn TenantDirectory>,
}

impl AuthMiddleware {
    /// Construct the auth layer over a tenant directory.
    #[must_use]
    pub fn new(directory: Arc<dyn TenantDirectory>) -> Self {
        Self { directory }
    }
}

struct AuthHandler {
    directory: Arc<dyn TenantDirectory>,
    inner: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for AuthHandler {
    async fn handle(&self, mut req: GatewayRequest) -> Result<Value, GatewayError> {
        let api_key = req.api_key.clone().ok_or(GatewayError::MissingApiKey)?;
        let tenant = self.directory.resolve(&api_key).await?;
        req.payload = with_tenant_attached(req.payload, &tenant);
        self.inner.handle(req).await
    }
}

impl Middleware for AuthMiddleware {
    fn apply(self: Box<Self>, inner: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(AuthHandler { directory: self.directory, inner })
    }

    fn name(&self) -> &'static str {
        "auth"
    }

    fn config_json(&self) -> Value {
        serde_json::json!({ "layer": "auth" })
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Enforces per-tenant, per-event-name request rates: configurable RPS
/// caps checked before any work is done. A fixed one-second window per
/// `(tenant_id, event)` pair, in the same reset-on-elapsed shape as a quota
/// runtime, simplified down to a single window (no hourly-spread strategy —
/// the gateway's limits are a flat per-second cap, not a daily budget).
pub struct RateLimitMiddleware {
    default_rps: HashMap<String, u32>,
    windows: Mutex<HashMap<(String, String), WindowCounter>>,
}

impl RateLimitMiddleware {
    /// Construct the rate-limit layer with its per-event default caps
    /// (`WsConfig::per_event_rps`); a tenant's own `ws_rps_overrides` wins
    /// when present.
    #[must_use]
    pub fn new(default_rps: HashMap<String, u32>) -> Self {
        Self { default_rps, windows: Mutex::new(HashMap::new()) }
    }

    fn limit_for(&self, tenant: &TenantContext, event: &str) -> u32 {
        tenant
            .ws_rps_overrides
            .get(event)
            .or_else(|| self.default_rps.get(event))
            .copied()
            .unwrap_or(DEFAULT_EVENT_RPS)
    }

    fn check(&self, tenant: &TenantContext, event: &str) -> Result<(), GatewayError> {
        let limit = self.limit_for(tenant, event);
        let mut windows = self.windows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = (tenant.tenant_id.clone(), event.to_string());
        let now = Instant::now();
        let entry = windows.entry(key).or_insert_with(|| WindowCounter { count: 0, window_start: now });
        if now.duration_since(entry.window_start) >= Duration::from_secs(1) {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= limit {
            return Err(GatewayError::RateLimited { limit, window_ms: 1000 });
        }
        entry.count += 1;
        Ok(())
    }
}

/// Default RPS applied to an event name with no tenant override and no
/// configured default.
const DEFAULT_EVENT_RPS: u32 = 20;

struct RateLimitHandler {
    state: Arc<RateLimitMiddleware>,
    inner: Arc<dyn RequestHandler>,
}

#[async_trait]
impl RequestHandler for RateLimitHandler {
    async fn handle(&self, req: GatewayRequest) -> Result<Value, GatewayError> {
        let tenant = tenant_of(&req)?;
        self.state.check(&tenant, &req.event)?;
        self.inner.handle(req).await
    }
}

impl Middleware for RateLimitMiddleware {
    fn apply(self: Box<Self>, inner: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(RateLimitHandler { state: Arc::new(*self), inner })
    }

    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn config_json(&self) -> Value {
        serde_json::json!({ "layer": "rate_limit", "defaults": self.default_rps })
    }

    fn validate(&self, ctx: &ValidationContext) -> Result<(), GatewayError> {
        vortex_core::require_middleware_outer!(ctx, AuthMiddleware, "rate limiting requires a resolved tenant");
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
