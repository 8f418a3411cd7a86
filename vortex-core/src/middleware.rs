//! Middleware trait for wrapping the client gateway's request pipeline.
//!
//! An explicit middleware chain applied at the connection boundary: auth →
//! rate-limit → route. Each layer wraps a `RequestHandler` and returns a
//! wrapped `RequestHandler`, the same shape as a decorator wrapping a
//! connector.

use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::GatewayError;

/// A single client request entering the gateway after framing/parsing, but
/// before auth, rate-limiting, or routing have run.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Raw API key presented by the client, if any.
    pub api_key: Option<String>,
    /// Logical event name (`"subscribe"`, `"get_quote"`, …) used for
    /// per-event RPS accounting.
    pub event: String,
    /// Opaque JSON payload, interpreted by the route handler.
    pub payload: serde_json::Value,
    /// Identifies the originating push-channel connection for events that
    /// mutate connection-scoped state (`subscribe`, `set_mode`, …). `None`
    /// for one-shot HTTP snapshot requests, which carry no connection.
    pub client_id: Option<u64>,
}

impl GatewayRequest {
    /// Construct a one-shot request with no originating connection, as
    /// issued by the HTTP snapshot endpoints.
    #[must_use]
    pub fn one_shot(api_key: Option<String>, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { api_key, event: event.into(), payload, client_id: None }
    }

    /// Construct a request scoped to an existing push-channel connection.
    #[must_use]
    pub fn for_connection(
        api_key: Option<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
        client_id: u64,
    ) -> Self {
        Self { api_key, event: event.into(), payload, client_id: Some(client_id) }
    }
}

/// A pipeline endpoint that consumes a `GatewayRequest` and produces a JSON
/// response or an error. Implemented once by the gateway's router; wrapped
/// by zero or more `Middleware` layers (auth, rate-limit) before requests
/// reach it.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a single request and return its JSON response.
    async fn handle(&self, req: GatewayRequest) -> Result<serde_json::Value, GatewayError>;
}

/// Position requirement for middleware in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewarePosition {
    /// This middleware must be outermost (applied last, handles requests first).
    Outermost,
    /// This middleware must be outside (closer to the client than) the specified middleware type.
    OuterThan(TypeId),
    /// This middleware must be inside (closer to the router than) the specified middleware type.
    InnerThan(TypeId),
    /// No position requirement.
    Any,
}

/// Validation context passed to middleware during stack validation.
pub struct ValidationContext<'a> {
    stack: &'a [MiddlewareDescriptor],
    current_index: usize,
}

impl<'a> ValidationContext<'a> {
    /// Create a new validation context.
    #[must_use]
    pub const fn new(stack: &'a [MiddlewareDescriptor], current_index: usize) -> Self {
        Self {
            stack,
            current_index,
        }
    }

    /// Check if a middleware type exists anywhere in the stack.
    #[must_use]
    pub fn has_middleware(&self, type_id: TypeId) -> bool {
        self.stack.iter().any(|m| m.type_id() == type_id)
    }

    /// Check if a middleware type exists outer than (closer to the client
    /// than) the current middleware. The stack is stored outermost-first,
    /// so "outer" means lower indices.
    #[must_use]
    pub fn has_middleware_outer(&self, type_id: TypeId) -> bool {
        self.stack[..self.current_index]
            .iter()
            .any(|m| m.type_id() == type_id)
    }

    /// Check if a middleware type exists inner than (closer to the router
    /// than) the current middleware.
    #[must_use]
    pub fn has_middleware_inner(&self, type_id: TypeId) -> bool {
        self.stack[self.current_index + 1..]
            .iter()
            .any(|m| m.type_id() == type_id)
    }

    /// Get the middleware's position in the stack (0 = outermost).
    #[must_use]
    pub const fn current_position(&self) -> usize {
        self.current_index
    }

    /// Get the total number of middleware in the stack.
    #[must_use]
    pub const fn stack_size(&self) -> usize {
        self.stack.len()
    }
}

/// Internal descriptor for tracking middleware in the builder.
pub struct MiddlewareDescriptor {
    middleware: Box<dyn Middleware>,
    type_id: TypeId,
    name: &'static str,
}

impl MiddlewareDescriptor {
    /// Create a new middleware descriptor from a concrete middleware implementation.
    pub fn new<M: Middleware + 'static>(middleware: M) -> Self {
        let name = middleware.name();
        Self {
            middleware: Box::new(middleware),
            type_id: TypeId::of::<M>(),
            name,
        }
    }

    /// Get the type ID of the wrapped middleware.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Get the human-readable name of the middleware.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Get a reference to the wrapped middleware trait object.
    #[must_use]
    pub fn middleware(&self) -> &dyn Middleware {
        &*self.middleware
    }

    /// Consume this descriptor and extract the boxed middleware.
    #[must_use]
    pub fn into_middleware(self) -> Box<dyn Middleware> {
        self.middleware
    }
}

/// Trait implemented by gateway middleware layers (auth, rate-limit).
///
/// A middleware consumes an inner `RequestHandler` and returns a wrapped
/// handler that augments or restricts behavior. Middleware can declare
/// position requirements to ensure correct composition (e.g. rate-limiting
/// must run after auth has resolved a `TenantContext`).
pub trait Middleware: Send + Sync {
    /// Apply this middleware to wrap an inner handler and return the
    /// wrapped handler.
    fn apply(self: Box<Self>, inner: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler>;

    /// Human-readable middleware name for introspection/logging.
    fn name(&self) -> &'static str;

    /// Opaque configuration snapshot for serialization/inspection.
    fn config_json(&self) -> serde_json::Value;

    /// Validate this middleware's position and dependencies in the stack.
    ///
    /// # Errors
    /// Return an error if validation fails (missing dependencies, wrong order).
    fn validate(&self, _ctx: &ValidationContext) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Optional: get this middleware as `&dyn Any` for downcasting.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Require that `$middleware_type` sits outer than the current middleware.
#[macro_export]
macro_rules! require_middleware_outer {
    ($ctx:expr, $middleware_type:ty, $msg:expr) => {
        if !$ctx.has_middleware_outer(std::any::TypeId::of::<$middleware_type>()) {
            return Err($crate::types::GatewayError::Internal(format!(
                "{}: {} must be outside (outermost from) this middleware",
                $msg,
                std::any::type_name::<$middleware_type>()
            )));
        }
    };
}

/// Require that `$middleware_type` exists anywhere in the stack.
#[macro_export]
macro_rules! require_middleware {
    ($ctx:expr, $middleware_type:ty, $msg:expr) => {
        if !$ctx.has_middleware(std::any::TypeId::of::<$middleware_type>()) {
            return Err($crate::types::GatewayError::Internal(format!(
                "{}: {} must be present in the stack",
                $msg,
                std::any::type_name::<$middleware_type>()
            )));
        }
    };
}
