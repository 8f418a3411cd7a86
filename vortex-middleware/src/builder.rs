//! Builder for composing the client gateway's request handler with
//! middleware layers.
//!
//! # Middleware Ordering Convention
//!
//! Middleware layers form an "onion" around the router's `RequestHandler`:
//!
//! ```text
//! Client Request
//!     ↓
//! Outermost Middleware (AuthMiddleware — resolves the tenant first)
//!     ↓
//! Inner Middleware (RateLimitMiddleware — enforces the tenant's budget)
//!     ↓
//! Router (handles subscribe/unsubscribe/get_quote/...)
//! ```
//!
//! Storage is outermost-first; `build()` applies layers in reverse to
//! construct the proper nesting, matching `vortex_types::MiddlewareStack`'s
//! `layers[0]` = outermost convention.

use std::sync::Arc;

use vortex_core::middleware::{MiddlewareDescriptor, RequestHandler};
use vortex_types::{MiddlewareLayer, MiddlewareStack};

/// Builder for composing a gateway `RequestHandler` with middleware layers.
pub struct HandlerBuilder {
    router: Arc<dyn RequestHandler>,
    /// Middleware layers in outermost-first order.
    layers: Vec<MiddlewareDescriptor>,
}

impl HandlerBuilder {
    /// Create a new builder from the raw router handler.
    #[must_use]
    pub fn new(router: Arc<dyn RequestHandler>) -> Self {
        Self {
            router,
            layers: Vec::new(),
        }
    }

    /// Push a middleware layer as the new outermost layer.
    #[must_use]
    pub fn with_layer<M: vortex_core::middleware::Middleware + 'static>(
        mut self,
        middleware: M,
    ) -> Self {
        self.layers.insert(0, MiddlewareDescriptor::new(middleware));
        self
    }

    /// Validate every layer's position/dependency requirements, then apply
    /// the layers (innermost to outermost) around the router.
    ///
    /// # Errors
    /// Returns the first validation failure encountered.
    pub fn build(self) -> Result<Arc<dyn RequestHandler>, vortex_types::GatewayError> {
        for (idx, desc) in self.layers.iter().enumerate() {
            let ctx = vortex_core::middleware::ValidationContext::new(&self.layers, idx);
            desc.middleware().validate(&ctx)?;
        }

        let mut handler = self.router;
        for desc in self.layers.into_iter().rev() {
            handler = desc.into_middleware().apply(handler);
        }
        Ok(handler)
    }

    /// Export the current middleware stack configuration for inspection.
    #[must_use]
    pub fn to_stack(&self) -> MiddlewareStack {
        let mut stack = MiddlewareStack::new();
        for desc in &self.layers {
            stack.push_inner(MiddlewareLayer::new(
                desc.name(),
                desc.middleware().config_json(),
            ));
        }
        stack
    }
}
