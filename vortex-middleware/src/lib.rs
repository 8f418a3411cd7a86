//! vortex-middleware
//!
//! Distributed endpoint gate (C2), quote cache (C4), and tenant entitlement
//! filtering, built on the shared coordination-store abstraction in
//! `store`.
#![warn(missing_docs)]

mod builder;
mod cache;
mod entitlement;
mod gate;
mod store;

pub use builder::HandlerBuilder;
pub use cache::QuoteCache;
pub use entitlement::{EntitlementFilter, EntitlementPartition};
pub use gate::{EndpointGate, GateOutcome};
pub use store::{LocalStore, RedisStore, SharedStore, StoreError};
