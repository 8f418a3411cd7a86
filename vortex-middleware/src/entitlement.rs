//! Entitlement filter: partitions resolved pairs into those a tenant may
//! subscribe to and those it may not, a static per-tenant allow-list check
//! in the same shape as a blacklist-on-rate-limit middleware (the gateway's
//! entitlements are assigned at tenant provisioning time, not earned/lost
//! at runtime, so there is no mutable blacklist state to track here).

use vortex_core::{Pair, TenantContext};

/// Outcome of filtering a batch of resolved pairs against a tenant's
/// entitlements.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntitlementPartition {
    /// Pairs the tenant is entitled to subscribe to.
    pub allowed: Vec<Pair>,
    /// Pairs rejected because the tenant's entitlement set does not include
    /// that exchange.
    pub forbidden: Vec<Pair>,
}

/// Stateless filter applied after exchange resolution and before the
/// subscription multiplexer, per the gateway's request pipeline order:
/// resolve → entitle → subscribe.
pub struct EntitlementFilter;

impl EntitlementFilter {
    /// Partition `pairs` by whether `tenant` is entitled to each one's
    /// exchange.
    #[must_use]
    pub fn partition(tenant: &TenantContext, pairs: &[Pair]) -> EntitlementPartition {
        let mut partition = EntitlementPartition::default();
        for &pair in pairs {
            if tenant.is_entitled(pair.exchange()) {
                partition.allowed.push(pair);
            } else {
                partition.forbidden.push(pair);
            }
        }
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use vortex_types::Exchange;

    fn tenant(entitlements: &[Exchange]) -> TenantContext {
        TenantContext {
            api_key: "key".into(),
            tenant_id: "t1".into(),
            rate_limit_per_minute: 60,
            connection_limit: 5,
            entitlements: entitlements.iter().copied().collect::<HashSet<_>>(),
            ws_rps_overrides: HashMap::new(),
        }
    }

    #[test]
    fn entitled_pairs_are_allowed_others_forbidden() {
        let tenant = tenant(&[Exchange::NseEq]);
        let pairs = [
            Pair::new(Exchange::NseEq, 26000),
            Pair::new(Exchange::NseFo, 135_938),
        ];
        let partition = EntitlementFilter::partition(&tenant, &pairs);
        assert_eq!(partition.allowed, vec![pairs[0]]);
        assert_eq!(partition.forbidden, vec![pairs[1]]);
    }

    #[test]
    fn empty_entitlements_forbids_everything() {
        let tenant = tenant(&[]);
        let pairs = [Pair::new(Exchange::NseEq, 26000)];
        let partition = EntitlementFilter::partition(&tenant, &pairs);
        assert!(partition.allowed.is_empty());
        assert_eq!(partition.forbidden.len(), 1);
    }
}
