//! The gateway's event router (C8's inner-most `RequestHandler`): dispatches
//! a `GatewayRequest` on its `event` name to the composer (C9), the
//! resolver (C1), or the subscription multiplexer (C7), after auth and
//! rate-limiting have already run.
//!
//! One router handles both one-shot HTTP snapshot requests and
//! connection-scoped WebSocket events, exactly as `GatewayRequest` itself
//! was generalized to carry an optional `client_id` for the latter.

pub(crate) mod util;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vortex_core::middleware::{GatewayRequest, RequestHandler};
use vortex_core::{GatewayError, Pair};
use vortex_types::Mode;
use vortex_middleware::EntitlementFilter;

use crate::core::Gateway;
use crate::middleware::tenant_of;
use crate::multiplexer::ClientId;

/// A subscription list entry: a bare token or an already-qualified
/// `"EXCHANGE-TOKEN"` wire string, as sent by the client over `/ws`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubEntry {
    Token(u32),
    Pair(String),
}

async fn resolve_entries(gateway: &Gateway, entries: &[SubEntry]) -> (Vec<Pair>, Vec<u32>) {
    let mut explicit_pairs = Vec::new();
    let mut bare_tokens = Vec::new();
    for entry in entries {
        match entry {
            SubEntry::Pair(wire) => {
                if let Ok(pair) = Pair::parse_wire(wire) {
                    explicit_pairs.push(pair);
                }
            }
            SubEntry::Token(token) => bare_tokens.push(*token),
        }
    }
    if !explicit_pairs.is_empty() {
        gateway.resolver().prime(&explicit_pairs).await;
    }
    let built = gateway.resolver().build_pairs(&bare_tokens).await;
    explicit_pairs.extend(built.pairs);
    (explicit_pairs, built.unresolved)
}

fn client_id_of(req: &GatewayRequest) -> Result<ClientId, GatewayError> {
    req.client_id
        .map(ClientId::from_u64)
        .ok_or_else(|| GatewayError::Internal(format!("{} requires an active connection", req.event)))
}

/// Routes every recognized gateway event onto its collaborator. The sole
/// `RequestHandler` wrapped by the auth/rate-limit middleware chain.
pub struct GatewayRouter {
    gateway: Arc<Gateway>,
}

impl GatewayRouter {
    /// Construct a router over the assembled gateway.
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    async fn handle_ltp(&self, payload: &Value) -> Result<Value, GatewayError> {
        let tokens: Vec<u32> = payload.get("instruments").and_then(Value::as_array).map_or_else(Vec::new, |arr| {
            arr.iter().filter_map(Value::as_u64).map(|t| t as u32).collect()
        });
        let pairs: Vec<Pair> = payload
            .get("pairs")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_object)
                    .filter_map(|o| {
                        let exchange = o.get("exchange")?.as_str()?.parse().ok()?;
                        let token = o.get("token")?.as_u64()? as u32;
                        Some(Pair::new(exchange, token))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let ltp_only = payload.get("ltp_only").and_then(Value::as_bool).unwrap_or(false);

        let out = self.gateway.get_ltp(&tokens, &pairs, ltp_only).await;
        let data: serde_json::Map<String, Value> =
            out.into_iter().map(|(key, quote)| (key.to_string(), serde_json::to_value(quote).unwrap_or(Value::Null))).collect();
        Ok(json!({ "data": data }))
    }

    async fn handle_quotes(&self, payload: &Value) -> Result<Value, GatewayError> {
        let tokens: Vec<u32> = payload.get("instruments").and_then(Value::as_array).map_or_else(Vec::new, |arr| {
            arr.iter().filter_map(Value::as_u64).map(|t| t as u32).collect()
        });
        let mode: Mode = payload
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("ltp")
            .parse()
            .map_err(|e: vortex_types::UnknownMode| GatewayError::InvalidMode(e.0))?;
        let ltp_only = payload.get("ltp_only").and_then(Value::as_bool).unwrap_or(false);

        let out = self.gateway.get_quotes(&tokens, mode, ltp_only).await;
        let data: serde_json::Map<String, Value> =
            out.into_iter().map(|(key, quote)| (key.to_string(), serde_json::to_value(quote).unwrap_or(Value::Null))).collect();
        Ok(json!({ "data": data }))
    }

    async fn handle_history(&self, payload: &Value) -> Result<Value, GatewayError> {
        let wire = payload
            .get("pair")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidPayload("history requires a pair".into()))?;
        let pair = Pair::parse_wire(wire)?;
        let from = payload.get("from").and_then(Value::as_i64).unwrap_or(0);
        let to = payload.get("to").and_then(Value::as_i64).unwrap_or(0);
        let resolution = match payload.get("interval").and_then(Value::as_str).unwrap_or("day") {
            "minute" => "minute",
            "5minute" => "5minute",
            "15minute" => "15minute",
            "60minute" => "60minute",
            "week" => "week",
            _ => "day",
        };
        let req = vortex_core::HistoryRequest { from, to, resolution };
        let candles = self.gateway.get_history(pair, req).await?;
        Ok(json!({ "pair": pair.wire(), "candles": candles }))
    }

    async fn handle_subscribe(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let tenant = tenant_of(req)?;
        let client = client_id_of(req)?;
        let entries: Vec<SubEntry> = serde_json::from_value(
            req.payload.get("subscriptions").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| GatewayError::InvalidPayload(format!("subscriptions: {e}")))?;
        let mode: Mode = req
            .payload
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or("ltp")
            .parse()
            .map_err(|e: vortex_types::UnknownMode| GatewayError::InvalidMode(e.0))?;

        let requested = entries.len();
        let (pairs, unresolved) = resolve_entries(&self.gateway, &entries).await;
        let partition = EntitlementFilter::partition(&tenant, &pairs);

        // A pair this client already holds a sub on is a resubscribe, not a
        // fresh one; redirect it through `set_mode` so a weaker mode can
        // actually downgrade the upstream sub once this client is the sole
        // (or strongest) subscriber, rather than `register`'s strengthen-only
        // update leaving it pinned at whatever mode it first came in at.
        let already_subscribed: std::collections::HashSet<Pair> =
            self.gateway.multiplexer().list(client).await.into_iter().map(|(pair, _)| pair).collect();

        let mut included = Vec::new();
        for pair in &partition.allowed {
            let result = if already_subscribed.contains(pair) {
                self.gateway.multiplexer().set_mode(client, *pair, mode).await
            } else {
                self.gateway.multiplexer().register(client, *pair, mode).await
            };
            match result {
                Ok(()) => included.push(*pair),
                Err(_err) => continue,
            }
        }
        let forbidden: Vec<Value> = partition
            .forbidden
            .iter()
            .map(|p| json!({ "exchange": p.exchange().as_str(), "token": p.token() }))
            .collect();

        let included_tokens: Vec<u32> = included.iter().map(Pair::token).collect();
        let snapshot = self.gateway.get_ltp(&included_tokens, &[], false).await;
        let snapshot: serde_json::Map<String, Value> = snapshot
            .into_iter()
            .map(|(key, quote)| (key.to_string(), serde_json::to_value(quote).unwrap_or(Value::Null)))
            .collect();

        Ok(json!({
            "requested": requested,
            "pairs": included.iter().map(Pair::wire).collect::<Vec<_>>(),
            "included": included_tokens,
            "unresolved": unresolved,
            "forbidden": forbidden,
            "snapshot": snapshot,
            "mode": mode.to_string(),
        }))
    }

    async fn handle_unsubscribe(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let client = client_id_of(req)?;
        let entries: Vec<SubEntry> = serde_json::from_value(
            req.payload.get("subscriptions").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| GatewayError::InvalidPayload(format!("subscriptions: {e}")))?;
        let (pairs, _unresolved) = resolve_entries(&self.gateway, &entries).await;
        for pair in &pairs {
            self.gateway.multiplexer().unregister(client, *pair).await;
        }
        Ok(json!({ "unsubscribed": pairs.iter().map(Pair::wire).collect::<Vec<_>>() }))
    }

    async fn handle_unsubscribe_all(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let client = client_id_of(req)?;
        self.gateway.multiplexer().unregister_all(client).await;
        Ok(json!({ "ok": true }))
    }

    async fn handle_set_mode(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let client = client_id_of(req)?;
        let entries: Vec<SubEntry> = serde_json::from_value(
            req.payload.get("subscriptions").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| GatewayError::InvalidPayload(format!("subscriptions: {e}")))?;
        let mode: Mode = req
            .payload
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidPayload("set_mode requires a mode".into()))?
            .parse()
            .map_err(|e: vortex_types::UnknownMode| GatewayError::InvalidMode(e.0))?;
        let (pairs, _unresolved) = resolve_entries(&self.gateway, &entries).await;
        for pair in &pairs {
            self.gateway.multiplexer().set_mode(client, *pair, mode).await?;
        }
        Ok(json!({ "updated": pairs.iter().map(Pair::wire).collect::<Vec<_>>() }))
    }

    async fn handle_list_subscriptions(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let client = client_id_of(req)?;
        let subs = self.gateway.multiplexer().list(client).await;
        let list: Vec<Value> = subs.into_iter().map(|(pair, mode)| json!({ "pair": pair.wire(), "mode": mode.to_string() })).collect();
        Ok(json!({ "subscriptions": list }))
    }

    async fn handle_get_quote(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let wire = req
            .payload
            .get("pair")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidPayload("get_quote requires a pair".into()))?;
        let pair = Pair::parse_wire(wire)?;
        let out = self.gateway.get_ltp(&[], std::slice::from_ref(&pair), false).await;
        let quote = out.get(&crate::core::LtpKey::Pair(pair)).cloned();
        Ok(json!({ "pair": pair.wire(), "quote": quote }))
    }

    fn handle_whoami(&self, req: &GatewayRequest) -> Result<Value, GatewayError> {
        let tenant = tenant_of(req)?;
        Ok(json!({
            "tenant_id": tenant.tenant_id,
            "entitlements": tenant.entitlements.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
            "rate_limit_per_minute": tenant.rate_limit_per_minute,
            "connection_limit": tenant.connection_limit,
        }))
    }

    async fn handle_status(&self) -> Result<Value, GatewayError> {
        Ok(json!({
            "active_pairs": self.gateway.multiplexer().active_pair_count().await,
        }))
    }
}

#[async_trait]
impl RequestHandler for GatewayRouter {
    async fn handle(&self, req: GatewayRequest) -> Result<Value, GatewayError> {
        match req.event.as_str() {
            "ltp" => self.handle_ltp(&req.payload).await,
            "quotes" => self.handle_quotes(&req.payload).await,
            "history" => self.handle_history(&req.payload).await,
            "subscribe" => self.handle_subscribe(&req).await,
            "unsubscribe" => self.handle_unsubscribe(&req).await,
            "unsubscribe_all" => self.handle_unsubscribe_all(&req).await,
            "set_mode" => self.handle_set_mode(&req).await,
            "list_subscriptions" => self.handle_list_subscriptions(&req).await,
            "get_quote" => self.handle_get_quote(&req).await,
            "whoami" => self.handle_whoami(&req),
            "status" => self.handle_status().await,
            "ping" => Ok(json!({ "event": "pong" })),
            other => Err(GatewayError::InvalidPayload(format!("unrecognized event: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GatewayBuilder;
    use std::collections::{HashMap, HashSet};
    use vortex_core::{GatewayConfig, TenantContext, UpstreamAdapter};
    use vortex_mock::MockUpstreamAdapter;
    use vortex_types::Exchange;

    fn router() -> Arc<GatewayRouter> {
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(MockUpstreamAdapter::new());
        let gateway = GatewayBuilder::new(adapter, GatewayConfig::default()).build();
        Arc::new(GatewayRouter::new(gateway))
    }

    fn tenant() -> TenantContext {
        TenantContext {
            api_key: "key-a".into(),
            tenant_id: "t1".into(),
            rate_limit_per_minute: 60,
            connection_limit: 5,
            entitlements: HashSet::from([Exchange::NseEq]),
            ws_rps_overrides: HashMap::new(),
        }
    }

    fn req_with_tenant(event: &str, payload: Value, client_id: Option<u64>) -> GatewayRequest {
        let mut payload = payload;
        if let Value::Object(ref mut map) = payload {
            map.insert("_tenant".into(), serde_json::to_value(tenant()).unwrap());
        }
        match client_id {
            Some(id) => GatewayRequest::for_connection(Some("key-a".into()), event, payload, id),
            None => GatewayRequest::one_shot(Some("key-a".into()), event, payload),
        }
    }

    #[tokio::test]
    async fn ltp_event_resolves_tokens() {
        let router = router();
        let req = GatewayRequest::one_shot(None, "ltp", json!({ "instruments": [26000] }));
        let resp = router.handle(req).await.unwrap();
        assert_eq!(resp["data"]["26000"]["last_price"], 540.10);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let router = router();
        let resp = router.handle(GatewayRequest::one_shot(None, "ping", Value::Null)).await.unwrap();
        assert_eq!(resp["event"], "pong");
    }

    #[tokio::test]
    async fn subscribe_allows_entitled_exchange_and_forbids_others() {
        let router = router();
        let client = router.gateway.multiplexer().new_client();
        let req = req_with_tenant(
            "subscribe",
            json!({ "subscriptions": [26000, "NSE_FO-135938"], "mode": "ltp" }),
            Some(client.as_u64()),
        );
        let resp = router.handle(req).await.unwrap();
        assert_eq!(resp["included"], json!([26000]));
        assert_eq!(resp["forbidden"], json!([{ "exchange": "NSE_FO", "token": 135938 }]));
        assert_eq!(resp["snapshot"]["26000"]["last_price"], 540.10);
        assert_eq!(resp["mode"], "ltp");
    }

    #[tokio::test]
    async fn list_subscriptions_reflects_an_active_subscribe() {
        let router = router();
        let client = router.gateway.multiplexer().new_client();
        let sub_req = req_with_tenant("subscribe", json!({ "subscriptions": [26000], "mode": "ltp" }), Some(client.as_u64()));
        router.handle(sub_req).await.unwrap();

        let list_req = req_with_tenant("list_subscriptions", Value::Object(serde_json::Map::new()), Some(client.as_u64()));
        let resp = router.handle(list_req).await.unwrap();
        assert_eq!(resp["subscriptions"][0]["pair"], "NSE_EQ-26000");
    }

    #[tokio::test]
    async fn resubscribing_at_a_weaker_mode_downgrades_the_sole_client() {
        let router = router();
        let client = router.gateway.multiplexer().new_client();
        let full_req = req_with_tenant("subscribe", json!({ "subscriptions": [26000], "mode": "full" }), Some(client.as_u64()));
        router.handle(full_req).await.unwrap();
        assert_eq!(router.gateway.multiplexer().list(client).await, vec![(Pair::new(Exchange::NseEq, 26000), Mode::Full)]);

        let ltp_req = req_with_tenant("subscribe", json!({ "subscriptions": [26000], "mode": "ltp" }), Some(client.as_u64()));
        let resp = router.handle(ltp_req).await.unwrap();
        assert_eq!(resp["included"], json!([26000]));
        assert_eq!(
            router.gateway.multiplexer().list(client).await,
            vec![(Pair::new(Exchange::NseEq, 26000), Mode::Ltp)],
            "a resubscribe at a weaker mode must actually downgrade the sole client's own sub, not leave it pinned at the old mode"
        );
    }

    #[tokio::test]
    async fn connection_scoped_event_without_client_id_is_rejected() {
        let router = router();
        let req = req_with_tenant("unsubscribe_all", Value::Object(serde_json::Map::new()), None);
        let err = router.handle(req).await.unwrap_err();
        assert_eq!(err.code(), "internal_error");
    }

    #[tokio::test]
    async fn whoami_reports_the_resolved_tenant() {
        let router = router();
        let req = req_with_tenant("whoami", Value::Object(serde_json::Map::new()), None);
        let resp = router.handle(req).await.unwrap();
        assert_eq!(resp["tenant_id"], "t1");
    }
}
