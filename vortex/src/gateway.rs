//! Client-facing gateway (C8): the axum HTTP/WebSocket surface wrapping the
//! event router in its auth/rate-limit middleware chain.
//!
//! The HTTP snapshot endpoints (`/ltp`, `/quotes`, `/historical/:token`)
//! issue one-shot `GatewayRequest`s; the `/ws` upgrade owns a long-lived
//! connection, structured after the tick ingestor's own connect → split
//! sink/stream → spawn-a-writer-task shape (`vortex_upstream::ws`): a writer
//! task drains the connection's `OutboundQueue` onto the socket while the
//! accept task's read loop turns incoming frames into connection-scoped
//! `GatewayRequest`s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
#[cfg(feature = "tracing")]
use tracing::{info, warn};

use vortex_core::middleware::{GatewayRequest, RequestHandler};
use vortex_core::{GatewayError, TenantContext};
use vortex_middleware::HandlerBuilder;

use crate::core::Gateway;
use crate::middleware::{AuthMiddleware, RateLimitMiddleware};
use crate::outbound::OutboundQueue;
use crate::router::GatewayRouter;
use crate::tenants::TenantDirectory;

/// Tracks live WebSocket connection counts per tenant so accept-time can
/// enforce `TenantContext::connection_limit` (§4.8). A plain counting map
/// rather than a set of connection ids: the gateway never needs to name a
/// tenant's individual connections, only bound how many are open at once.
#[derive(Default)]
struct ConnectionTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl ConnectionTracker {
    /// Attempt to reserve one connection slot for `tenant_id`, rejecting if
    /// `limit` is already reached.
    fn try_acquire(&self, tenant_id: &str, limit: u32) -> Result<(), GatewayError> {
        let mut counts = self.counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let current = counts.entry(tenant_id.to_string()).or_insert(0);
        if *current >= limit {
            return Err(GatewayError::CapacityExceeded {
                what: format!("tenant {tenant_id} connection limit ({limit}) reached"),
            });
        }
        *current += 1;
        Ok(())
    }

    fn release(&self, tenant_id: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(current) = counts.get_mut(tenant_id) {
            *current = current.saturating_sub(1);
        }
    }
}

/// Shared state handed to every axum handler: the middleware-wrapped
/// router and the gateway core the WS handler also reaches into directly
/// for connection lifecycle (register/remove connection, accept-time
/// tenant resolution and connection-cap enforcement).
#[derive(Clone)]
pub struct AppState {
    handler: Arc<dyn RequestHandler>,
    gateway: Arc<Gateway>,
    directory: Arc<dyn TenantDirectory>,
    connections: Arc<ConnectionTracker>,
}

impl AppState {
    /// Assemble the app state: wraps the event router in
    /// `RateLimitMiddleware` then `AuthMiddleware` (added last, so it runs
    /// outermost — see `middleware::tests` for the ordering convention).
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, directory: Arc<dyn TenantDirectory>) -> Self {
        let default_rps = gateway.config().ws.per_event_rps.clone();
        let router = Arc::new(GatewayRouter::new(gateway.clone()));
        let handler = HandlerBuilder::new(router)
            .with_layer(RateLimitMiddleware::new(default_rps))
            .with_layer(AuthMiddleware::new(directory.clone()))
            .build()
            .expect("middleware stack must validate: auth precedes rate-limit");
        Self { handler, gateway, directory, connections: Arc::new(ConnectionTracker::default()) }
    }
}

/// Build the axum router: snapshot HTTP endpoints plus the `/ws` upgrade.
#[must_use]
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ltp", post(post_ltp))
        .route("/quotes", post(post_quotes))
        .route("/historical/:token", get(get_historical))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

fn api_key_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err.code() {
        "missing_api_key" | "invalid_api_key" => StatusCode::UNAUTHORIZED,
        "forbidden_exchange" => StatusCode::FORBIDDEN,
        "rate_limited" | "upstream_throttled" => StatusCode::TOO_MANY_REQUESTS,
        "capacity_exceeded" => StatusCode::SERVICE_UNAVAILABLE,
        "invalid_payload" | "invalid_mode" => StatusCode::BAD_REQUEST,
        "request_timeout" => StatusCode::GATEWAY_TIMEOUT,
        "upstream_transient" | "upstream_malformed" | "upstream_auth_expired" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: GatewayError) -> Response {
    let status = status_for(&err);
    (status, Json(json!({ "error": { "code": err.code(), "message": err.to_string() } }))).into_response()
}

async fn dispatch_one_shot(state: &AppState, api_key: Option<String>, event: &str, payload: Value) -> Response {
    let req = GatewayRequest::one_shot(api_key, event, payload);
    match state.handler.handle(req).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => error_response(err),
    }
}

async fn post_ltp(State(state): State<AppState>, headers: axum::http::HeaderMap, Json(body): Json<Value>) -> Response {
    dispatch_one_shot(&state, api_key_from_headers(&headers), "ltp", body).await
}

async fn post_quotes(State(state): State<AppState>, headers: axum::http::HeaderMap, Json(body): Json<Value>) -> Response {
    dispatch_one_shot(&state, api_key_from_headers(&headers), "quotes", body).await
}

async fn get_historical(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Path(token): Path<u32>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let exchange = params.get("exchange").cloned().unwrap_or_default();
    let payload = json!({
        "pair": format!("{exchange}-{token}"),
        "from": params.get("from").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
        "to": params.get("to").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
        "interval": params.get("interval").cloned().unwrap_or_else(|| "day".to_string()),
    });
    dispatch_one_shot(&state, api_key_from_headers(&headers), "history", payload).await
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let api_key = params.get("api_key").cloned();

    let tenant = match api_key {
        Some(ref key) => match state.directory.resolve(key).await {
            Ok(tenant) => tenant,
            Err(err) => return error_response(err),
        },
        None => return error_response(GatewayError::MissingApiKey),
    };
    if let Err(err) = state.connections.try_acquire(&tenant.tenant_id, tenant.connection_limit) {
        return error_response(err);
    }

    ws.on_upgrade(move |socket| handle_ws_connection(state, tenant, socket))
}

/// Frames queued onto the socket writer: either a fanned-out tick or a
/// direct reply to one of this connection's own requests. Merging both
/// onto one `mpsc` channel keeps a single task owning the sink half, since
/// `WebSocket::split` hands out only one sender.
enum OutFrame {
    Tick(vortex_core::TickRecord),
    Reply(Value),
}

async fn handle_ws_connection(state: AppState, tenant: TenantContext, socket: WebSocket) {
    let api_key = Some(tenant.api_key.clone());
    let client = state.gateway.multiplexer().new_client();
    let client_id = client.as_u64();
    let capacity = state.gateway.config().ws.outbound_queue_capacity;
    let queue = Arc::new(OutboundQueue::new(capacity));
    state.gateway.multiplexer().register_connection(client, queue.clone()).await;

    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();

    let welcome = json!({
        "event": "welcome",
        "protocol_version": 1,
        "allowed_exchanges": tenant.entitlements.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
        "limits": {
            "outbound_queue_capacity": capacity,
            "rate_limit_per_minute": tenant.rate_limit_per_minute,
            "connection_limit": tenant.connection_limit,
        },
        "tenant": { "tenant_id": tenant.tenant_id },
    });
    if sink.send(Message::Text(welcome.to_string())).await.is_err() {
        state.gateway.multiplexer().remove_connection(client).await;
        state.connections.release(&tenant.tenant_id);
        return;
    }

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                tick = queue.pop() => OutFrame::Tick(tick),
                reply = reply_rx.recv() => match reply {
                    Some(value) => OutFrame::Reply(value),
                    None => break,
                },
            };
            let text = match frame {
                OutFrame::Tick(tick) => {
                    json!({ "event": "tick", "token": tick.token(), "last_price": tick.last_price() }).to_string()
                }
                OutFrame::Reply(value) => value.to_string(),
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let Some(event) = parsed.get("event").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let payload = parsed.get("payload").cloned().unwrap_or(Value::Null);
        let req = GatewayRequest::for_connection(api_key.clone(), event.clone(), payload, client_id);
        let reply = match state.handler.handle(req).await {
            Ok(mut value) => {
                if let Value::Object(ref mut map) = value {
                    map.entry("event").or_insert_with(|| Value::String(event.clone()));
                }
                value
            }
            Err(err) => json!({ "event": event, "error": { "code": err.code(), "message": err.to_string() } }),
        };
        #[cfg(feature = "tracing")]
        info!(client = client_id, %event, "handled ws event");
        if reply_tx.send(reply).is_err() {
            break;
        }
    }

    writer.abort();
    state.gateway.multiplexer().unregister_all(client).await;
    state.gateway.multiplexer().remove_connection(client).await;
    state.connections.release(&tenant.tenant_id);
    #[cfg(feature = "tracing")]
    warn!(client = client_id, "ws connection closed");
}
