//! Gateway process entry point: load configuration, start the upstream tick
//! ingestor, assemble the `Gateway`, and serve the client-facing HTTP/WS
//! surface until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vortex::config::{self, Args};
use vortex::{
    AppState, Gateway, GatewayBuilder, MultiplexerSnapshot, RedisStore, SharedStore, StaticTenantDirectory,
    TenantDirectory, VortexAdapter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = config::load(args)?;

    let adapter = Arc::new(VortexAdapter::from_config(&config));
    adapter.prepare_ws();
    let control_tx = adapter.control_sender();
    let mut tick_rx = adapter.take_tick_receiver();

    let shared_store = coordination_store(config.coordination_store_url.as_deref());

    let mut builder = GatewayBuilder::new(adapter.clone(), config.clone()).with_control_sender(control_tx);
    if let Some(store) = shared_store {
        builder = builder.with_shared_store(store);
    }
    let gateway: Arc<Gateway> = builder.build();

    // The multiplexer, not `adapter`, is the source of truth for what is
    // currently subscribed; it must exist before the ingestor's supervisor
    // loop starts asking for a replay list on connect and on every reconnect.
    let snapshot = Arc::new(MultiplexerSnapshot(gateway.multiplexer().clone()));
    let stream_handle = adapter.start_ws(snapshot);

    let ingest_gateway = gateway.clone();
    let ingest_task = tokio::spawn(async move {
        while let Some(event) = tick_rx.recv().await {
            ingest_gateway.ingest_tick(event.record).await;
        }
    });

    let directory: Arc<dyn TenantDirectory> = Arc::new(load_tenant_directory());
    let state = AppState::new(gateway, directory);
    let app = vortex::app(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "vortex gateway listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    ingest_task.abort();
    stream_handle.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Connect the gate (C2) and cache (C4) coordination store from
/// `coordination_store_url`. `None` (no url configured, or a connection
/// failure) runs the gateway in local-only degrade mode: a single process's
/// gate and cache tiers no longer agree with its peers.
fn coordination_store(url: Option<&str>) -> Option<Arc<dyn SharedStore>> {
    let url = match url {
        Some(url) => url,
        None => {
            tracing::warn!("no coordination_store_url configured, running in local-only degrade mode");
            return None;
        }
    };
    match RedisStore::new(url) {
        Ok(store) => Some(Arc::new(store) as Arc<dyn SharedStore>),
        Err(err) => {
            tracing::error!(%err, "failed to connect coordination store, running in local-only degrade mode");
            None
        }
    }
}

/// Load the tenant directory from `TENANTS_FILE` (a JSON array of tenant
/// contexts) if set, otherwise an empty directory that rejects every key.
/// Tenant provisioning itself is an external collaborator this gateway only
/// consumes through `TenantDirectory` (see `vortex::tenants`).
fn load_tenant_directory() -> StaticTenantDirectory {
    let Ok(path) = std::env::var("TENANTS_FILE") else {
        return StaticTenantDirectory::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(tenants) => StaticTenantDirectory::from_tenants(tenants),
            Err(err) => {
                tracing::error!(%path, %err, "failed to parse TENANTS_FILE, starting with no tenants");
                StaticTenantDirectory::new()
            }
        },
        Err(err) => {
            tracing::error!(%path, %err, "failed to read TENANTS_FILE, starting with no tenants");
            StaticTenantDirectory::new()
        }
    }
}
