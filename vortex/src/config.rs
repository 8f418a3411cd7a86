//! Startup configuration loading: environment variables (optionally
//! overridden by a `--config` TOML file) assembled into a `GatewayConfig`.
//!
//! Secrets (`upstream_api_key`, `upstream_auth_token`) always come from the
//! environment, never the TOML file, so a config file can be checked into a
//! deploy repo without leaking credentials.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use vortex_types::{BackoffConfig, BatchConfig, CacheConfig, GateConfig, GatewayConfig, WsConfig};

/// Command-line flags accepted by the gateway binary. Every flag also reads
/// its matching environment variable (`clap`'s `env` feature), so a
/// container deployment can configure the process with no command line at
/// all.
#[derive(Debug, Parser)]
#[command(name = "vortex-gateway", about = "Market-data gateway for tenant clients")]
pub struct Args {
    /// Optional TOML file supplying non-secret defaults; environment
    /// variables still take precedence over anything it sets.
    #[arg(long, env = "VORTEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "UPSTREAM_BASE_URL")]
    upstream_base_url: Option<String>,

    #[arg(long, env = "UPSTREAM_WS_URL")]
    upstream_ws_url: Option<String>,

    #[arg(long, env = "UPSTREAM_API_KEY")]
    upstream_api_key: Option<String>,

    #[arg(long, env = "UPSTREAM_AUTH_TOKEN")]
    upstream_auth_token: Option<String>,

    #[arg(long, env = "BATCH_MAX_CHUNK")]
    batch_max_chunk: Option<usize>,

    #[arg(long, env = "GATE_JITTER_MS")]
    gate_jitter_ms: Option<u32>,

    #[arg(long, env = "MEMORY_CACHE_TTL_MS")]
    memory_cache_ttl_ms: Option<u64>,

    #[arg(long, env = "MEMORY_CACHE_MAX")]
    memory_cache_max: Option<u64>,

    #[arg(long, env = "TICK_CACHE_TTL_MS")]
    tick_cache_ttl_ms: Option<u64>,

    #[arg(long, env = "WS_MAX_SUBS")]
    ws_max_subs: Option<usize>,

    #[arg(long, env = "RECONNECT_MAX_BACKOFF_MS")]
    reconnect_max_backoff_ms: Option<u64>,

    /// Comma-separated `event=rps` pairs, e.g. `subscribe=5,ping=30`.
    #[arg(long, env = "PER_EVENT_RPS")]
    per_event_rps: Option<String>,

    #[arg(long, env = "SNAPSHOT_DEADLINE_MS")]
    snapshot_deadline_ms: Option<u64>,

    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    #[arg(long, env = "COORDINATION_STORE_URL")]
    coordination_store_url: Option<String>,
}

fn parse_per_event_rps(raw: &str) -> HashMap<String, u32> {
    raw.split(',')
        .filter_map(|entry| {
            let (event, rps) = entry.split_once('=')?;
            rps.trim().parse().ok().map(|rps| (event.trim().to_string(), rps))
        })
        .collect()
}

/// A non-secret subset of `GatewayConfig`, the shape a `--config` TOML file
/// is allowed to override. Secrets are deliberately absent.
#[derive(Debug, Default, serde::Deserialize)]
struct FileOverrides {
    upstream_base_url: Option<String>,
    upstream_ws_url: Option<String>,
    batch_max_chunk: Option<usize>,
    gate_jitter_ms: Option<u32>,
    memory_cache_ttl_ms: Option<u64>,
    memory_cache_max: Option<u64>,
    tick_cache_ttl_ms: Option<u64>,
    ws_max_subs: Option<usize>,
    reconnect_max_backoff_ms: Option<u64>,
    per_event_rps: Option<HashMap<String, u32>>,
    snapshot_deadline_ms: Option<u64>,
    listen_addr: Option<String>,
    coordination_store_url: Option<String>,
}

/// Load the gateway's configuration: parse CLI flags/environment, layer a
/// `--config` TOML file's values underneath where a flag was not supplied,
/// and land everything in `vortex_types` defaults otherwise.
///
/// # Errors
/// Returns an error if `--config` was given but the file could not be read
/// or parsed as TOML.
pub fn load(args: Args) -> Result<GatewayConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.clone(), e.to_string()))?;
            toml::from_str::<FileOverrides>(&contents).map_err(|e| ConfigError::Parse(path.clone(), e.to_string()))?
        }
        None => FileOverrides::default(),
    };

    let mut config = GatewayConfig::default();
    config.upstream_base_url = args.upstream_base_url.or(file.upstream_base_url).unwrap_or(config.upstream_base_url);
    config.upstream_ws_url = args.upstream_ws_url.or(file.upstream_ws_url).unwrap_or(config.upstream_ws_url);
    config.upstream_api_key = args.upstream_api_key.unwrap_or(config.upstream_api_key);
    config.upstream_auth_token = args.upstream_auth_token.unwrap_or(config.upstream_auth_token);
    config.listen_addr = args.listen_addr.or(file.listen_addr).unwrap_or(config.listen_addr);
    config.coordination_store_url = args.coordination_store_url.or(file.coordination_store_url);

    config.batch = BatchConfig {
        max_chunk: args.batch_max_chunk.or(file.batch_max_chunk).unwrap_or(config.batch.max_chunk),
        ..config.batch
    };
    config.gate = GateConfig {
        jitter_ms: args.gate_jitter_ms.or(file.gate_jitter_ms).unwrap_or(config.gate.jitter_ms),
        ..config.gate
    };
    config.cache = CacheConfig {
        memory_ttl: args
            .memory_cache_ttl_ms
            .or(file.memory_cache_ttl_ms)
            .map_or(config.cache.memory_ttl, Duration::from_millis),
        memory_max: args.memory_cache_max.or(file.memory_cache_max).unwrap_or(config.cache.memory_max),
        tick_ttl: args
            .tick_cache_ttl_ms
            .or(file.tick_cache_ttl_ms)
            .map_or(config.cache.tick_ttl, Duration::from_millis),
        ..config.cache
    };
    let per_event_rps = args
        .per_event_rps
        .as_deref()
        .map(parse_per_event_rps)
        .or(file.per_event_rps)
        .unwrap_or_default();
    config.ws = WsConfig {
        upstream_ws_url: config.upstream_ws_url.clone(),
        max_subs: args.ws_max_subs.or(file.ws_max_subs).unwrap_or(config.ws.max_subs),
        reconnect_backoff: BackoffConfig {
            max_backoff_ms: args
                .reconnect_max_backoff_ms
                .or(file.reconnect_max_backoff_ms)
                .unwrap_or(config.ws.reconnect_backoff.max_backoff_ms),
            ..config.ws.reconnect_backoff
        },
        per_event_rps,
        ..config.ws
    };
    config.snapshot_deadline = args
        .snapshot_deadline_ms
        .or(file.snapshot_deadline_ms)
        .map_or(config.snapshot_deadline, Duration::from_millis);

    Ok(config)
}

/// Failure loading the `--config` TOML override file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {0:?}: {1}")]
    Read(PathBuf, String),
    /// The file's contents were not valid TOML for the expected shape.
    #[error("failed to parse config file {0:?}: {1}")]
    Parse(PathBuf, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_event_rps_parses_comma_separated_pairs() {
        let parsed = parse_per_event_rps("subscribe=5,ping=30");
        assert_eq!(parsed.get("subscribe"), Some(&5));
        assert_eq!(parsed.get("ping"), Some(&30));
    }

    #[test]
    fn missing_flags_fall_back_to_defaults() {
        let args = Args::parse_from(["vortex-gateway"]);
        let config = load(args).unwrap();
        assert_eq!(config.listen_addr, GatewayConfig::default().listen_addr);
        assert_eq!(config.ws.max_subs, GatewayConfig::default().ws.max_subs);
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let args = Args::parse_from(["vortex-gateway", "--ws-max-subs", "42", "--listen-addr", "127.0.0.1:9000"]);
        let config = load(args).unwrap();
        assert_eq!(config.ws.max_subs, 42);
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
    }
}
