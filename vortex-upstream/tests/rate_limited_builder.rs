use vortex_core::UpstreamAdapter as _;
use vortex_types::GatewayConfig;
use vortex_upstream::VortexAdapter;

#[test]
fn from_config_builds_an_adapter_named_vortex() {
    let mut config = GatewayConfig::default();
    config.upstream_base_url = "https://api.vortex.example/data".into();
    config.upstream_ws_url = "wss://ws.vortex.example/feed".into();
    config.upstream_api_key = "key".into();
    config.upstream_auth_token = "token".into();

    let adapter = VortexAdapter::from_config(&config);
    assert_eq!(adapter.name(), "vortex");
}

#[test]
#[should_panic(expected = "prepare_ws must be called")]
fn control_sender_panics_before_connect() {
    let config = GatewayConfig::default();
    let adapter = VortexAdapter::from_config(&config);
    let _ = adapter.control_sender();
}
