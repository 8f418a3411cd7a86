use vortex_core::GatewayError;

#[test]
fn exchange_unresolved_carries_token_and_code() {
    let err = GatewayError::exchange_unresolved(9_999_999);
    assert_eq!(err.code(), "exchange_unresolved");
    assert!(err.to_string().contains("9999999"));
}

#[test]
fn forbidden_exchange_carries_code() {
    let err = GatewayError::forbidden_exchange("NFO", 135_938);
    assert_eq!(err.code(), "forbidden_exchange");
}

#[test]
fn upstream_transient_is_retryable_but_others_are_not() {
    assert!(GatewayError::UpstreamTransient("timeout".into()).is_transient());
    assert!(!GatewayError::MissingApiKey.is_transient());
    assert!(!GatewayError::exchange_unresolved(1).is_transient());
}

#[test]
fn rate_limited_round_trips_through_serde() {
    let err = GatewayError::rate_limited(60, 60_000);
    let json = serde_json::to_string(&err).unwrap();
    let back: GatewayError = serde_json::from_str(&json).unwrap();
    assert_eq!(err, back);
}
