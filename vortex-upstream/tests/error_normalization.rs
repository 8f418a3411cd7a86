use std::time::Duration;

use vortex_core::GatewayError;
use vortex_types::{Exchange, Mode};
use vortex_upstream::UpstreamHttpClient;

#[tokio::test]
async fn forbidden_status_maps_to_auth_expired() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/quotes");
        then.status(403);
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let pairs = [vortex_core::Pair::new(Exchange::NseEq, 22)];
    let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
    assert_eq!(err, GatewayError::UpstreamAuthExpired);
}

#[tokio::test]
async fn unexpected_client_error_maps_to_malformed() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/quotes");
        then.status(418);
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let pairs = [vortex_core::Pair::new(Exchange::NseEq, 22)];
    let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamMalformed(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unparseable_body_maps_to_malformed() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/quotes");
        then.status(200).body("not json");
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let pairs = [vortex_core::Pair::new(Exchange::NseEq, 22)];
    let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamMalformed(_)));
}
