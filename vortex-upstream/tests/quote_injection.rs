use std::time::Duration;

use vortex_types::Exchange;
use vortex_upstream::UpstreamHttpClient;

#[tokio::test]
async fn resolve_token_maps_known_token_to_exchange() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/instrument/26000");
        then.status(200)
            .json_body(serde_json::json!({"exchange": "NSE_EQ"}));
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let exchange = client.resolve_token(26000).await.unwrap();
    assert_eq!(exchange, Some(Exchange::NseEq));
}

#[tokio::test]
async fn resolve_token_returns_none_on_404() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/instrument/9999999");
        then.status(404);
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let exchange = client.resolve_token(9_999_999).await.unwrap();
    assert_eq!(exchange, None);
}

#[tokio::test]
async fn quotes_injects_auth_headers() {
    let server = httpmock::MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/data/quotes")
            .header("x-api-key", "my-key")
            .header("authorization", "Bearer my-token");
        then.status(200)
            .json_body(serde_json::json!({"NSE_EQ-22": {"last_trade_price": 10.0}}));
    });

    let client = UpstreamHttpClient::new(server.base_url(), "my-key", "my-token", Duration::from_secs(1));
    let pairs = [vortex_core::Pair::new(Exchange::NseEq, 22)];
    let _ = client.quotes(&pairs, vortex_types::Mode::Ltp).await.unwrap();
    mock.assert();
}
