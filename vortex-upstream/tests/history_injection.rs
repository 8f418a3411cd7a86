use std::time::Duration;

use vortex_core::{HistoryRequest, Pair};
use vortex_types::Exchange;
use vortex_upstream::UpstreamHttpClient;

#[tokio::test]
async fn history_decodes_candles_and_builds_expected_query() {
    let server = httpmock::MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(httpmock::Method::GET)
            .path("/data/history")
            .query_param("exchange", "NSE_EQ")
            .query_param("token", "22")
            .query_param("resolution", "day");
        then.status(200).json_body(serde_json::json!([
            {"t": 1, "o": 1.0, "h": 1.5, "l": 0.5, "c": 1.2, "v": 100},
            {"t": 2, "o": 1.2, "h": 1.6, "l": 1.0, "c": 1.4, "v": 200},
        ]));
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let pair = Pair::new(Exchange::NseEq, 22);
    let req = HistoryRequest { from: 0, to: 10, resolution: "day" };
    let candles = client.history(pair, req).await.unwrap();

    mock.assert();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].volume, 100);
    assert!((candles[1].ohlc.close - 1.4).abs() < 1e-9);
}

#[tokio::test]
async fn history_propagates_transient_error_on_server_failure() {
    let server = httpmock::MockServer::start();
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/data/history");
        then.status(503);
    });

    let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
    let pair = Pair::new(Exchange::NseEq, 22);
    let req = HistoryRequest { from: 0, to: 10, resolution: "day" };
    let err = client.history(pair, req).await.unwrap_err();
    assert!(err.is_transient());
}
