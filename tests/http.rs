#![cfg(feature = "http")]
#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::time::Duration;

use etoro_client_sdk::config::Config;
use etoro_client_sdk::error::{Kind, RateLimited, Status};
use etoro_client_sdk::http::Client;
use etoro_client_sdk::rate_limit::RateLimitConfig;
use httpmock::Method::{DELETE, GET, POST};
use httpmock::MockServer;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

fn client(server: &MockServer, retry_attempts: u32) -> Client {
    let mut config = Config::new("test-api-key", "test-user-key").unwrap();
    config.base_url = server.base_url();
    config.retry_attempts = retry_attempts;
    config.retry_delay = Duration::from_millis(10);
    config.rate_limit = Some(RateLimitConfig::new(100, Duration::from_secs(1)));
    Client::new(&config).unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Watchlist {
    watchlist_id: String,
    name: String,
}

#[derive(Serialize)]
struct Search<'a> {
    #[serde(rename = "internalSymbolFull")]
    symbol: &'a str,
    #[serde(rename = "pageSize")]
    page_size: u32,
}

mod success {
    use super::*;

    #[tokio::test]
    async fn get_sends_credentials_and_decodes_json() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 1);

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/watchlists/w1")
                .header("x-api-key", "test-api-key")
                .header("x-user-key", "test-user-key")
                .header_exists("x-request-id");
            then.status(StatusCode::OK).json_body(json!({
                "watchlistId": "w1",
                "name": "Tech"
            }));
        });

        let watchlist: Option<Watchlist> = client.get("/api/v1/watchlists/w1").await?;

        assert_eq!(
            watchlist,
            Some(Watchlist {
                watchlist_id: "w1".to_owned(),
                name: "Tech".to_owned(),
            })
        );
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn query_parameters_are_encoded() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 1);

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/market-data/search")
                .query_param("internalSymbolFull", "AAPL")
                .query_param("pageSize", "5");
            then.status(StatusCode::OK)
                .json_body(json!({ "items": [] }));
        });

        let query = Search {
            symbol: "AAPL",
            page_size: 5,
        };
        let response: Option<Value> = client
            .get_with_query("/api/v1/market-data/search", &query)
            .await?;

        assert_eq!(response, Some(json!({ "items": [] })));
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn post_sends_json_body() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 1);

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/watchlists")
                .json_body(json!({ "name": "Tech" }));
            then.status(StatusCode::CREATED).json_body(json!({
                "watchlistId": "w2",
                "name": "Tech"
            }));
        });

        let created: Option<Watchlist> = client
            .post("/api/v1/watchlists", &json!({ "name": "Tech" }))
            .await?;

        assert_eq!(created.unwrap().watchlist_id, "w2");
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn no_content_is_none() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 1);

        let mock = server.mock(|when, then| {
            when.method(DELETE).path("/api/v1/watchlists/w1");
            then.status(StatusCode::NO_CONTENT);
        });

        let response: Option<Value> = client.delete("/api/v1/watchlists/w1").await?;

        assert_eq!(response, None);
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn empty_body_is_none() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 1);

        server.mock(|when, then| {
            when.method(GET).path("/api/v1/empty");
            then.status(StatusCode::OK).body("");
        });

        let response: Option<Value> = client.get("/api/v1/empty").await?;

        assert_eq!(response, None);

        Ok(())
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start();
        let client = client(&server, 3);

        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/watchlists");
            then.status(StatusCode::UNAUTHORIZED);
        });

        let error = client
            .get::<Value>("/api/v1/watchlists")
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::Authentication);
        assert_eq!(error.downcast_ref::<Status>().unwrap().status_code, 401);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let server = MockServer::start();
        let client = client(&server, 3);

        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/market-data/instruments");
            then.status(StatusCode::BAD_GATEWAY).body("upstream down");
        });

        let error = client
            .get::<Value>("/api/v1/market-data/instruments")
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::Status);
        let status = error.downcast_ref::<Status>().unwrap();
        assert_eq!(status.status_code, 502);
        assert_eq!(status.method, "GET");
        assert_eq!(status.path, "/api/v1/market-data/instruments");
        assert_eq!(status.message, "upstream down");
        mock.assert_calls(3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start();
        let client = client(&server, 3);

        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/v1/watchlists");
            then.status(StatusCode::BAD_REQUEST)
                .json_body(json!({ "error": "name required" }));
        });

        let error = client
            .post::<Value, _>("/api/v1/watchlists", &json!({}))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::Status);
        assert_eq!(error.downcast_ref::<Status>().unwrap().status_code, 400);
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn rate_limit_penalizes_the_limiter() {
        let server = MockServer::start();
        let client = client(&server, 1);

        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/watchlists");
            then.status(StatusCode::TOO_MANY_REQUESTS)
                .header("Retry-After", "30");
        });

        let error = client
            .get::<Value>("/api/v1/watchlists")
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::RateLimit);
        assert_eq!(
            error.downcast_ref::<RateLimited>().unwrap().retry_after,
            Some(Duration::from_secs(30))
        );
        assert!(client.rate_limiter().unwrap().is_penalized());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn rate_limited_request_waits_for_retry_after_then_succeeds() -> anyhow::Result<()> {
        let server = MockServer::start();
        let client = client(&server, 2);

        let mut limited = server.mock(|when, then| {
            when.method(GET).path("/api/v1/watchlists");
            then.status(StatusCode::TOO_MANY_REQUESTS)
                .header("Retry-After", "1");
        });

        let start = Instant::now();
        let request = tokio::spawn(async move { client.get::<Value>("/api/v1/watchlists").await });

        while limited.calls() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
        limited.delete();
        let accepted = server.mock(|when, then| {
            when.method(GET).path("/api/v1/watchlists");
            then.status(StatusCode::OK)
                .json_body(json!({ "items": [] }));
        });

        let response = request.await??;
        let elapsed = start.elapsed();

        assert_eq!(response, Some(json!({ "items": [] })));
        // The server's wait is used as-is: no backoff delay and no jitter on top.
        assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_500), "{elapsed:?}");
        accepted.assert_calls(1);

        Ok(())
    }

    #[tokio::test]
    async fn invalid_json_is_an_internal_error() {
        let server = MockServer::start();
        let client = client(&server, 1);

        server.mock(|when, then| {
            when.method(GET).path("/api/v1/broken");
            then.status(StatusCode::OK).body("{not json");
        });

        let error = client.get::<Value>("/api/v1/broken").await.unwrap_err();

        assert_eq!(error.kind(), Kind::Internal);
    }
}

#[tokio::test]
async fn close_disposes_the_limiter() {
    let server = MockServer::start();
    let client = client(&server, 1);

    client.close();

    assert!(client.rate_limiter().unwrap().is_disposed());
}
