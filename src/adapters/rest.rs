//! Governed JSON REST client
//!
//! Every request first acquires its endpoint's budget from the shared
//! [`RateGovernor`], then goes out over a pooled `reqwest::Client`. Retry
//! and circuit-breaking are left to callers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::constants;
use crate::core::logging::{redact_payload, sanitize};
use crate::core::rate_limit::RateGovernor;

/// Header carrying the API key, when one is configured
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// JSON-over-HTTP client that asks the governor before each call
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    governor: Arc<RateGovernor>,
    api_key: Option<String>,
    timeout: Duration,
}

impl RestClient {
    /// Client with the default timeout (`HTTP_TIMEOUT_MS`)
    pub fn new(base_url: impl Into<String>, governor: Arc<RateGovernor>) -> ExchangeResult<Self> {
        Self::with_timeout(base_url, governor, constants::http_timeout())
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        governor: Arc<RateGovernor>,
        timeout: Duration,
    ) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "REST client configured");

        Ok(Self {
            http,
            base_url,
            governor,
            api_key: None,
            timeout,
        })
    }

    /// Send `key` in the `X-API-KEY` header of every request
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(api_key = %sanitize(&key), "REST API key set");
        self.api_key = Some(key);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// GET `path`, charged to `endpoint`
    pub async fn get_json(&self, endpoint: &str, path: &str) -> ExchangeResult<Value> {
        let request = self.request(Method::GET, path);
        self.execute(endpoint, path, request).await
    }

    /// POST `body` to `path`, charged to `endpoint`
    pub async fn post_json(&self, endpoint: &str, path: &str, body: &Value) -> ExchangeResult<Value> {
        debug!(endpoint = %endpoint, path = %path, body = %redact_payload(body), "POST");
        let request = self.request(Method::POST, path).json(body);
        self.execute(endpoint, path, request).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn execute(&self, endpoint: &str, path: &str, request: RequestBuilder) -> ExchangeResult<Value> {
        self.governor.acquire(endpoint).await;

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            warn!(endpoint = %endpoint, path = %path, status = %status, "REST request rejected");
            return Err(ExchangeError::InvalidResponse(format!(
                "HTTP {} from {}: {}",
                status, path, text
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid JSON from {}: {}", path, e)))
    }

    fn map_send_error(&self, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::NetworkTimeout(self.timeout.as_millis() as u64)
        } else {
            err.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use mockito::Matcher;
    use serde_json::json;

    fn governor() -> Arc<RateGovernor> {
        Arc::new(
            RateGovernor::new(RateLimitConfig::per_window(10, 1000).with_weight("place_order", 3.0))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_get_json_parses_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/markets")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"markets":["BTC-PERP","ETH-PERP"]}"#)
            .create_async()
            .await;

        let client = RestClient::new(server.url(), governor()).unwrap();
        let body = client.get_json("markets", "/v1/markets").await.unwrap();

        assert_eq!(body["markets"][1], "ETH-PERP");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_json_sends_body_and_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/orders")
            .match_header(API_KEY_HEADER, "key-1234567890")
            .match_body(Matcher::Json(json!({"market": "BTC-PERP", "size": "0.1"})))
            .with_status(201)
            .with_body(r#"{"id":"ord-1"}"#)
            .create_async()
            .await;

        let client = RestClient::new(format!("{}/", server.url()), governor())
            .unwrap()
            .with_api_key("key-1234567890");
        let body = client
            .post_json("place_order", "v1/orders", &json!({"market": "BTC-PERP", "size": "0.1"}))
            .await
            .unwrap();

        assert_eq!(body["id"], "ord-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_each_call_spends_endpoint_weight() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/orders")
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let governor = governor();
        let client = RestClient::new(server.url(), Arc::clone(&governor)).unwrap();
        client.post_json("place_order", "/v1/orders", &json!({})).await.unwrap();
        client.post_json("place_order", "/v1/orders", &json!({})).await.unwrap();

        // 10 - 2 * 3, plus at most a little refill during the round trips
        let left = governor.available_tokens().await;
        assert!((4.0..5.0).contains(&left), "left = {}", left);
    }

    #[tokio::test]
    async fn test_error_status_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/account")
            .with_status(401)
            .with_body("Unauthorized")
            .create_async()
            .await;

        let client = RestClient::new(server.url(), governor()).unwrap();
        let err = client.get_json("account", "/v1/account").await.unwrap_err();

        match err {
            ExchangeError::InvalidResponse(msg) => {
                assert!(msg.contains("401"), "Got: {}", msg);
                assert!(msg.contains("Unauthorized"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/ticker")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = RestClient::new(server.url(), governor()).unwrap();
        let err = client.get_json("ticker", "/v1/ticker").await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"), "Got: {}", err);
    }

    #[tokio::test]
    async fn test_empty_body_is_null() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/cancel_all")
            .with_status(204)
            .create_async()
            .await;

        let client = RestClient::new(server.url(), governor()).unwrap();
        let body = client.post_json("cancel_all", "/v1/cancel_all", &json!({})).await.unwrap();
        assert!(body.is_null());
    }
}
