//! Shared HTTP plumbing for gateway adapters: a reqwest client behind a circuit breaker.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::domain::Gateway;
use crate::ports::{GatewayError, GatewayResult};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 30;

/// A provider response that made it through transport. 5xx and 429 never get here.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| GatewayError::Malformed(format!("unexpected response body: {}", e)))
    }
}

#[derive(Clone)]
pub struct GatewayHttp {
    gateway: Gateway,
    client: Client,
    base_url: String,
    circuit_breaker: Breaker,
}

impl GatewayHttp {
    pub fn new(gateway: Gateway, base_url: impl Into<String>) -> Self {
        Self::with_circuit_breaker(
            gateway,
            base_url,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_RESET_TIMEOUT_SECS,
        )
    }

    pub fn with_circuit_breaker(
        gateway: Gateway,
        base_url: impl Into<String>,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            gateway,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            circuit_breaker,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Sends a request through the breaker. Only transient faults count against it.
    pub async fn send(&self, request: RequestBuilder) -> GatewayResult<HttpReply> {
        let gateway = self.gateway;
        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| e.is_retryable(),
                async move {
                    let response = request.send().await.map_err(|e| {
                        GatewayError::Unavailable(format!("{} transport error: {}", gateway, e.without_url()))
                    })?;
                    let status = response.status();
                    let body = response.text().await.map_err(|e| {
                        GatewayError::Unavailable(format!("{} read error: {}", gateway, e.without_url()))
                    })?;

                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(GatewayError::Unavailable(format!(
                            "{} responded with {}",
                            gateway, status
                        )));
                    }
                    Ok(HttpReply { status, body })
                },
            )
            .await;

        match result {
            Ok(reply) => Ok(reply),
            Err(FailsafeError::Rejected) => Err(GatewayError::Unavailable(format!(
                "{} circuit breaker is open",
                self.gateway
            ))),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Maps a non-2xx reply that got past [`send`](Self::send) onto a rejection.
    pub fn rejected(&self, reply: &HttpReply) -> GatewayError {
        GatewayError::Rejected(format!(
            "{} responded with {}",
            self.gateway, reply.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls_without_double_slashes() {
        let http = GatewayHttp::new(Gateway::Stripe, "https://api.stripe.com/");
        assert_eq!(http.url("/v1/refunds"), "https://api.stripe.com/v1/refunds");
        assert_eq!(http.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ping")
            .with_status(503)
            .create_async()
            .await;

        let http = GatewayHttp::new(Gateway::Octo, server.url());
        let err = http.send(http.client().get(http.url("/ping"))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn client_errors_pass_through_as_replies() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ping")
            .with_status(400)
            .with_body(r#"{"error":"bad"}"#)
            .create_async()
            .await;

        let http = GatewayHttp::new(Gateway::Octo, server.url());
        let reply = http.send(http.client().get(http.url("/ping"))).await.unwrap();
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(matches!(http.rejected(&reply), GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ping")
            .with_status(500)
            .expect_at_least(2)
            .create_async()
            .await;

        let http = GatewayHttp::with_circuit_breaker(
            Gateway::Click,
            server.url(),
            Duration::from_secs(5),
            2,
            60,
        );
        for _ in 0..2 {
            let _ = http.send(http.client().get(http.url("/ping"))).await;
        }

        assert_eq!(http.circuit_state(), "open");
        let err = http.send(http.client().get(http.url("/ping"))).await.unwrap_err();
        assert!(err.to_string().contains("circuit breaker is open"));
    }
}
