//! Bounded retry of gateway calls. Every attempt reuses the caller's
//! idempotency key, so a retried call has at most one economic effect.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::BillingSettings;
use crate::domain::Gateway;
use crate::ports::{GatewayError, GatewayResult};

const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &BillingSettings) -> Self {
        Self {
            attempts: settings.gateway_retry_attempts.max(1),
            base_delay: settings.gateway_retry_base,
            timeout: settings.gateway_timeout,
        }
    }

    /// Exponential delay before attempt `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Runs `call` under the per-attempt timeout, retrying only `Unavailable`.
    pub async fn run<T, F, Fut>(
        &self,
        gateway: Gateway,
        operation: &'static str,
        mut call: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Unavailable(format!(
                    "{} {} timed out after {:?}",
                    gateway, operation, self.timeout
                ))),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let backoff = self.delay(attempt);
                    warn!(
                        gateway = %gateway,
                        operation,
                        attempt,
                        error = %e,
                        "Gateway call failed. Retrying in {:?}",
                        backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
