//! Bounded exponential backoff around gateway calls

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GatewayOutcome, GatewayRequest, LlmGateway};

/// Retry settings for one dispatcher call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubled for each later one
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following failed attempt number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Call the gateway, retrying 429 and 5xx failures up to `max_attempts` times
    pub async fn complete(
        &self,
        gateway: &dyn LlmGateway,
        request: &GatewayRequest,
    ) -> GatewayOutcome {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = gateway.complete(request).await;
            let failure = match &outcome {
                GatewayOutcome::Success { .. } => {
                    debug!(attempt, "Gateway call succeeded");
                    return outcome;
                }
                GatewayOutcome::Failure(failure) => failure,
            };

            if !failure.is_retryable() {
                warn!(attempt, status = ?failure.status, "Gateway failure is not retryable");
                return outcome;
            }
            if attempt >= max_attempts {
                warn!(attempt, status = ?failure.status, "Gateway retries exhausted");
                return outcome;
            }

            let delay = self.backoff(attempt) + self.jitter();
            warn!(
                attempt,
                status = ?failure.status,
                delay_ms = delay.as_millis() as u64,
                "Retrying gateway call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
