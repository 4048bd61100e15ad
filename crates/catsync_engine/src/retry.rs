//! Retry decisions with exponential backoff.

use crate::config::RetryConfig;
use crate::error::{PlatformError, SyncResult};
use catsync_model::Operation;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// What happens to a failed operation.
#[derive(Debug)]
pub enum RetryDecision {
    /// Re-enqueue; the operation carries its new `scheduled_at`.
    Retry {
        /// The rescheduled operation.
        operation: Operation,
        /// Backoff applied.
        delay: Duration,
    },
    /// Give up; the operation carries `completed_at` and `error`.
    Terminal {
        /// The failed operation.
        operation: Operation,
    },
}

/// Decides between retry and terminal failure.
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Creates a retry manager.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before the attempt following retry number `retry_count`.
    ///
    /// Rate-limit failures wait `rate_limit_multiplier` times longer and never
    /// less than the platform's hint.
    pub fn delay_for(&self, retry_count: u32, error: &PlatformError) -> Duration {
        let delay = self.config.delay_for_retry(retry_count);
        if !error.is_rate_limit() {
            return delay;
        }
        let factor = self.config.rate_limit_multiplier;
        let scaled = delay.saturating_mul(factor);
        let ceiling = self.config.max_delay.saturating_mul(factor);
        scaled
            .max(error.retry_after().unwrap_or_default())
            .min(ceiling.max(error.retry_after().unwrap_or_default()))
    }

    /// Applies the retry policy to a failed operation.
    pub fn handle_failure(
        &self,
        mut operation: Operation,
        failure: &PlatformError,
        now: Instant,
    ) -> SyncResult<RetryDecision> {
        let message = failure.to_string();

        if failure.is_retryable() && operation.can_retry() {
            let delay = self.delay_for(operation.retry_count() + 1, failure);
            operation.note_error(message)?;
            let attempt = operation.record_retry(now + delay)?;
            warn!(
                operation = %operation.id(),
                kind = %operation.kind(),
                retry = attempt,
                max_retries = operation.max_retries(),
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "operation failed, retrying"
            );
            return Ok(RetryDecision::Retry { operation, delay });
        }

        operation.fail(message, now)?;
        error!(
            operation = %operation.id(),
            kind = %operation.kind(),
            retries = operation.retry_count(),
            error = %failure,
            "operation failed permanently"
        );
        Ok(RetryDecision::Terminal { operation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_model::{OperationKind, Payload, Priority};

    fn manager() -> RetryManager {
        RetryManager::new(RetryConfig::new(3).with_base_delay(Duration::from_secs(1)))
    }

    fn op() -> Operation {
        Operation::new(OperationKind::Update, vec![1], Priority::Normal, Payload::new())
            .unwrap()
            .with_max_retries(3)
    }

    #[test]
    fn three_retries_then_terminal() {
        let manager = manager();
        let now = Instant::now();
        let mut operation = op();
        let mut delays = Vec::new();

        loop {
            match manager
                .handle_failure(operation, &PlatformError::Timeout, now)
                .unwrap()
            {
                RetryDecision::Retry { operation: next, delay } => {
                    assert_eq!(next.scheduled_at(), Some(now + delay));
                    assert!(!next.is_completed());
                    delays.push(delay);
                    operation = next;
                }
                RetryDecision::Terminal { operation: last } => {
                    assert_eq!(last.retry_count(), 3);
                    assert_eq!(last.completed_at(), Some(now));
                    assert_eq!(last.error(), Some("request timed out"));
                    break;
                }
            }
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn permanent_failures_are_terminal_immediately() {
        let decision = manager()
            .handle_failure(
                op(),
                &PlatformError::Validation("bad price".into()),
                Instant::now(),
            )
            .unwrap();
        let RetryDecision::Terminal { operation } = decision else {
            panic!("validation errors must not retry");
        };
        assert_eq!(operation.retry_count(), 0);
        assert!(operation.is_completed());
    }

    #[test]
    fn rate_limits_back_off_harder() {
        let manager = manager();
        let throttled = PlatformError::rate_limited("429");
        assert_eq!(manager.delay_for(1, &PlatformError::Timeout), Duration::from_secs(2));
        assert_eq!(manager.delay_for(1, &throttled), Duration::from_secs(8));

        let hinted = PlatformError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(manager.delay_for(1, &hinted), Duration::from_secs(30));
        assert_eq!(manager.delay_for(20, &throttled), Duration::from_secs(240));
    }
}
