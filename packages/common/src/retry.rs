use std::time::Duration;

use crate::envelope::JobEnvelope;
use crate::error::ErrorType;

/// Action to take after a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Run the handler once more in place, without a broker round-trip.
    ImmediateRetry,
    /// Republish to the origin queue after an exponential backoff.
    Requeue,
    /// Divert to the dead-letter queue.
    Dlq,
}

/// Pick the retry tier for a classified failure.
///
/// Transient failures get one free in-place retry. Permanent failures and
/// exhausted budgets go to the DLQ. Everything else requeues with backoff.
pub fn decide(
    envelope: &JobEnvelope,
    error_type: ErrorType,
    already_immediately_retried: bool,
) -> RetryAction {
    if error_type == ErrorType::Transient && !already_immediately_retried {
        return RetryAction::ImmediateRetry;
    }

    if error_type == ErrorType::Permanent {
        return RetryAction::Dlq;
    }

    if envelope.is_max_retries_exceeded() {
        return RetryAction::Dlq;
    }

    RetryAction::Requeue
}

/// Exponential backoff before the Nth requeue: `2^retry_count` seconds.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn envelope(retry_count: u32, max_retries: u32) -> JobEnvelope {
        let mut env = JobEnvelope::new("j1", Map::new()).with_max_retries(max_retries);
        env.retry_count = retry_count;
        env
    }

    #[test]
    fn test_transient_gets_one_immediate_retry() {
        let env = envelope(0, 3);
        assert_eq!(
            decide(&env, ErrorType::Transient, false),
            RetryAction::ImmediateRetry
        );
        assert_eq!(
            decide(&env, ErrorType::Transient, true),
            RetryAction::Requeue
        );
    }

    #[test]
    fn test_permanent_goes_straight_to_dlq() {
        let env = envelope(0, 3);
        assert_eq!(decide(&env, ErrorType::Permanent, false), RetryAction::Dlq);
        assert_eq!(decide(&env, ErrorType::Permanent, true), RetryAction::Dlq);
    }

    #[test]
    fn test_retriable_requeues_while_budget_remains() {
        assert_eq!(
            decide(&envelope(0, 3), ErrorType::Retriable, false),
            RetryAction::Requeue
        );
        assert_eq!(
            decide(&envelope(2, 3), ErrorType::Retriable, false),
            RetryAction::Requeue
        );
    }

    #[test]
    fn test_exhausted_budget_goes_to_dlq() {
        assert_eq!(
            decide(&envelope(3, 3), ErrorType::Retriable, false),
            RetryAction::Dlq
        );
        // Transient after its immediate retry also respects the budget.
        assert_eq!(
            decide(&envelope(3, 3), ErrorType::Transient, true),
            RetryAction::Dlq
        );
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        // A corrupt retry_count must not panic the worker.
        assert_eq!(backoff_delay(200), Duration::from_secs(u64::MAX));
    }
}
