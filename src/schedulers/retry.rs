use std::time::Duration;

use crate::node::NodeError;

/// Exponential-backoff retry policy applied to node execution.
///
/// Validation failures and cooperative interrupts are never retried - a
/// `ValidationFailed` will fail the same way every time, and a
/// `GraphInterrupt` is not a failure at all. Everything else (provider
/// errors, serialization hiccups, event bus backpressure) gets up to
/// `max_retries` additional attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all - every failure is terminal.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn is_retryable(error: &NodeError) -> bool {
        !matches!(
            error,
            NodeError::GraphInterrupt { .. } | NodeError::ValidationFailed(_)
        )
    }

    /// Delay to wait before attempt number `attempt` (0-indexed, so attempt 0
    /// is the delay before the *first* retry).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }

    #[test]
    fn validation_and_interrupt_are_not_retryable() {
        assert!(!RetryPolicy::is_retryable(&NodeError::ValidationFailed(
            "x".into()
        )));
        assert!(!RetryPolicy::is_retryable(&NodeError::GraphInterrupt {
            reason: "wait".into(),
            payload: serde_json::Value::Null,
        }));
        assert!(RetryPolicy::is_retryable(&NodeError::Provider {
            provider: "llm",
            message: "timeout".into(),
        }));
    }
}
