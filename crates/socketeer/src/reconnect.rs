//! Client reconnection policy.
//!
//! A pure state machine: the client reports each failure and success, the
//! policy answers whether to wait and retry or to give up. The waiting
//! itself is done cooperatively by the caller.

use std::time::Duration;

use socketeer_config::ReconnectConfig;

/// Retry count meaning "never give up".
pub const RETRY_FOREVER: i64 = -1;

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait, then make reconnect attempt number `attempt` (1-based).
    Retry {
        /// Attempt number since the last successful connection.
        attempt: u32,
        /// How long to wait before attempting.
        wait: Duration,
    },
    /// Stop reconnecting; the client has failed for good.
    GiveUp {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
}

/// Retry-count / wait-seconds reconnection state.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use socketeer::{ReconnectDecision, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(1, Duration::from_secs(2));
/// assert!(matches!(policy.on_failure(), ReconnectDecision::Retry { attempt: 1, .. }));
/// assert_eq!(policy.on_failure(), ReconnectDecision::GiveUp { attempts: 1 });
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    retry_count: i64,
    wait: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy. `retry_count` is -1 for unlimited, 0 for none, or
    /// the number of attempts before giving up.
    pub fn new(retry_count: i64, wait: Duration) -> Self {
        Self {
            retry_count,
            wait,
            attempts: 0,
        }
    }

    /// Create a policy from the `reconnect` configuration section.
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.retry_count, config.wait())
    }

    /// Record a failed connection or attempt.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.exhausted() {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts = self.attempts.saturating_add(1);
        ReconnectDecision::Retry {
            attempt: self.attempts,
            wait: self.wait,
        }
    }

    /// Record a successful connection; the attempt counter starts over.
    pub fn on_success(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check if the policy retries forever.
    pub fn is_unbounded(&self) -> bool {
        self.retry_count == RETRY_FOREVER
    }

    fn exhausted(&self) -> bool {
        match self.retry_count {
            RETRY_FOREVER => false,
            limit => i64::from(self.attempts) >= limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(10);

    #[test]
    fn test_zero_retries_gives_up_immediately() {
        let mut policy = ReconnectPolicy::new(0, WAIT);
        assert_eq!(policy.on_failure(), ReconnectDecision::GiveUp { attempts: 0 });
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_bounded_retries() {
        let mut policy = ReconnectPolicy::new(2, WAIT);
        assert_eq!(
            policy.on_failure(),
            ReconnectDecision::Retry {
                attempt: 1,
                wait: WAIT
            }
        );
        assert_eq!(
            policy.on_failure(),
            ReconnectDecision::Retry {
                attempt: 2,
                wait: WAIT
            }
        );
        assert_eq!(policy.on_failure(), ReconnectDecision::GiveUp { attempts: 2 });
        // stays given up
        assert_eq!(policy.on_failure(), ReconnectDecision::GiveUp { attempts: 2 });
    }

    #[test]
    fn test_unbounded_never_gives_up() {
        let mut policy = ReconnectPolicy::new(RETRY_FOREVER, WAIT);
        assert!(policy.is_unbounded());
        for expected in 1..=1000 {
            assert_eq!(
                policy.on_failure(),
                ReconnectDecision::Retry {
                    attempt: expected,
                    wait: WAIT
                }
            );
        }
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut policy = ReconnectPolicy::new(2, WAIT);
        policy.on_failure();
        policy.on_failure();
        policy.on_success();
        assert_eq!(policy.attempts(), 0);
        assert!(matches!(
            policy.on_failure(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_from_config() {
        let config = ReconnectConfig {
            retry_count: 5,
            wait_seconds: 3,
        };
        let mut policy = ReconnectPolicy::from_config(&config);
        assert!(!policy.is_unbounded());
        assert_eq!(
            policy.on_failure(),
            ReconnectDecision::Retry {
                attempt: 1,
                wait: Duration::from_secs(3)
            }
        );
    }
}
