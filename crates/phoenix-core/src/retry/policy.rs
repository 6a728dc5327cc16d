use std::time::Duration;

use crate::config::RetryConfig;

/// High-level classification of a fetch error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 429, 503).
    Throttled,
    /// Network-level failure (connection reset, DNS, short body, etc.).
    Connection,
    /// Any other non-2xx HTTP status.
    Http(u16),
    /// Downloaded content failed verification.
    Checksum,
    /// Not enough room in staging. Retrying cannot help.
    InsufficientSpace,
    /// Local filesystem failure.
    Storage,
    /// Stop was requested.
    Aborted,
    /// Anything else (bad metadata, malformed URL).
    Other,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Throttled
                | ErrorKind::Connection
                | ErrorKind::Http(_)
                | ErrorKind::Checksum
        )
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Linear backoff policy with a cap: attempt N waits N × base.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff step.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        let base_delay =
            Duration::try_from_secs_f64(cfg.base_delay_secs).unwrap_or(Duration::from_secs(5));
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }

    /// `attempt` is 1-based (1 = first attempt). Returns `RetryDecision::NoRetry`
    /// when we should stop retrying.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts || !kind.is_retryable() {
            return RetryDecision::NoRetry;
        }
        let delay = self.base_delay.saturating_mul(attempt).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_five_then_ten_seconds() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(
            p.decide(1, ErrorKind::Connection),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            p.decide(2, ErrorKind::Http(404)),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(p.decide(3, ErrorKind::Timeout), RetryDecision::NoRetry);
    }

    #[test]
    fn fatal_kinds_never_retry() {
        let p = RetryPolicy::default();
        for kind in [
            ErrorKind::InsufficientSpace,
            ErrorKind::Storage,
            ErrorKind::Aborted,
            ErrorKind::Other,
        ] {
            assert_eq!(p.decide(1, kind), RetryDecision::NoRetry, "{kind:?}");
        }
        assert!(matches!(
            p.decide(1, ErrorKind::Checksum),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy {
            max_attempts: 50,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(12),
        };
        assert_eq!(
            p.decide(40, ErrorKind::Throttled),
            RetryDecision::RetryAfter(Duration::from_secs(12))
        );
    }

    #[test]
    fn bad_config_values_fall_back() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            base_delay_secs: -1.0,
            max_delay_secs: 60,
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.base_delay, Duration::from_secs(5));
    }
}
