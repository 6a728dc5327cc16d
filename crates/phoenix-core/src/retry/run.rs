//! Retry loop: run a closure until success or policy says stop.

use std::time::{Duration, Instant};

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::transport::{AbortFlag, TransferError};

/// Granularity of abort checks while backing off.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Final outcome plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, TransferError>,
    pub attempts: u32,
}

/// Runs `f(attempt)` until it succeeds, the policy says stop, or `abort` is
/// requested. On retryable failure, sleeps for the backoff duration then tries again.
pub fn run_with_retry<T, F>(
    policy: &RetryPolicy,
    abort: &AbortFlag,
    what: &str,
    mut f: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Result<T, TransferError>,
{
    let mut attempt = 1u32;
    loop {
        if abort.is_requested() {
            return Attempted {
                result: Err(TransferError::Aborted),
                attempts: attempt - 1,
            };
        }
        match f(attempt) {
            Ok(v) => {
                return Attempted {
                    result: Ok(v),
                    attempts: attempt,
                }
            }
            Err(e) => match policy.decide(attempt, classify::classify(&e)) {
                RetryDecision::NoRetry => {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                RetryDecision::RetryAfter(d) => {
                    tracing::warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {:?}",
                        what,
                        attempt,
                        policy.max_attempts,
                        e,
                        d
                    );
                    if !sleep_unless_aborted(d, abort) {
                        return Attempted {
                            result: Err(TransferError::Aborted),
                            attempts: attempt,
                        };
                    }
                    attempt += 1;
                }
            },
        }
    }
}

/// Sleep for `d`, waking early when `abort` is requested. Returns false if aborted.
pub fn sleep_unless_aborted(d: Duration, abort: &AbortFlag) -> bool {
    let deadline = Instant::now() + d;
    loop {
        if abort.is_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
