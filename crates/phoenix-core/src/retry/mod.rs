//! Retry and backoff policy.
//!
//! One policy for every remote operation: registry metadata lookups and file
//! transfers alike. Classification maps a [`TransferError`] to an
//! [`ErrorKind`]; the policy turns attempt number and kind into a decision;
//! the runner loops, sleeping in abortable slices between attempts.
//!
//! [`TransferError`]: crate::transport::TransferError

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{run_with_retry, sleep_unless_aborted, Attempted};
