//! Running one non-fatal boot step as its own task.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::transport::AbortFlag;

/// How long an interrupted step gets to wind down after its abort flag is set.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum StepOutcome<T> {
    Done(T),
    TimedOut,
    Panicked(String),
    Interrupted,
}

/// Spawn `fut` and wait for it, the timeout, or `interrupt`, whichever is first.
///
/// On timeout or interrupt the abort flag is raised and the task gets a short
/// grace period to return before it is aborted.
pub async fn run_step<T, F>(
    name: &str,
    timeout: Duration,
    abort: &AbortFlag,
    interrupt: &CancellationToken,
    fut: F,
) -> StepOutcome<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    let stopped = tokio::select! {
        biased;
        _ = interrupt.cancelled() => StepOutcome::Interrupted,
        _ = tokio::time::sleep(timeout) => StepOutcome::TimedOut,
        joined = &mut handle => return joined_outcome(name, joined),
    };
    abort.request();
    match &stopped {
        StepOutcome::TimedOut => tracing::error!(step = name, "timed out after {:?}", timeout),
        _ => tracing::warn!(step = name, "interrupted by shutdown"),
    }
    if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
        handle.abort();
    }
    stopped
}

fn joined_outcome<T>(name: &str, joined: Result<T, JoinError>) -> StepOutcome<T> {
    match joined {
        Ok(v) => StepOutcome::Done(v),
        Err(e) if e.is_panic() => {
            let msg = panic_message(e.into_panic());
            tracing::error!(step = name, "panicked: {}", msg);
            StepOutcome::Panicked(msg)
        }
        Err(e) => {
            tracing::error!(step = name, "task failed: {}", e);
            StepOutcome::Panicked(e.to_string())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
