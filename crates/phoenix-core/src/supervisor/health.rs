//! HTTP health polling against local services.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::Transport;

/// Any HTTP answer below 500 means the service is up and serving.
fn answered(code: u32) -> bool {
    (200..500).contains(&code)
}

pub fn health_url(port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    format!("http://127.0.0.1:{}{}", port, path)
}

/// One probe on the blocking pool.
pub async fn probe_once(transport: Arc<dyn Transport>, url: String, timeout: Duration) -> bool {
    let url_for_log = url.clone();
    match tokio::task::spawn_blocking(move || transport.probe(&url, timeout)).await {
        Ok(Ok(code)) => {
            tracing::trace!(url = %url_for_log, code, "probe answered");
            answered(code)
        }
        Ok(Err(e)) => {
            tracing::trace!(url = %url_for_log, "probe failed: {}", e);
            false
        }
        Err(e) => {
            tracing::warn!("probe task failed: {}", e);
            false
        }
    }
}

/// Probe up to `attempts` times, `interval` apart. True on the first answer.
pub async fn wait_healthy(
    transport: Arc<dyn Transport>,
    url: &str,
    attempts: u32,
    interval: Duration,
    timeout: Duration,
) -> bool {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if probe_once(Arc::clone(&transport), url.to_string(), timeout).await {
            tracing::debug!(url, attempt, "healthy");
            return true;
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}
