//! Registry reachability check.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RegistryConfig;
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct NetworkReport {
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
}

impl NetworkReport {
    pub fn all_reachable(&self) -> bool {
        self.unreachable.is_empty()
    }
}

/// Probe each registry base. Any HTTP answer counts as reachable.
pub async fn check_registries(
    transport: Arc<dyn Transport>,
    registries: &RegistryConfig,
    timeout: Duration,
) -> NetworkReport {
    let mut report = NetworkReport::default();
    for base in [&registries.huggingface_base, &registries.civitai_base] {
        let t = Arc::clone(&transport);
        let url = base.clone();
        let outcome = tokio::task::spawn_blocking(move || t.probe(&url, timeout)).await;
        match outcome {
            Ok(Ok(code)) => {
                tracing::info!(registry = %base, code, "reachable");
                report.reachable.push(base.clone());
            }
            Ok(Err(e)) => {
                tracing::warn!(registry = %base, "unreachable: {}", e);
                report.unreachable.push(base.clone());
            }
            Err(e) => {
                tracing::warn!(registry = %base, "probe task failed: {}", e);
                report.unreachable.push(base.clone());
            }
        }
    }
    report
}
