//! Background reconciliation: when new model files appear in the target tree,
//! restart the file browser so it serves them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::count_model_files;
use crate::supervisor::{ServiceKind, ServiceSupervisor};

pub struct ReconciliationMonitor {
    supervisor: Arc<ServiceSupervisor>,
    models_root: PathBuf,
    interval: Duration,
}

impl ReconciliationMonitor {
    pub fn new(supervisor: Arc<ServiceSupervisor>, models_root: impl Into<PathBuf>, interval: Duration) -> Self {
        ReconciliationMonitor {
            supervisor,
            models_root: models_root.into(),
            interval,
        }
    }

    /// Run until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn count(&self) -> Option<usize> {
        let root = self.models_root.clone();
        match tokio::task::spawn_blocking(move || count_model_files(&root)).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!("model count failed: {}", e);
                None
            }
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let mut last = self.count().await.unwrap_or(0);
        tracing::info!(models = last, interval = ?self.interval, "reconciliation monitor started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let Some(now) = self.count().await else {
                continue;
            };
            if now > last {
                tracing::info!(before = last, after = now, "new model files detected");
                if self.supervisor.is_managed(ServiceKind::FileBrowser).await {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        r = self.refresh_file_browser() => {
                            if let Err(e) = r {
                                tracing::warn!("file browser refresh failed: {}", e);
                            }
                        }
                    }
                }
            }
            last = now;
        }
        tracing::info!("reconciliation monitor stopped");
    }

    async fn refresh_file_browser(&self) -> Result<(), crate::supervisor::SupervisorError> {
        self.supervisor.restart(ServiceKind::FileBrowser).await?;
        let status = self.supervisor.check_health(ServiceKind::FileBrowser).await?;
        let pid = self.supervisor.pid(ServiceKind::FileBrowser).await;
        tracing::info!(health = ?status, pid = ?pid, "file browser refreshed");
        Ok(())
    }
}
