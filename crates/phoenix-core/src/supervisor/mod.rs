//! Service supervision: storage links, launch, health, restart, shutdown.
//!
//! The inference server and the file browser run as independent children.
//! Their handles live behind an async mutex that is never held across a
//! health poll or a stop wait.

mod handle;
mod health;
mod link;
mod process;

pub use handle::{HealthStatus, ServiceHandle, ServiceKind};
pub use health::health_url;
pub use link::link_storage;
pub use process::Placeholders;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ServiceConfig;
use crate::context::BootContext;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{service} has no command configured")]
    EmptyCommand { service: ServiceKind },
    #[error("failed to spawn {service}: {source}")]
    Spawn {
        service: ServiceKind,
        #[source]
        source: io::Error,
    },
    #[error("{service} did not become healthy after {attempts} attempts")]
    Unhealthy { service: ServiceKind, attempts: u32 },
    #[error("failed to link {}: {source}", path.display())]
    Link {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("illegal health transition for {service}: {from:?} -> {to:?}")]
    IllegalTransition {
        service: ServiceKind,
        from: HealthStatus,
        to: HealthStatus,
    },
    #[error("{service} is not running")]
    NotRunning { service: ServiceKind },
}

/// Result of launching every enabled service.
#[derive(Debug, Default)]
pub struct LaunchReport {
    pub launched: Vec<(ServiceKind, HealthStatus)>,
    /// Failures that count as errors (spawn failures, unhealthy required services).
    pub errors: Vec<SupervisorError>,
}

pub struct ServiceSupervisor {
    ctx: Arc<BootContext>,
    transport: Arc<dyn Transport>,
    services: Mutex<BTreeMap<ServiceKind, ServiceHandle>>,
}

impl ServiceSupervisor {
    pub fn new(ctx: Arc<BootContext>, transport: Arc<dyn Transport>) -> Self {
        ServiceSupervisor {
            ctx,
            transport,
            services: Mutex::new(BTreeMap::new()),
        }
    }

    fn config(&self, kind: ServiceKind) -> &ServiceConfig {
        let services = &self.ctx.tuning().services;
        match kind {
            ServiceKind::Inference => &services.inference,
            ServiceKind::FileBrowser => &services.filebrowser,
        }
    }

    fn placeholders(&self, port: u16) -> Placeholders {
        let layout = &self.ctx.layout;
        let account = &self.ctx.config.filebrowser;
        Placeholders::new()
            .set("root", layout.root.to_string_lossy())
            .set("models", layout.models.to_string_lossy())
            .set("input", layout.input.to_string_lossy())
            .set("output", layout.output.to_string_lossy())
            .set("state", layout.state.to_string_lossy())
            .set("app_dir", self.ctx.tuning().paths.app_dir.to_string_lossy())
            .set("port", port.to_string())
            .set("user", account.username.clone())
            .secret("password", account.password.expose())
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.tuning().timeouts.probe_secs.max(1))
    }

    fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.ctx.tuning().timeouts.stop_grace_secs)
    }

    /// Symlink the application's data directories into the storage root (blocking).
    pub fn link_storage(&self) -> Result<Vec<PathBuf>, SupervisorError> {
        link_storage(&self.ctx.app_dir(), &self.ctx.layout)
    }

    /// Launch every enabled service: the file browser first (it is quick),
    /// then the inference server.
    pub async fn launch_all(&self) -> LaunchReport {
        let mut report = LaunchReport::default();
        for kind in [ServiceKind::FileBrowser, ServiceKind::Inference] {
            if !self.config(kind).is_enabled() {
                tracing::info!(service = %kind, "disabled (no command configured)");
                continue;
            }
            match self.launch(kind).await {
                Ok(status) => report.launched.push((kind, status)),
                Err(e) => {
                    tracing::error!("{}", e);
                    report.errors.push(e);
                }
            }
        }
        report
    }

    /// Start one service and poll it until healthy or out of attempts.
    pub async fn launch(&self, kind: ServiceKind) -> Result<HealthStatus, SupervisorError> {
        let cfg = self.config(kind).clone();
        let vars = self.placeholders(cfg.port);

        if kind == ServiceKind::FileBrowser {
            if self.ctx.config.filebrowser.generated {
                tracing::info!(
                    user = %self.ctx.config.filebrowser.username,
                    "no file browser password configured; generated one"
                );
            }
            self.run_setup(kind, &cfg, &vars).await;
        }

        let argv = vars.expand_all(&cfg.command);
        tracing::info!(service = %kind, port = cfg.port, "launching: {}", vars.redacted(&argv));
        let app_dir = self.ctx.app_dir();
        let child = process::spawn_service(kind, &argv, Some(&app_dir))?;

        {
            let mut services = self.services.lock().await;
            let handle = services
                .entry(kind)
                .or_insert_with(|| ServiceHandle::new(kind, cfg.port));
            handle.port = cfg.port;
            handle.child = Some(child);
            handle.transition(HealthStatus::Starting)?;
        }
        self.poll_until_healthy(kind, &cfg).await
    }

    async fn run_setup(&self, kind: ServiceKind, cfg: &ServiceConfig, vars: &Placeholders) {
        let timeout = Duration::from_secs(self.ctx.tuning().timeouts.plugin_install_secs.max(1));
        for step in &cfg.setup {
            let argv = vars.expand_all(step);
            let logged = vars.redacted(&argv);
            if let Err(e) = process::run_setup(kind, &argv, &logged, timeout).await {
                tracing::warn!(service = %kind, "setup step failed: {}: {}", logged, e);
            }
        }
    }

    async fn poll_until_healthy(
        &self,
        kind: ServiceKind,
        cfg: &ServiceConfig,
    ) -> Result<HealthStatus, SupervisorError> {
        let url = health_url(cfg.port, &cfg.health_path);
        let healthy = health::wait_healthy(
            Arc::clone(&self.transport),
            &url,
            cfg.health_attempts,
            Duration::from_secs(cfg.health_interval_secs),
            self.probe_timeout(),
        )
        .await;
        let status = if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unresponsive
        };
        self.set_health(kind, status).await?;
        if healthy {
            tracing::info!(service = %kind, url = %url, "healthy");
            return Ok(status);
        }
        if cfg.required {
            return Err(SupervisorError::Unhealthy {
                service: kind,
                attempts: cfg.health_attempts,
            });
        }
        tracing::warn!(service = %kind, url = %url, "not responding; continuing");
        Ok(status)
    }

    async fn set_health(&self, kind: ServiceKind, status: HealthStatus) -> Result<(), SupervisorError> {
        let mut services = self.services.lock().await;
        let handle = services
            .get_mut(&kind)
            .ok_or(SupervisorError::NotRunning { service: kind })?;
        handle.transition(status)
    }

    /// Whether `kind` was launched and is being supervised.
    pub async fn is_managed(&self, kind: ServiceKind) -> bool {
        self.services.lock().await.contains_key(&kind)
    }

    /// Process id of the running child, if any.
    pub async fn pid(&self, kind: ServiceKind) -> Option<u32> {
        self.services.lock().await.get(&kind).and_then(|h| h.pid())
    }

    pub async fn health(&self, kind: ServiceKind) -> Option<HealthStatus> {
        self.services.lock().await.get(&kind).map(|h| h.health())
    }

    /// Single re-poll; updates and returns the handle's health.
    pub async fn check_health(&self, kind: ServiceKind) -> Result<HealthStatus, SupervisorError> {
        let (port, path) = {
            let services = self.services.lock().await;
            let handle = services
                .get(&kind)
                .ok_or(SupervisorError::NotRunning { service: kind })?;
            (handle.port, self.config(kind).health_path.clone())
        };
        let up = health::probe_once(
            Arc::clone(&self.transport),
            health_url(port, &path),
            self.probe_timeout(),
        )
        .await;
        let status = if up {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unresponsive
        };
        self.set_health(kind, status).await?;
        Ok(status)
    }

    /// Stop (SIGTERM, grace, kill as last resort), wait for the port, relaunch.
    pub async fn restart(&self, kind: ServiceKind) -> Result<HealthStatus, SupervisorError> {
        let cfg = self.config(kind).clone();
        let old_child = {
            let mut services = self.services.lock().await;
            let handle = services
                .get_mut(&kind)
                .ok_or(SupervisorError::NotRunning { service: kind })?;
            handle.transition(HealthStatus::Starting)?;
            handle.child.take()
        };
        tracing::info!(service = %kind, "restarting");
        let grace = self.stop_grace();
        if let Some(mut child) = old_child {
            process::stop_child(kind, &mut child, grace).await;
        }
        if !process::wait_port_free(cfg.port, grace).await {
            tracing::warn!(service = %kind, port = cfg.port, "port still in use; relaunching anyway");
        }

        let vars = self.placeholders(cfg.port);
        let argv = vars.expand_all(&cfg.command);
        let app_dir = self.ctx.app_dir();
        let child = process::spawn_service(kind, &argv, Some(&app_dir))?;
        {
            let mut services = self.services.lock().await;
            if let Some(handle) = services.get_mut(&kind) {
                handle.child = Some(child);
            }
        }
        self.poll_until_healthy(kind, &cfg).await
    }

    /// Stop every child, all within `bound`.
    pub async fn shutdown_all(&self, bound: Duration) {
        let children: Vec<_> = {
            let mut services = self.services.lock().await;
            services
                .values_mut()
                .filter_map(|h| h.child.take().map(|c| (h.kind, c)))
                .collect()
        };
        if children.is_empty() {
            return;
        }
        let grace = self.stop_grace();
        let stops = stop_children(children, grace);
        if tokio::time::timeout(bound, stops).await.is_err() {
            tracing::warn!("services did not stop within {:?}", bound);
        }
    }
}

async fn stop_children(children: Vec<(ServiceKind, tokio::process::Child)>, grace: Duration) {
    let mut set = tokio::task::JoinSet::new();
    for (kind, mut child) in children {
        set.spawn(async move {
            process::stop_child(kind, &mut child, grace).await;
        });
    }
    while set.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests;
