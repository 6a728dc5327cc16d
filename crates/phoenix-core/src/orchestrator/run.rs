//! The boot state machine.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::asset::{self, DownloadSummary};
use crate::cleanup::{hook_for, CleanupGate, CleanupHook};
use crate::config::BootConfig;
use crate::context::BootContext;
use crate::coordinator::DownloadCoordinator;
use crate::error::BootError;
use crate::fetcher::RetryingFetcher;
use crate::ledger::AssetLedger;
use crate::monitor::ReconciliationMonitor;
use crate::network::check_registries;
use crate::organize::{OrganizeSummary, OrganizerPipeline};
use crate::plugins::{self, PluginReport};
use crate::registry::RegistryClient;
use crate::retry::RetryPolicy;
use crate::storage::{count_model_files, StorageLayout};
use crate::supervisor::{LaunchReport, ServiceSupervisor};
use crate::transport::{AbortFlag, CurlTransport, Transport};

use super::state::BootState;
use super::step::{run_step, StepOutcome};
use super::summary::BootReport;

/// Bound on waiting for the monitor task to exit after cancellation.
const MONITOR_STOP: Duration = Duration::from_secs(5);

struct LaunchOutcome {
    link_failed: bool,
    plugins: PluginReport,
    launch: LaunchReport,
}

pub struct StartupOrchestrator {
    config: BootConfig,
    transport: Arc<dyn Transport>,
    cleanup_hook: Option<Arc<dyn CleanupHook>>,
    state: BootState,
    report: BootReport,
    abort: AbortFlag,
}

impl StartupOrchestrator {
    pub fn new(config: BootConfig) -> Self {
        let transport = Arc::new(CurlTransport::from_timeouts(&config.tuning.timeouts));
        StartupOrchestrator {
            config,
            transport,
            cleanup_hook: None,
            state: BootState::Init,
            report: BootReport::default(),
            abort: AbortFlag::new(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Override the hook picked from `PARANOID_MODE`.
    pub fn with_cleanup_hook(mut self, hook: Arc<dyn CleanupHook>) -> Self {
        self.cleanup_hook = Some(hook);
        self
    }

    fn advance(&mut self, to: BootState) {
        if !self.state.can_move_to(to) {
            tracing::warn!(from = %self.state, to = %to, "ignoring backward transition");
            return;
        }
        tracing::info!(from = %self.state, to = %to, "boot state");
        self.report.transitions.push((self.state, to));
        self.state = to;
    }

    /// Run the whole boot. Returns once `shutdown` resolves and teardown is
    /// complete, or early with the provisioning error if setup fails. Cleanup
    /// runs exactly once either way.
    pub async fn run<S>(mut self, shutdown: S) -> Result<BootReport, BootError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let interrupt = CancellationToken::new();
        let watcher = {
            let token = interrupt.clone();
            tokio::spawn(async move {
                shutdown.await;
                tracing::info!("shutdown signal received");
                token.cancel();
            })
        };
        let result = self.run_states(&interrupt).await;
        watcher.abort();
        result
    }

    async fn run_states(&mut self, interrupt: &CancellationToken) -> Result<BootReport, BootError> {
        self.report.assets_requested = self.config.has_requested_assets();
        self.advance(BootState::SystemSetup);

        let ctx = Arc::new(BootContext::new(self.config.clone(), self.resolve_layout()));
        let hook = self.cleanup_hook.clone().unwrap_or_else(|| hook_for(&ctx));
        let cleanup_timeout = Duration::from_secs(ctx.tuning().timeouts.cleanup_secs.max(1));
        let gate = CleanupGate::new(hook, Arc::clone(&ctx), cleanup_timeout);

        if let Err(e) = system_setup(&ctx).await {
            tracing::error!("{}", e);
            self.advance(BootState::ShuttingDown);
            self.report.cleanup_ran = gate.fire().await;
            self.advance(BootState::Terminated);
            return Err(e);
        }

        let supervisor = Arc::new(ServiceSupervisor::new(Arc::clone(&ctx), Arc::clone(&self.transport)));
        self.run_steps(&ctx, &supervisor, interrupt).await;

        let monitor_cancel = CancellationToken::new();
        let mut monitor = None;
        if !interrupt.is_cancelled() {
            self.advance(BootState::Monitoring);
            let m = ReconciliationMonitor::new(
                Arc::clone(&supervisor),
                &ctx.layout.models,
                ctx.tuning().monitor_interval(),
            );
            monitor = Some(m.spawn(monitor_cancel.clone()));
            self.report.log_summary();
            interrupt.cancelled().await;
        } else {
            self.report.interrupted = true;
        }

        self.advance(BootState::ShuttingDown);
        monitor_cancel.cancel();
        if let Some(handle) = monitor {
            if tokio::time::timeout(MONITOR_STOP, handle).await.is_err() {
                tracing::warn!("monitor did not stop within {:?}", MONITOR_STOP);
            }
        }
        let timeouts = &ctx.tuning().timeouts;
        let bound = Duration::from_secs(timeouts.stop_grace_secs.saturating_mul(2).max(1));
        supervisor.shutdown_all(bound).await;
        self.report.cleanup_ran = gate.fire().await;
        self.advance(BootState::Terminated);
        if self.report.interrupted {
            self.report.log_summary();
        }
        Ok(std::mem::take(&mut self.report))
    }

    fn resolve_layout(&self) -> StorageLayout {
        let paths = &self.config.tuning.paths;
        let staging = self
            .config
            .staging_override
            .clone()
            .unwrap_or_else(|| paths.staging_dir.clone());
        StorageLayout::resolve(self.config.use_volume, paths, staging)
    }

    /// NetworkCheck through ServiceLaunch. Stops early when interrupted.
    async fn run_steps(
        &mut self,
        ctx: &Arc<BootContext>,
        supervisor: &Arc<ServiceSupervisor>,
        interrupt: &CancellationToken,
    ) {
        let timeouts = ctx.tuning().timeouts.clone();

        if interrupt.is_cancelled() {
            return;
        }
        self.advance(BootState::NetworkCheck);
        let registries = ctx.tuning().registries.clone();
        let transport = Arc::clone(&self.transport);
        let probe = Duration::from_secs(timeouts.probe_secs.max(1));
        let outcome = self
            .step("network-check", timeouts.network_check_secs, interrupt, async move {
                check_registries(transport, &registries, probe).await
            })
            .await;
        if let Some(report) = outcome {
            self.report.add_errors(report.unreachable.len());
            self.report.network = Some(report);
        }

        if interrupt.is_cancelled() {
            return;
        }
        self.advance(BootState::Download);
        let outcome = self
            .step(
                "download",
                timeouts.download_secs,
                interrupt,
                download(Arc::clone(ctx), Arc::clone(&self.transport), self.abort.clone()),
            )
            .await;
        if let Some(summary) = outcome {
            self.report.add_errors(summary.failed);
            self.report.downloads = Some(summary);
        }

        if interrupt.is_cancelled() {
            return;
        }
        self.advance(BootState::Organize);
        let outcome = self
            .step("organize", timeouts.organize_secs, interrupt, organize(Arc::clone(ctx)))
            .await;
        if let Some(Some(summary)) = outcome {
            self.report.add_errors(summary.failed);
            self.report.organize = Some(summary);
        } else if let Some(None) = outcome {
            self.report.add_errors(1);
        }
        self.report.model_files = count_models(ctx.layout.models.clone()).await;

        if interrupt.is_cancelled() {
            return;
        }
        self.advance(BootState::ServiceLaunch);
        let outcome = self
            .step(
                "service-launch",
                timeouts.service_launch_secs,
                interrupt,
                launch(Arc::clone(ctx), Arc::clone(supervisor)),
            )
            .await;
        if let Some(out) = outcome {
            self.report.add_errors(usize::from(out.link_failed));
            self.report.add_errors(out.plugins.failed.len());
            self.report.add_errors(out.launch.errors.len());
            self.report.plugins = Some(out.plugins);
            self.report.launch = Some(out.launch);
        }
    }

    /// Run one step; anything but completion counts as an error.
    async fn step<T, F>(
        &mut self,
        name: &str,
        timeout_secs: u64,
        interrupt: &CancellationToken,
        fut: F,
    ) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        match run_step(name, timeout, &self.abort, interrupt, fut).await {
            StepOutcome::Done(v) => Some(v),
            StepOutcome::Interrupted => {
                self.report.interrupted = true;
                None
            }
            StepOutcome::TimedOut | StepOutcome::Panicked(_) => {
                self.report.add_errors(1);
                None
            }
        }
    }
}

async fn system_setup(ctx: &Arc<BootContext>) -> Result<(), BootError> {
    let layout = ctx.layout.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<(), BootError> {
        layout.ensure_tree()?;
        std::fs::create_dir_all(&layout.staging)
            .map_err(|e| BootError::provisioning(&layout.staging, "create staging directory", e))?;
        Ok(())
    })
    .await;
    match joined {
        Ok(r) => r,
        Err(e) => Err(BootError::FatalProvisioning {
            path: ctx.layout.root.clone(),
            reason: format!("setup task failed: {}", e),
            source: None,
        }),
    }
}

async fn download(ctx: Arc<BootContext>, transport: Arc<dyn Transport>, abort: AbortFlag) -> DownloadSummary {
    let tuning = ctx.tuning();
    let registry = Arc::new(RegistryClient::new(&tuning.registries, ctx.config.credentials.clone()));
    registry.log_token_presence();
    let fetcher = Arc::new(RetryingFetcher::new(
        transport,
        registry,
        RetryPolicy::from_config(&tuning.retry),
        &ctx.layout.staging,
        tuning.min_free_space_bytes(),
        Arc::clone(&ctx.claims),
    ));
    let ledger = match AssetLedger::open_at(ctx.ledger_path()).await {
        Ok(l) => Some(l),
        Err(e) => {
            tracing::warn!("asset ledger unavailable, presence checks only: {:#}", e);
            None
        }
    };
    let coordinator = DownloadCoordinator::new(
        fetcher,
        ledger,
        &ctx.layout.models,
        tuning.max_concurrent_downloads,
        ctx.config.debug_mode,
    );
    coordinator.run(asset::plan(&ctx.config), abort).await
}

/// None when the organizer task itself failed.
async fn organize(ctx: Arc<BootContext>) -> Option<OrganizeSummary> {
    let pipeline = OrganizerPipeline::new(&ctx.layout.models, Arc::clone(&ctx.claims));
    let staging = ctx.layout.staging.clone();
    match tokio::task::spawn_blocking(move || pipeline.organize(Some(&staging))).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::error!("organize task failed: {}", e);
            None
        }
    }
}

async fn launch(ctx: Arc<BootContext>, supervisor: Arc<ServiceSupervisor>) -> LaunchOutcome {
    let linker = Arc::clone(&supervisor);
    let link_failed = match tokio::task::spawn_blocking(move || linker.link_storage()).await {
        Ok(Ok(_)) => false,
        Ok(Err(e)) => {
            tracing::error!("{}", e);
            true
        }
        Err(e) => {
            tracing::error!("link task failed: {}", e);
            true
        }
    };
    let plugin_timeout = Duration::from_secs(ctx.tuning().timeouts.plugin_install_secs.max(1));
    let plugins = plugins::install_all(
        &ctx.config.plugin_sources,
        &plugins::custom_nodes_dir(&ctx.app_dir()),
        plugin_timeout,
    )
    .await;
    let launch = supervisor.launch_all().await;
    LaunchOutcome {
        link_failed,
        plugins,
        launch,
    }
}

async fn count_models(root: PathBuf) -> usize {
    tokio::task::spawn_blocking(move || count_model_files(&root))
        .await
        .unwrap_or(0)
}
