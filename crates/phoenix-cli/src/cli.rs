//! Command line and boot entry point.

use anyhow::Result;
use clap::Parser;
use phoenix_core::config::{self, BootConfig, EnvSource, ProcessEnv, Tuning};
use phoenix_core::logging;
use phoenix_core::orchestrator::StartupOrchestrator;

/// The container entry process. Configuration comes from the environment and
/// the optional tuning file named by `PHOENIX_CONFIG`.
#[derive(Debug, Parser)]
#[command(name = "phoenix", version)]
#[command(about = "Phoenix: boot orchestrator for the GPU inference image", long_about = None)]
pub struct Cli {}

impl Cli {
    /// Parse arguments (only --help/--version), boot, and wait for shutdown.
    /// Returns Err only when storage provisioning failed.
    pub async fn run_from_args() -> Result<()> {
        let _cli = Cli::parse();

        let env = ProcessEnv;
        let debug = env
            .var("DEBUG_MODE")
            .map(|v| config::parse_flag(&v))
            .unwrap_or(false);
        if let Err(e) = logging::init_logging(debug) {
            logging::init_logging_stderr(debug);
            tracing::warn!("log file unavailable, logging to stderr: {:#}", e);
        }

        let tuning_file = config::tuning_path(&env);
        let tuning = match Tuning::load(tuning_file.as_deref()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("ignoring tuning file, using defaults: {:#}", e);
                Tuning::default()
            }
        };
        let cfg = BootConfig::from_env(&env, tuning);
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            debug = cfg.debug_mode,
            use_volume = cfg.use_volume,
            paranoid = cfg.paranoid_mode,
            "phoenix starting"
        );

        let report = StartupOrchestrator::new(cfg).run(shutdown_signal()).await?;
        tracing::info!(
            errors = report.errors,
            health = %report.health(),
            "phoenix stopped"
        );
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}
