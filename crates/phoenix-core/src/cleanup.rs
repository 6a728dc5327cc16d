//! Shutdown hooks and the gate that guarantees exactly one invocation.
//!
//! The standard hook tidies staging without ever deleting a model file. The
//! paranoid hook hands the storage root to an external secure-deletion
//! routine. Either way the [`CleanupGate`] fires once: on the normal shutdown
//! path, or from `Drop` if the orchestrator unwinds.

use std::fs;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::context::BootContext;
use crate::storage::{count_model_files, TEMP_SUFFIX};

pub trait CleanupHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blocking; runs on the blocking pool or inline from `Drop`.
    fn run(&self, ctx: &BootContext) -> Result<()>;
}

/// Removes partial downloads, and the staging directory once it holds no model files.
pub struct StagingCleanup;

impl CleanupHook for StagingCleanup {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn run(&self, ctx: &BootContext) -> Result<()> {
        let staging = &ctx.layout.staging;
        if !staging.is_dir() {
            return Ok(());
        }
        let partials: Vec<_> = WalkDir::new(staging)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX)
            })
            .map(|e| e.into_path())
            .collect();
        for p in &partials {
            fs::remove_file(p).with_context(|| format!("remove {}", p.display()))?;
        }
        if !partials.is_empty() {
            tracing::info!(count = partials.len(), "removed partial downloads");
        }
        let remaining = count_model_files(staging);
        if remaining == 0 {
            fs::remove_dir_all(staging)
                .with_context(|| format!("remove staging {}", staging.display()))?;
            tracing::info!(staging = %staging.display(), "staging removed");
        } else {
            tracing::warn!(remaining, "model files left in staging; keeping it for the next run");
        }
        Ok(())
    }
}

/// Runs an external routine with the storage root in its environment.
pub struct CommandCleanup {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandCleanup {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        CommandCleanup { argv, timeout }
    }
}

impl CleanupHook for CommandCleanup {
    fn name(&self) -> &'static str {
        "paranoid"
    }

    fn run(&self, ctx: &BootContext) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            bail!("paranoid cleanup has no command configured");
        };
        let mut child = Command::new(program)
            .args(args)
            .env("STORAGE_ROOT", &ctx.layout.root)
            .env("DOWNLOAD_TMP_DIR", &ctx.layout.staging)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", program))?;
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait().context("wait for cleanup command")? {
                if !status.success() {
                    bail!("{} exited with {}", program, status);
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                bail!("{} did not finish within {:?}", program, self.timeout);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Pick the hook for the configured mode.
pub fn hook_for(ctx: &BootContext) -> Arc<dyn CleanupHook> {
    if ctx.config.paranoid_mode {
        let t = &ctx.tuning().timeouts;
        Arc::new(CommandCleanup::new(
            ctx.tuning().cleanup.paranoid_command.clone(),
            Duration::from_secs(t.cleanup_secs.max(1)),
        ))
    } else {
        Arc::new(StagingCleanup)
    }
}

/// Fires its hook at most once.
pub struct CleanupGate {
    fired: AtomicBool,
    hook: Arc<dyn CleanupHook>,
    ctx: Arc<BootContext>,
    timeout: Duration,
}

impl CleanupGate {
    pub fn new(hook: Arc<dyn CleanupHook>, ctx: Arc<BootContext>, timeout: Duration) -> Self {
        CleanupGate {
            fired: AtomicBool::new(false),
            hook,
            ctx,
            timeout,
        }
    }

    /// Run the hook on the blocking pool, bounded by the timeout. Returns false
    /// if the gate had already fired.
    pub async fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let hook = Arc::clone(&self.hook);
        let ctx = Arc::clone(&self.ctx);
        tracing::info!(hook = hook.name(), "running cleanup hook");
        let task = tokio::task::spawn_blocking(move || hook.run(&ctx));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(()))) => tracing::info!("cleanup complete"),
            Ok(Ok(Err(e))) => tracing::error!("cleanup failed: {:#}", e),
            Ok(Err(e)) => tracing::error!("cleanup task failed: {}", e),
            Err(_) => tracing::error!("cleanup did not finish within {:?}", self.timeout),
        }
        true
    }
}

impl Drop for CleanupGate {
    fn drop(&mut self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(hook = self.hook.name(), "running cleanup hook from drop");
        if let Err(e) = self.hook.run(&self.ctx) {
            tracing::error!("cleanup failed: {:#}", e);
        }
    }
}
