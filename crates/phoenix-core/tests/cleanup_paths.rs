//! The cleanup hook runs exactly once on every way out of a boot.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use phoenix_core::cleanup::CleanupHook;
use phoenix_core::context::BootContext;
use phoenix_core::orchestrator::{BootState, StartupOrchestrator};
use phoenix_core::transport::{AbortFlag, Headers, TransferError, Transport};
use tempfile::tempdir;

#[derive(Default)]
struct CountingHook(AtomicUsize);

impl CleanupHook for CountingHook {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn run(&self, _ctx: &BootContext) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Probes take `probe_delay`; anything else fails, or panics when `panic` is set.
struct SlowTransport {
    probe_delay: Duration,
    panic: bool,
}

impl Transport for SlowTransport {
    fn get(&self, _url: &str, _headers: &Headers) -> Result<Vec<u8>, TransferError> {
        Err(TransferError::Http(404))
    }

    fn download(
        &self,
        _url: &str,
        _headers: &Headers,
        _dest: &Path,
        _abort: &AbortFlag,
    ) -> Result<u64, TransferError> {
        Err(TransferError::Http(404))
    }

    fn probe(&self, _url: &str, _timeout: Duration) -> Result<u32, TransferError> {
        if self.panic {
            panic!("probe exploded");
        }
        std::thread::sleep(self.probe_delay);
        Ok(200)
    }
}

fn orchestrator(root: &Path, transport: SlowTransport, hook: Arc<CountingHook>) -> StartupOrchestrator {
    let cfg = common::config(common::tuning(root, "http://127.0.0.1:9"), &[]);
    StartupOrchestrator::new(cfg)
        .with_transport(Arc::new(transport))
        .with_cleanup_hook(hook)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signal_during_boot_runs_cleanup_once() {
    let dir = tempdir().unwrap();
    let hook = Arc::new(CountingHook::default());
    let transport = SlowTransport {
        probe_delay: Duration::from_secs(2),
        panic: false,
    };
    let report = orchestrator(dir.path(), transport, Arc::clone(&hook))
        .run(async {})
        .await
        .expect("boot");

    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    assert!(report.interrupted);
    assert!(!report.visited(BootState::Monitoring));
    assert_eq!(report.final_state(), BootState::Terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_collaborator_is_contained_and_cleanup_runs_once() {
    let dir = tempdir().unwrap();
    let hook = Arc::new(CountingHook::default());
    let transport = SlowTransport {
        probe_delay: Duration::ZERO,
        panic: true,
    };
    let report = orchestrator(dir.path(), transport, Arc::clone(&hook))
        .run(tokio::time::sleep(Duration::from_secs(2)))
        .await
        .expect("boot");

    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    assert!(report.errors >= 2);
    assert!(report.visited(BootState::Monitoring));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropping_a_running_boot_still_runs_cleanup() {
    let dir = tempdir().unwrap();
    let hook = Arc::new(CountingHook::default());
    let transport = SlowTransport {
        probe_delay: Duration::ZERO,
        panic: false,
    };
    let run = orchestrator(dir.path(), transport, Arc::clone(&hook))
        .run(std::future::pending::<()>());
    assert!(tokio::time::timeout(Duration::from_secs(2), run).await.is_err());
    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fatal_setup_runs_cleanup_and_reports_provisioning_error() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("workspace"), b"not a directory").unwrap();
    let hook = Arc::new(CountingHook::default());
    let transport = SlowTransport {
        probe_delay: Duration::ZERO,
        panic: false,
    };
    let err = orchestrator(dir.path(), transport, Arc::clone(&hook))
        .run(std::future::pending::<()>())
        .await
        .expect_err("setup must fail");

    assert!(err.is_fatal());
    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
}
