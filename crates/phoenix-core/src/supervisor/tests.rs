use super::*;
use crate::config::{BootConfig, ServiceConfig, Tuning};
use crate::storage::StorageLayout;
use crate::transport::{AbortFlag, Headers, TransferError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Probe answers 200 while `up` is set; counts probes.
#[derive(Default)]
struct FakeHealth {
    up: AtomicBool,
    probes: AtomicUsize,
}

impl Transport for FakeHealth {
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
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(200)
        } else {
            Ok(503)
        }
    }
}

fn service(cmd: &[&str], required: bool) -> ServiceConfig {
    ServiceConfig {
        command: cmd.iter().map(|s| s.to_string()).collect(),
        setup: Vec::new(),
        port: free_port(),
        health_path: "/".into(),
        health_attempts: 2,
        health_interval_secs: 0,
        required,
    }
}

fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

fn context(root: &Path, inference: ServiceConfig, filebrowser: ServiceConfig) -> Arc<BootContext> {
    let mut tuning = Tuning::default();
    tuning.services.inference = inference;
    tuning.services.filebrowser = filebrowser;
    tuning.timeouts.stop_grace_secs = 2;
    tuning.paths.app_dir = root.join("app");
    let cfg = BootConfig::from_env(&HashMap::<String, String>::new(), tuning);
    Arc::new(BootContext::new(
        cfg,
        StorageLayout::at(root.join("storage"), root.join("stage"), false),
    ))
}

#[tokio::test]
async fn launch_marks_healthy_service() {
    let dir = tempfile::tempdir().unwrap();
    let health = Arc::new(FakeHealth::default());
    health.up.store(true, Ordering::SeqCst);
    let ctx = context(dir.path(), service(&["sleep", "30"], true), service(&[], false));
    let sup = ServiceSupervisor::new(ctx, health.clone());

    let report = sup.launch_all().await;
    assert!(report.errors.is_empty());
    assert_eq!(report.launched, vec![(ServiceKind::Inference, HealthStatus::Healthy)]);
    assert!(!sup.is_managed(ServiceKind::FileBrowser).await);
    sup.shutdown_all(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn unhealthy_required_service_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let health = Arc::new(FakeHealth::default());
    let ctx = context(dir.path(), service(&["sleep", "30"], true), service(&["sleep", "30"], false));
    let sup = ServiceSupervisor::new(ctx, health.clone());

    let report = sup.launch_all().await;
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        report.errors[0],
        SupervisorError::Unhealthy {
            service: ServiceKind::Inference,
            ..
        }
    ));
    assert_eq!(
        report.launched,
        vec![(ServiceKind::FileBrowser, HealthStatus::Unresponsive)]
    );
    assert_eq!(
        sup.health(ServiceKind::Inference).await,
        Some(HealthStatus::Unresponsive)
    );
    sup.shutdown_all(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn spawn_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        dir.path(),
        service(&["/nonexistent/phoenix-inference"], true),
        service(&[], false),
    );
    let sup = ServiceSupervisor::new(ctx, Arc::new(FakeHealth::default()));
    let report = sup.launch_all().await;
    assert!(matches!(report.errors[0], SupervisorError::Spawn { .. }));
}

#[tokio::test]
async fn repoll_moves_between_healthy_and_unresponsive() {
    let dir = tempfile::tempdir().unwrap();
    let health = Arc::new(FakeHealth::default());
    health.up.store(true, Ordering::SeqCst);
    let ctx = context(dir.path(), service(&[], false), service(&["sleep", "30"], false));
    let sup = ServiceSupervisor::new(ctx, health.clone());
    sup.launch(ServiceKind::FileBrowser).await.unwrap();

    health.up.store(false, Ordering::SeqCst);
    assert_eq!(
        sup.check_health(ServiceKind::FileBrowser).await.unwrap(),
        HealthStatus::Unresponsive
    );
    health.up.store(true, Ordering::SeqCst);
    assert_eq!(
        sup.check_health(ServiceKind::FileBrowser).await.unwrap(),
        HealthStatus::Healthy
    );
    sup.shutdown_all(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn restart_replaces_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let health = Arc::new(FakeHealth::default());
    health.up.store(true, Ordering::SeqCst);
    let ctx = context(dir.path(), service(&[], false), service(&["sleep", "30"], false));
    let sup = ServiceSupervisor::new(ctx, health.clone());
    sup.launch(ServiceKind::FileBrowser).await.unwrap();
    let before = {
        let services = sup.services.lock().await;
        services[&ServiceKind::FileBrowser].pid()
    };

    let status = sup.restart(ServiceKind::FileBrowser).await.unwrap();
    assert_eq!(status, HealthStatus::Healthy);
    let after = {
        let services = sup.services.lock().await;
        services[&ServiceKind::FileBrowser].pid()
    };
    assert!(before.is_some() && after.is_some());
    assert_ne!(before, after);
    sup.shutdown_all(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn restart_of_unknown_service_fails() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path(), service(&[], false), service(&[], false));
    let sup = ServiceSupervisor::new(ctx, Arc::new(FakeHealth::default()));
    assert!(matches!(
        sup.restart(ServiceKind::FileBrowser).await,
        Err(SupervisorError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn setup_commands_run_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("setup-ran");
    let mut fb = service(&["sleep", "30"], false);
    fb.setup = vec![vec![
        "sh".into(),
        "-c".into(),
        format!("echo {{user}} > {}", marker.display()),
    ]];
    let health = Arc::new(FakeHealth::default());
    health.up.store(true, Ordering::SeqCst);
    let ctx = context(dir.path(), service(&[], false), fb);
    let sup = ServiceSupervisor::new(ctx, health);
    sup.launch(ServiceKind::FileBrowser).await.unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "admin");
    sup.shutdown_all(Duration::from_secs(5)).await;
}
