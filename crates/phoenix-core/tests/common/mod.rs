#![allow(dead_code)]

pub mod registry_server;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use phoenix_core::config::{BootConfig, Tuning};
use phoenix_core::transport::{AbortFlag, Headers, TransferError, Transport};

/// Tuning for a scratch root: no services, fast retries, registries at `base`.
pub fn tuning(root: &Path, base: &str) -> Tuning {
    let mut t = Tuning::default();
    t.paths.workspace_root = root.join("workspace");
    t.paths.volume_root = root.join("volume");
    t.paths.app_dir = root.join("app");
    t.paths.staging_dir = root.join("staging");
    t.registries.civitai_base = base.to_string();
    t.registries.huggingface_base = base.to_string();
    t.retry.base_delay_secs = 0.01;
    t.retry.max_delay_secs = 1;
    t.services.inference.command.clear();
    t.services.filebrowser.command.clear();
    t.services.filebrowser.setup.clear();
    t.timeouts.probe_secs = 2;
    t.timeouts.stop_grace_secs = 1;
    t
}

pub fn config(tuning: Tuning, env: &[(&str, &str)]) -> BootConfig {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    BootConfig::from_env(&env, tuning)
}

/// Wraps a transport and counts metadata and file requests.
pub struct CountingTransport {
    inner: Arc<dyn Transport>,
    pub calls: AtomicUsize,
}

impl CountingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        CountingTransport {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn get(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(url, headers)
    }

    fn download(
        &self,
        url: &str,
        headers: &Headers,
        dest: &Path,
        abort: &AbortFlag,
    ) -> Result<u64, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.download(url, headers, dest, abort)
    }

    fn probe(&self, url: &str, timeout: Duration) -> Result<u32, TransferError> {
        self.inner.probe(url, timeout)
    }
}

/// Poll until `path` exists or the deadline passes.
pub async fn wait_for(path: &Path, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
