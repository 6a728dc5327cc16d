//! Fetching one asset into staging: resolve, transfer, verify, finalize.
//!
//! Never fails outward; every outcome is a [`FetchResult`]. Runs on the
//! blocking pool. Only the staging directory is written; the target tree is
//! read (for presence checks) but never touched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::asset::{AssetSource, AssetSpec, FetchResult, FetchStatus};
use crate::checksum::{self, Verification};
use crate::credentials::{CIVITAI_TOKEN_ENV, HUGGINGFACE_TOKEN_ENV};
use crate::registry::{RegistryClient, RemoteFile};
use crate::retry::{run_with_retry, Attempted, RetryPolicy};
use crate::storage::{available_bytes, temp_path, PathClaims, TargetIndex};
use crate::transport::{AbortFlag, Headers, TransferError, Transport};

pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    registry: Arc<RegistryClient>,
    policy: RetryPolicy,
    staging: PathBuf,
    /// Free space that must remain after a file lands.
    min_free_space: u64,
    claims: Arc<PathClaims>,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<RegistryClient>,
        policy: RetryPolicy,
        staging: impl Into<PathBuf>,
        min_free_space: u64,
        claims: Arc<PathClaims>,
    ) -> Self {
        RetryingFetcher {
            transport,
            registry,
            policy,
            staging: staging.into(),
            min_free_space,
            claims,
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Fetch `spec` into staging.
    ///
    /// `known_files` are the names the ledger recorded for this asset on an
    /// earlier run; if all of them are in `index` the asset is skipped without
    /// any network call.
    pub fn fetch(
        &self,
        spec: &AssetSpec,
        known_files: Option<&[String]>,
        index: &TargetIndex,
        abort: &AbortFlag,
    ) -> FetchResult {
        let label = spec.label();

        if let Some(known) = known_files.filter(|k| !k.is_empty()) {
            if known.iter().all(|name| index.contains(name)) {
                tracing::info!(asset = %label, "already present (recorded files found), skipping");
                return FetchResult::skipped(spec.clone(), known.to_vec());
            }
        }

        let resolved = run_with_retry(&self.policy, abort, &label, |_| {
            self.registry.resolve(self.transport.as_ref(), spec)
        });
        let mut attempts = resolved.attempts;
        let files = match resolved.result {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(asset = %label, "could not retrieve metadata: {}", e);
                self.hint_on_auth_failure(spec.source, &e);
                return FetchResult::failed(spec.clone(), &e, attempts);
            }
        };

        let mut names = Vec::with_capacity(files.len());
        let mut pending = Vec::new();
        for file in files {
            names.push(file.name.clone());
            if index.contains(&file.name) {
                tracing::info!(asset = %label, "skipping download for '{}', file already exists", file.name);
            } else {
                pending.push(file);
            }
        }
        if pending.is_empty() {
            return FetchResult::skipped(spec.clone(), names);
        }

        let headers = self.registry.headers(spec.source);
        let mut local_path = None;
        let mut last_error: Option<TransferError> = None;
        for file in &pending {
            if abort.is_requested() {
                last_error = Some(TransferError::Aborted);
                break;
            }
            let expected = match spec.source {
                AssetSource::HostedModel => spec.expected_hash.clone().or_else(|| file.sha256.clone()),
                AssetSource::RegistryRepo => file.sha256.clone(),
            };
            tracing::info!(asset = %label, "starting download: {}", file.name);
            let out = self.fetch_file(&label, file, expected.as_deref(), &headers, abort);
            attempts += out.attempts;
            match out.result {
                Ok(path) => {
                    tracing::info!(asset = %label, "completed download: {}", file.name);
                    local_path = Some(path);
                }
                Err(e) => {
                    tracing::error!(asset = %label, file = %file.name, "download failed: {}", e);
                    self.hint_on_auth_failure(spec.source, &e);
                    let stop = matches!(e, TransferError::Aborted | TransferError::InsufficientSpace { .. });
                    last_error = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e) => FetchResult::failed(spec.clone(), &e, attempts),
            None => FetchResult {
                asset: spec.clone(),
                status: FetchStatus::Success,
                local_path,
                attempts,
                last_error: None,
                files: names,
            },
        }
    }

    fn fetch_file(
        &self,
        label: &str,
        file: &RemoteFile,
        expected: Option<&str>,
        headers: &Headers,
        abort: &AbortFlag,
    ) -> Attempted<PathBuf> {
        let dest = self.staging.join(&file.relative_path);
        let dir = dest.parent().unwrap_or(self.staging.as_path()).to_path_buf();
        if let Err(e) = fs::create_dir_all(&dir) {
            return Attempted {
                result: Err(TransferError::Storage(e)),
                attempts: 0,
            };
        }
        let _claim = self.claims.claim(&dest);

        if staged_copy_usable(&dest, file, expected) {
            tracing::info!(asset = %label, "complete copy of {} already staged", file.name);
            return Attempted {
                result: Ok(dest),
                attempts: 0,
            };
        }

        let part = temp_path(&dest);
        let what = format!("{} ({})", label, file.name);
        run_with_retry(&self.policy, abort, &what, |_| {
            self.check_space(&dir, file.size)?;
            let _ = fs::remove_file(&part);
            if let Err(e) = self.transport.download(&file.url, headers, &part, abort) {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
            match expected {
                Some(expected) => match checksum::verify_sha256(&part, expected) {
                    Ok(Verification::Match) => {
                        tracing::info!("checksum passed for {}", file.name);
                    }
                    Ok(Verification::Mismatch { expected, actual }) => {
                        let _ = fs::remove_file(&part);
                        return Err(TransferError::ChecksumMismatch { expected, actual });
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&part);
                        return Err(TransferError::Storage(io::Error::other(e.to_string())));
                    }
                },
                None => tracing::debug!("no checksum available for {}, skipping validation", file.name),
            }
            // Staging may already be handed to the organizer once abort is raised.
            if abort.is_requested() {
                let _ = fs::remove_file(&part);
                return Err(TransferError::Aborted);
            }
            fs::rename(&part, &dest).map_err(|e| {
                let _ = fs::remove_file(&part);
                TransferError::Storage(e)
            })?;
            Ok(dest.clone())
        })
    }

    fn check_space(&self, dir: &Path, size: Option<u64>) -> Result<(), TransferError> {
        let needed = size.unwrap_or(0).saturating_add(self.min_free_space);
        match available_bytes(dir) {
            Ok(available) if available < needed => {
                Err(TransferError::InsufficientSpace { needed, available })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!("free space probe failed for {}: {}", dir.display(), e);
                Ok(())
            }
        }
    }

    fn hint_on_auth_failure(&self, source: AssetSource, e: &TransferError) {
        if !matches!(e, TransferError::Http(401 | 403)) {
            return;
        }
        if self.registry.has_token(source) {
            tracing::warn!("check that the {} token is valid and has access to this asset", source);
        } else {
            let var = match source {
                AssetSource::RegistryRepo => HUGGINGFACE_TOKEN_ENV,
                AssetSource::HostedModel => CIVITAI_TOKEN_ENV,
            };
            tracing::warn!("asset is likely private or gated; provide {}", var);
        }
    }
}

/// A finished file left in staging by an interrupted run.
fn staged_copy_usable(dest: &Path, file: &RemoteFile, expected: Option<&str>) -> bool {
    let Ok(meta) = fs::metadata(dest) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    match (file.size, expected) {
        (Some(size), _) => meta.len() == size,
        (None, Some(hash)) => checksum::verify_sha256(dest, hash)
            .map(|v| v.is_match())
            .unwrap_or(false),
        (None, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::credentials::RegistryCredentials;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const CIVITAI: &str = "http://civitai.test";
    const HELLO_SHA: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    /// Serves canned bodies by URL and counts every call.
    #[derive(Default)]
    struct ScriptedTransport {
        bodies: HashMap<String, Vec<u8>>,
        failures_left: Mutex<HashMap<String, u32>>,
        calls: AtomicUsize,
        /// Raise the abort flag as each transfer finishes.
        abort_on_download: bool,
    }

    impl ScriptedTransport {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }

        fn aborting(mut self) -> Self {
            self.abort_on_download = true;
            self
        }

        fn failing(self, url: &str, times: u32) -> Self {
            self.failures_left.lock().unwrap().insert(url.to_string(), times);
            self
        }

        fn lookup(&self, url: &str) -> Result<Vec<u8>, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(n) = self.failures_left.lock().unwrap().get_mut(url) {
                if *n > 0 {
                    *n -= 1;
                    return Err(TransferError::Http(502));
                }
            }
            self.bodies.get(url).cloned().ok_or(TransferError::Http(404))
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str, _headers: &Headers) -> Result<Vec<u8>, TransferError> {
            self.lookup(url)
        }

        fn download(
            &self,
            url: &str,
            _headers: &Headers,
            dest: &Path,
            abort: &AbortFlag,
        ) -> Result<u64, TransferError> {
            let body = self.lookup(url)?;
            fs::write(dest, &body)?;
            if self.abort_on_download {
                abort.request();
            }
            Ok(body.len() as u64)
        }

        fn probe(&self, _url: &str, _timeout: Duration) -> Result<u32, TransferError> {
            Ok(200)
        }
    }

    fn metadata(name: &str, sha: &str) -> Vec<u8> {
        format!(
            r#"{{"files":[{{"name":"{}","primary":true,"hashes":{{"SHA256":"{}"}}}}]}}"#,
            name, sha
        )
        .into_bytes()
    }

    fn meta_url(id: &str) -> String {
        format!("{}/api/v1/model-versions/{}", CIVITAI, id)
    }

    fn file_url(id: &str) -> String {
        format!("{}/api/download/models/{}?type=Model&format=SafeTensor", CIVITAI, id)
    }

    fn fetcher(transport: Arc<ScriptedTransport>, staging: &Path) -> RetryingFetcher {
        let registry = RegistryClient::new(
            &RegistryConfig {
                civitai_base: CIVITAI.to_string(),
                huggingface_base: "http://hf.test".to_string(),
            },
            RegistryCredentials::default(),
        );
        RetryingFetcher::new(
            transport,
            Arc::new(registry),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            staging,
            0,
            Arc::new(PathClaims::new()),
        )
    }

    #[test]
    fn downloads_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("1569593"), &metadata("flux_vae.safetensors", HELLO_SHA))
                .with(&file_url("1569593"), b"hello\n"),
        );
        let spec = AssetSpec::hosted_model("1569593", None).unwrap();
        let r = fetcher(t, dir.path()).fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert_eq!(r.status, FetchStatus::Success);
        assert_eq!(r.files, vec!["flux_vae.safetensors"]);
        let staged = dir.path().join("civitai/1569593/flux_vae.safetensors");
        assert_eq!(r.local_path.as_deref(), Some(staged.as_path()));
        assert_eq!(fs::read(&staged).unwrap(), b"hello\n");
        assert!(!dir.path().join("civitai/1569593/flux_vae.safetensors.part").exists());
    }

    #[test]
    fn checksum_mismatch_retries_then_fails_clean() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("7"), &metadata("bad.safetensors", HELLO_SHA))
                .with(&file_url("7"), b"tampered\n"),
        );
        let spec = AssetSpec::hosted_model("7", None).unwrap();
        let r = fetcher(t, dir.path()).fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert_eq!(
            r.status,
            FetchStatus::Failed(crate::asset::FailureReason::ChecksumMismatch)
        );
        assert_eq!(r.attempts, 1 + 3);
        assert_eq!(
            fs::read_dir(dir.path().join("civitai/7")).unwrap().count(),
            0
        );
    }

    #[test]
    fn pinned_hash_overrides_registry() {
        let dir = tempfile::tempdir().unwrap();
        let wrong = "00".repeat(32);
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("8"), &metadata("m.safetensors", HELLO_SHA))
                .with(&file_url("8"), b"hello\n"),
        );
        let spec = AssetSpec::hosted_model(&format!("8@{}", wrong), None).unwrap();
        let r = fetcher(t, dir.path()).fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert!(r.is_failed());
    }

    #[test]
    fn transient_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("9"), &metadata("m.safetensors", HELLO_SHA))
                .with(&file_url("9"), b"hello\n")
                .failing(&meta_url("9"), 1)
                .failing(&file_url("9"), 2),
        );
        let spec = AssetSpec::hosted_model("9", None).unwrap();
        let r = fetcher(t, dir.path()).fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert_eq!(r.status, FetchStatus::Success);
        assert_eq!(r.attempts, 2 + 3);
    }

    #[test]
    fn existing_target_file_skips_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models/vae");
        fs::create_dir_all(&models).unwrap();
        fs::write(models.join("flux_vae.safetensors"), b"x").unwrap();
        let t = Arc::new(
            ScriptedTransport::default().with(&meta_url("1"), &metadata("flux_vae.safetensors", HELLO_SHA)),
        );
        let index = TargetIndex::scan(&dir.path().join("models"));
        let spec = AssetSpec::hosted_model("1", None).unwrap();
        let staging = dir.path().join("stage");
        let r = fetcher(Arc::clone(&t), &staging).fetch(&spec, None, &index, &AbortFlag::new());
        assert_eq!(r.status, FetchStatus::Skipped(crate::asset::SkipReason::AlreadyPresent));
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ledger_names_skip_without_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("flux_vae.safetensors"), b"x").unwrap();
        let t = Arc::new(ScriptedTransport::default());
        let index = TargetIndex::scan(dir.path());
        let spec = AssetSpec::hosted_model("1", None).unwrap();
        let known = vec!["flux_vae.safetensors".to_string()];
        let r = fetcher(Arc::clone(&t), &dir.path().join("stage")).fetch(
            &spec,
            Some(&known),
            &index,
            &AbortFlag::new(),
        );
        assert!(matches!(r.status, FetchStatus::Skipped(_)));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn insufficient_space_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("3"), &metadata("big.safetensors", HELLO_SHA))
                .with(&file_url("3"), b"hello\n"),
        );
        let mut f = fetcher(Arc::clone(&t), dir.path());
        f.min_free_space = u64::MAX;
        let spec = AssetSpec::hosted_model("3", None).unwrap();
        let r = f.fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert_eq!(
            r.status,
            FetchStatus::Failed(crate::asset::FailureReason::InsufficientSpace)
        );
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_before_start_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(ScriptedTransport::default());
        let abort = AbortFlag::new();
        abort.request();
        let spec = AssetSpec::hosted_model("3", None).unwrap();
        let r = fetcher(Arc::clone(&t), dir.path()).fetch(&spec, None, &TargetIndex::default(), &abort);
        assert_eq!(r.status, FetchStatus::Failed(crate::asset::FailureReason::Aborted));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reuses_complete_staged_copy() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("civitai/4");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("m.safetensors"), b"hello\n").unwrap();
        let t = Arc::new(
            ScriptedTransport::default().with(&meta_url("4"), &metadata("m.safetensors", HELLO_SHA)),
        );
        let spec = AssetSpec::hosted_model("4", None).unwrap();
        let r = fetcher(Arc::clone(&t), dir.path()).fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
        assert_eq!(r.status, FetchStatus::Success);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn versions_sharing_a_file_name_stage_apart() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("11"), &metadata("model.safetensors", HELLO_SHA))
                .with(&file_url("11"), b"hello\n")
                .with(&meta_url("12"), br#"{"files":[{"name":"model.safetensors","primary":true}]}"#)
                .with(&file_url("12"), b"other weights"),
        );
        let f = fetcher(t, dir.path());
        for id in ["11", "12"] {
            let spec = AssetSpec::hosted_model(id, None).unwrap();
            let r = f.fetch(&spec, None, &TargetIndex::default(), &AbortFlag::new());
            assert_eq!(r.status, FetchStatus::Success, "{id}");
        }
        assert_eq!(
            fs::read(dir.path().join("civitai/11/model.safetensors")).unwrap(),
            b"hello\n"
        );
        assert_eq!(
            fs::read(dir.path().join("civitai/12/model.safetensors")).unwrap(),
            b"other weights"
        );
    }

    #[test]
    fn abort_during_transfer_never_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let t = Arc::new(
            ScriptedTransport::default()
                .with(&meta_url("5"), &metadata("late.safetensors", HELLO_SHA))
                .with(&file_url("5"), b"hello\n")
                .aborting(),
        );
        let abort = AbortFlag::new();
        let spec = AssetSpec::hosted_model("5", None).unwrap();
        let r = fetcher(t, dir.path()).fetch(&spec, None, &TargetIndex::default(), &abort);
        assert_eq!(r.status, FetchStatus::Failed(crate::asset::FailureReason::Aborted));
        assert!(r.local_path.is_none());
        assert_eq!(
            fs::read_dir(dir.path().join("civitai/5")).unwrap().count(),
            0
        );
    }
}
