//! Running every planned fetch with bounded parallelism.
//!
//! Keeps up to `max_concurrent` fetches in flight on the blocking pool; when
//! one finishes, the next spec starts until the queue is empty. Never fails:
//! everything is folded into a [`DownloadSummary`].

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::asset::{AssetPlan, AssetSpec, DownloadSummary, FailureReason, FetchResult, FetchStatus};
use crate::credentials::EnvScrubGuard;
use crate::fetcher::RetryingFetcher;
use crate::ledger::AssetLedger;
use crate::storage::TargetIndex;
use crate::transport::AbortFlag;

/// How many staged files the debug summary lists.
const SUMMARY_FILES: usize = 10;

pub struct DownloadCoordinator {
    fetcher: Arc<RetryingFetcher>,
    ledger: Option<AssetLedger>,
    models_root: PathBuf,
    max_concurrent: usize,
    debug_mode: bool,
}

impl DownloadCoordinator {
    pub fn new(
        fetcher: Arc<RetryingFetcher>,
        ledger: Option<AssetLedger>,
        models_root: impl Into<PathBuf>,
        max_concurrent: usize,
        debug_mode: bool,
    ) -> Self {
        DownloadCoordinator {
            fetcher,
            ledger,
            models_root: models_root.into(),
            max_concurrent: max_concurrent.max(1),
            debug_mode,
        }
    }

    /// Fetch everything in `plan`. Registry tokens are scrubbed from the
    /// process environment when this returns or is dropped.
    pub async fn run(&self, plan: AssetPlan, abort: AbortFlag) -> DownloadSummary {
        let _scrub = EnvScrubGuard::registry_tokens();
        let mut summary = DownloadSummary {
            rejected: plan.rejected.len(),
            ..DownloadSummary::default()
        };

        let specs = dedupe(plan.specs);
        summary.total = specs.len();
        if specs.is_empty() {
            tracing::info!("no assets requested");
            return summary;
        }
        self.fetcher.registry().log_token_presence();
        tracing::info!(
            assets = specs.len(),
            max_concurrent = self.max_concurrent,
            "starting downloads"
        );

        let models_root = self.models_root.clone();
        let index = match tokio::task::spawn_blocking(move || TargetIndex::scan(&models_root)).await {
            Ok(index) => Arc::new(index),
            Err(e) => {
                tracing::warn!("target index scan failed: {}", e);
                Arc::new(TargetIndex::default())
            }
        };

        let mut queue: VecDeque<(AssetSpec, Option<Vec<String>>)> = VecDeque::new();
        for spec in specs {
            let known = self.known_files(&spec).await;
            queue.push_back((spec, known));
        }

        let mut per_source: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
        let mut join_set = tokio::task::JoinSet::new();
        loop {
            while join_set.len() < self.max_concurrent {
                let Some((spec, known)) = queue.pop_front() else {
                    break;
                };
                let fetcher = Arc::clone(&self.fetcher);
                let index = Arc::clone(&index);
                let abort = abort.clone();
                join_set.spawn(async move {
                    let fallback = spec.clone();
                    let handle = tokio::task::spawn_blocking(move || {
                        fetcher.fetch(&spec, known.as_deref(), &index, &abort)
                    });
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => FetchResult {
                            asset: fallback,
                            status: FetchStatus::Failed(FailureReason::Aborted),
                            local_path: None,
                            attempts: 0,
                            last_error: Some(format!("fetch task failed: {}", e)),
                            files: Vec::new(),
                        },
                    }
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let result = match joined {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("download task join: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };
            summary.record(&result);
            let counts = per_source.entry(result.asset.source.as_str()).or_default();
            if result.is_failed() {
                counts.1 += 1;
            } else {
                counts.0 += 1;
            }
            self.remember(&result).await;
        }

        for (source, (ok, failed)) in &per_source {
            tracing::info!("{} downloads complete: {} successful, {} failed", source, ok, failed);
        }
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            rejected = summary.rejected,
            "all downloads complete"
        );
        if self.debug_mode {
            self.log_staging_summary().await;
            self.log_ledger().await;
        }
        summary
    }

    async fn known_files(&self, spec: &AssetSpec) -> Option<Vec<String>> {
        let ledger = self.ledger.as_ref()?;
        match ledger.known_files(spec).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(asset = %spec.label(), "ledger lookup failed: {}", e);
                None
            }
        }
    }

    async fn remember(&self, result: &FetchResult) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        if let Err(e) = ledger.record_result(result).await {
            tracing::warn!(asset = %result.asset.label(), "ledger update failed: {}", e);
        }
    }

    async fn log_ledger(&self) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        match ledger.list().await {
            Ok(entries) => {
                tracing::debug!(assets = entries.len(), "asset ledger");
                for entry in &entries {
                    tracing::debug!(
                        asset = %format!("{}:{}", entry.source, entry.identifier),
                        files = entry.files.len(),
                        "recorded"
                    );
                }
            }
            Err(e) => tracing::warn!("could not list asset ledger: {}", e),
        }
    }

    async fn log_staging_summary(&self) {
        let staging = self.fetcher.staging().to_path_buf();
        let Ok((listed, count, total)) =
            tokio::task::spawn_blocking(move || staging_summary(&staging)).await
        else {
            return;
        };
        if count == 0 {
            tracing::debug!("staging is empty");
            return;
        }
        tracing::debug!("staged files ({} total, {} bytes):", count, total);
        for (path, size) in listed {
            tracing::debug!("  {} ({} bytes)", path.display(), size);
        }
    }
}

/// Keep the first spec for each (source, identifier).
fn dedupe(specs: Vec<AssetSpec>) -> Vec<AssetSpec> {
    let mut out: Vec<AssetSpec> = Vec::with_capacity(specs.len());
    for spec in specs {
        if out.iter().any(|s| s.same_asset(&spec)) {
            tracing::debug!(asset = %spec.label(), "duplicate entry ignored");
            continue;
        }
        out.push(spec);
    }
    out
}

/// First few staged files with sizes, the file count, and the total size.
fn staging_summary(staging: &Path) -> (Vec<(PathBuf, u64)>, usize, u64) {
    let mut listed = Vec::new();
    let mut count = 0;
    let mut total = 0u64;
    for entry in WalkDir::new(staging)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        count += 1;
        total += size;
        if listed.len() < SUMMARY_FILES {
            listed.push((entry.into_path(), size));
        }
    }
    (listed, count, total)
}
