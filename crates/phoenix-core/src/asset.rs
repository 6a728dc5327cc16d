//! What to fetch and how each fetch ended.

use std::fmt;
use std::path::PathBuf;

use crate::checksum;
use crate::classify::Category;
use crate::config::BootConfig;
use crate::error::BootError;
use crate::transport::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetSource {
    /// Hugging Face repository (`owner/name`).
    RegistryRepo,
    /// Civitai model version (numeric id).
    HostedModel,
}

impl AssetSource {
    /// Stable key used in the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            AssetSource::RegistryRepo => "huggingface",
            AssetSource::HostedModel => "civitai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "huggingface" => Some(AssetSource::RegistryRepo),
            "civitai" => Some(AssetSource::HostedModel),
            _ => None,
        }
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub source: AssetSource,
    pub identifier: String,
    /// Pinned SHA-256 (lowercase hex) that overrides the registry-provided hash.
    pub expected_hash: Option<String>,
    /// List the id was configured in. Informational; the classifier decides placement.
    pub category_hint: Option<Category>,
}

impl AssetSpec {
    /// Validate an `owner/name` repository id.
    pub fn registry_repo(raw: &str) -> Result<Self, BootError> {
        let id = raw.trim();
        let valid = match id.split_once('/') {
            Some((owner, name)) => {
                !owner.is_empty()
                    && !name.is_empty()
                    && !name.contains('/')
                    && id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
            }
            None => false,
        };
        if !valid {
            return Err(BootError::ConfigurationWarning(format!(
                "malformed repository id {:?} (expected owner/name)",
                raw
            )));
        }
        Ok(AssetSpec {
            source: AssetSource::RegistryRepo,
            identifier: id.to_string(),
            expected_hash: None,
            category_hint: None,
        })
    }

    /// Validate a model-version id, optionally pinned as `id@<sha256>`.
    pub fn hosted_model(raw: &str, hint: Option<Category>) -> Result<Self, BootError> {
        let raw_trim = raw.trim();
        let (id, pin) = match raw_trim.split_once('@') {
            Some((id, pin)) => (id.trim(), Some(pin.trim())),
            None => (raw_trim, None),
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BootError::ConfigurationWarning(format!(
                "malformed model version id {:?} (expected digits)",
                raw
            )));
        }
        let expected_hash = match pin {
            Some(p) if checksum::is_sha256_hex(p) => Some(checksum::normalize(p)),
            Some(_) => {
                return Err(BootError::ConfigurationWarning(format!(
                    "malformed hash pin in {:?} (expected 64 hex chars)",
                    raw
                )))
            }
            None => None,
        };
        Ok(AssetSpec {
            source: AssetSource::HostedModel,
            identifier: id.to_string(),
            expected_hash,
            category_hint: hint,
        })
    }

    /// `source:identifier`, for logs.
    pub fn label(&self) -> String {
        format!("{}:{}", self.source, self.identifier)
    }

    pub fn same_asset(&self, other: &AssetSpec) -> bool {
        self.source == other.source && self.identifier == other.identifier
    }
}

/// Validated specs plus the entries that were rejected.
#[derive(Debug, Default)]
pub struct AssetPlan {
    pub specs: Vec<AssetSpec>,
    pub rejected: Vec<BootError>,
}

impl AssetPlan {
    fn push(&mut self, r: Result<AssetSpec, BootError>) {
        match r {
            Ok(spec) => self.specs.push(spec),
            Err(w) => {
                tracing::warn!("{}", w);
                self.rejected.push(w);
            }
        }
    }
}

/// Build the fetch plan from configuration. Malformed entries become warnings.
pub fn plan(cfg: &BootConfig) -> AssetPlan {
    let mut plan = AssetPlan::default();
    for raw in &cfg.hf_repos {
        plan.push(AssetSpec::registry_repo(raw));
    }
    let hosted = [
        (&cfg.civitai_checkpoints, Category::Checkpoint),
        (&cfg.civitai_loras, Category::Lora),
        (&cfg.civitai_vaes, Category::Vae),
    ];
    for (list, hint) in hosted {
        for raw in list {
            plan.push(AssetSpec::hosted_model(raw, Some(hint)));
        }
    }
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Metadata,
    Network,
    Http(u32),
    ChecksumMismatch,
    InsufficientSpace,
    Storage,
    Aborted,
}

impl From<&TransferError> for FailureReason {
    fn from(e: &TransferError) -> Self {
        match e {
            TransferError::Curl(_) | TransferError::PartialTransfer { .. } => FailureReason::Network,
            TransferError::Http(code) => FailureReason::Http(*code),
            TransferError::Metadata(_) => FailureReason::Metadata,
            TransferError::ChecksumMismatch { .. } => FailureReason::ChecksumMismatch,
            TransferError::InsufficientSpace { .. } => FailureReason::InsufficientSpace,
            TransferError::Storage(_) => FailureReason::Storage,
            TransferError::Aborted => FailureReason::Aborted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Failed(FailureReason),
    Skipped(SkipReason),
}

/// Outcome of fetching one asset.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub asset: AssetSpec,
    pub status: FetchStatus,
    /// Staging path of the (last) file fetched.
    pub local_path: Option<PathBuf>,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Final file names this asset produced or was proven by.
    pub files: Vec<String>,
}

impl FetchResult {
    pub fn skipped(asset: AssetSpec, files: Vec<String>) -> Self {
        FetchResult {
            asset,
            status: FetchStatus::Skipped(SkipReason::AlreadyPresent),
            local_path: None,
            attempts: 0,
            last_error: None,
            files,
        }
    }

    pub fn failed(asset: AssetSpec, error: &TransferError, attempts: u32) -> Self {
        FetchResult {
            asset,
            status: FetchStatus::Failed(error.into()),
            local_path: None,
            attempts,
            last_error: Some(error.to_string()),
            files: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FetchStatus::Failed(_))
    }
}

/// Aggregate of a download run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Valid specs attempted (after de-duplication).
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Malformed entries dropped during planning.
    pub rejected: usize,
}

impl DownloadSummary {
    pub fn record(&mut self, result: &FetchResult) {
        match result.status {
            FetchStatus::Success => self.succeeded += 1,
            FetchStatus::Skipped(_) => self.skipped += 1,
            FetchStatus::Failed(_) => self.failed += 1,
        }
    }
}
