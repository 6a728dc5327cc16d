//! Boot configuration.
//!
//! Two layers: the environment (what to fetch, credentials, feature flags),
//! read once at `Init`, and an optional TOML tuning file for policy knobs
//! (retry, timeouts, paths, service commands). Missing tuning values fall back
//! to built-in defaults; nothing is ever written back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::{
    FileBrowserAccount, RegistryCredentials, Secret, CIVITAI_TOKEN_ENV, HUGGINGFACE_TOKEN_ENV,
};

/// Source of environment-style key/value configuration.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Retry policy parameters (`[retry]` in the tuning file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per asset file (including the first).
    pub max_attempts: u32,
    /// Linear backoff step in seconds: attempt N waits N × base.
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5.0,
            max_delay_secs: 60,
        }
    }
}

/// Per-step and per-call bounds (`[timeouts]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub network_check_secs: u64,
    pub download_secs: u64,
    pub organize_secs: u64,
    pub service_launch_secs: u64,
    /// Upper bound for a single file transfer.
    pub transfer_secs: u64,
    pub connect_secs: u64,
    /// Health and reachability probes.
    pub probe_secs: u64,
    /// How long a stopping service gets after SIGTERM.
    pub stop_grace_secs: u64,
    pub cleanup_secs: u64,
    pub plugin_install_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            network_check_secs: 30,
            download_secs: 4 * 3600,
            organize_secs: 30 * 60,
            service_launch_secs: 10 * 60,
            transfer_secs: 3 * 3600,
            connect_secs: 30,
            probe_secs: 5,
            stop_grace_secs: 15,
            cleanup_secs: 120,
            plugin_install_secs: 300,
        }
    }
}

/// Filesystem anchors (`[paths]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Ephemeral storage root, always available.
    pub workspace_root: PathBuf,
    /// Persistent volume mount point, used when `USE_VOLUME` is set and it is mounted.
    pub volume_root: PathBuf,
    /// Inference application directory (expects `models/`, `input/`, `output/`).
    pub app_dir: PathBuf,
    /// Default staging directory when `DOWNLOAD_TMP_DIR` is not set.
    pub staging_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/workspace"),
            volume_root: PathBuf::from("/runpod-volume"),
            app_dir: PathBuf::from("/ComfyUI"),
            staging_dir: PathBuf::from("/workspace/downloads_tmp"),
        }
    }
}

/// Registry endpoints (`[registries]`); overridable for mirrors and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub civitai_base: String,
    pub huggingface_base: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            civitai_base: "https://civitai.com".to_string(),
            huggingface_base: "https://huggingface.co".to_string(),
        }
    }
}

/// One supervised service (`[services.inference]`, `[services.filebrowser]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Program and arguments; empty disables the service.
    pub command: Vec<String>,
    /// Commands run once before launch (failures are logged, not fatal).
    pub setup: Vec<Vec<String>>,
    pub port: u16,
    pub health_path: String,
    pub health_attempts: u32,
    pub health_interval_secs: u64,
    /// When true, failing to become healthy counts as a boot error.
    pub required: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            setup: Vec::new(),
            port: 0,
            health_path: "/".to_string(),
            health_attempts: 30,
            health_interval_secs: 2,
            required: false,
        }
    }
}

impl ServiceConfig {
    fn inference_default() -> Self {
        Self {
            command: args(&[
                "python3",
                "{app_dir}/main.py",
                "--listen",
                "0.0.0.0",
                "--port",
                "{port}",
            ]),
            port: 8188,
            health_attempts: 90,
            required: true,
            ..Self::default()
        }
    }

    fn filebrowser_default() -> Self {
        Self {
            command: args(&[
                "filebrowser",
                "--root",
                "{root}",
                "--port",
                "{port}",
                "--address",
                "0.0.0.0",
                "--database",
                "{state}/filebrowser.db",
            ]),
            setup: vec![
                args(&["filebrowser", "config", "init", "--database", "{state}/filebrowser.db"]),
                args(&[
                    "filebrowser",
                    "users",
                    "add",
                    "{user}",
                    "{password}",
                    "--perm.admin",
                    "--database",
                    "{state}/filebrowser.db",
                ]),
            ],
            port: 8080,
            health_path: "/health".to_string(),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty()
    }
}

/// A service table present in the tuning file replaces that service's whole
/// definition; fields it omits take the generic [`ServiceConfig`] defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub inference: ServiceConfig,
    pub filebrowser: ServiceConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            inference: ServiceConfig::inference_default(),
            filebrowser: ServiceConfig::filebrowser_default(),
        }
    }
}

/// Shutdown hook commands (`[cleanup]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Secure-deletion routine invoked when `PARANOID_MODE` is set.
    pub paranoid_command: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            paranoid_command: args(&["/usr/local/bin/forensic_cleanup.sh"]),
        }
    }
}

/// Policy knobs loaded from the optional tuning file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Maximum assets fetched at once.
    pub max_concurrent_downloads: usize,
    /// Free space (MiB) that must remain on the staging volume beyond a file's size.
    pub min_free_space_mb: u64,
    /// Reconciliation monitor period.
    pub monitor_interval_secs: u64,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub paths: PathConfig,
    pub registries: RegistryConfig,
    pub services: ServicesConfig,
    pub cleanup: CleanupConfig,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            min_free_space_mb: 1024,
            monitor_interval_secs: 30,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            paths: PathConfig::default(),
            registries: RegistryConfig::default(),
            services: ServicesConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Tuning {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn min_free_space_bytes(&self) -> u64 {
        self.min_free_space_mb.saturating_mul(1024 * 1024)
    }

    /// Parse a tuning file body.
    pub fn from_toml(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    /// Load from `path` when given and present; defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Tuning::default());
        };
        if !path.exists() {
            tracing::debug!("no tuning file at {}, using defaults", path.display());
            return Ok(Tuning::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("read tuning file {}", path.display()))?;
        let tuning = Self::from_toml(&data)
            .with_context(|| format!("parse tuning file {}", path.display()))?;
        tracing::info!("loaded tuning from {}", path.display());
        Ok(tuning)
    }
}

/// Location of the tuning file: `PHOENIX_CONFIG`, else the XDG config dir.
pub fn tuning_path(env: &impl EnvSource) -> Option<PathBuf> {
    if let Some(p) = env.var("PHOENIX_CONFIG").filter(|p| !p.trim().is_empty()) {
        return Some(PathBuf::from(p));
    }
    xdg::BaseDirectories::with_prefix("phoenix")
        .ok()
        .and_then(|dirs| dirs.find_config_file("config.toml"))
}

/// Everything read from the environment at `Init`.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub debug_mode: bool,
    pub use_volume: bool,
    pub paranoid_mode: bool,
    pub credentials: RegistryCredentials,
    /// Raw `owner/name` entries from `HF_REPOS_TO_DOWNLOAD`.
    pub hf_repos: Vec<String>,
    pub civitai_checkpoints: Vec<String>,
    pub civitai_loras: Vec<String>,
    pub civitai_vaes: Vec<String>,
    pub filebrowser: FileBrowserAccount,
    /// Extra installable plugin sources (git URLs).
    pub plugin_sources: Vec<String>,
    /// `DOWNLOAD_TMP_DIR` when set.
    pub staging_override: Option<PathBuf>,
    pub tuning: Tuning,
}

impl BootConfig {
    /// Read the environment. Never fails: malformed values are validated later
    /// (asset planning) and reported as configuration warnings.
    pub fn from_env(env: &impl EnvSource, tuning: Tuning) -> Self {
        let credentials = RegistryCredentials {
            huggingface: non_empty(env, HUGGINGFACE_TOKEN_ENV).map(Secret::new),
            civitai: non_empty(env, CIVITAI_TOKEN_ENV).map(Secret::new),
        };
        let username = non_empty(env, "FB_USERNAME").unwrap_or_else(|| "admin".to_string());
        BootConfig {
            debug_mode: flag(env, "DEBUG_MODE"),
            use_volume: flag(env, "USE_VOLUME"),
            paranoid_mode: flag(env, "PARANOID_MODE"),
            credentials,
            hf_repos: list(env, "HF_REPOS_TO_DOWNLOAD"),
            civitai_checkpoints: list(env, "CIVITAI_CHECKPOINTS_TO_DOWNLOAD"),
            civitai_loras: list(env, "CIVITAI_LORAS_TO_DOWNLOAD"),
            civitai_vaes: list(env, "CIVITAI_VAES_TO_DOWNLOAD"),
            filebrowser: FileBrowserAccount::new(username, env.var("FB_PASSWORD")),
            plugin_sources: list(env, "PLUGIN_SOURCES"),
            staging_override: non_empty(env, "DOWNLOAD_TMP_DIR").map(PathBuf::from),
            tuning,
        }
    }

    /// True when any asset list is non-empty.
    pub fn has_requested_assets(&self) -> bool {
        !(self.hf_repos.is_empty()
            && self.civitai_checkpoints.is_empty()
            && self.civitai_loras.is_empty()
            && self.civitai_vaes.is_empty())
    }
}

/// Parse a boolean flag: `true/1/yes/on`, case-insensitive.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn flag(env: &impl EnvSource, key: &str) -> bool {
    env.var(key).map(|v| parse_flag(&v)).unwrap_or(false)
}

fn list(env: &impl EnvSource, key: &str) -> Vec<String> {
    env.var(key).map(|v| split_list(&v)).unwrap_or_default()
}

fn non_empty(env: &impl EnvSource, key: &str) -> Option<String> {
    env.var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
