//! StorageRoot resolution and the on-disk layout every component shares.
//!
//! The root is decided once during SystemSetup (persistent volume when
//! requested and usable, otherwise the ephemeral workspace) and carried in the
//! immutable `BootContext`. Also home to the staging temp-file naming, free
//! space checks, path claims, and target-tree scans.

mod claims;
mod index;
mod space;

pub use claims::{ClaimGuard, PathClaims};
pub use index::{count_model_files, model_files, TargetIndex};
pub use space::available_bytes;

use std::fs;
use std::path::{Path, PathBuf};

use crate::classify::Category;
use crate::config::PathConfig;
use crate::error::BootError;

/// Suffix for files still being written into staging.
pub const TEMP_SUFFIX: &str = ".part";

/// Directory under the root holding phoenix's own state (ledger, file-browser DB).
pub const STATE_DIR: &str = ".phoenix";

/// Path for the temp file: appends `.part` to the final path (e.g. `vae.safetensors` → `vae.safetensors.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Resolved directory layout. Built once; read everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub models: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub state: PathBuf,
    pub staging: PathBuf,
    /// True when `root` is the persistent volume.
    pub on_volume: bool,
}

impl StorageLayout {
    pub fn at(root: impl Into<PathBuf>, staging: impl Into<PathBuf>, on_volume: bool) -> Self {
        let root = root.into();
        StorageLayout {
            models: root.join("models"),
            input: root.join("input"),
            output: root.join("output"),
            state: root.join(STATE_DIR),
            staging: staging.into(),
            root,
            on_volume,
        }
    }

    /// Pick the root from `USE_VOLUME` plus a probe of the volume mount.
    pub fn resolve(use_volume: bool, paths: &PathConfig, staging: PathBuf) -> Self {
        if use_volume {
            if volume_usable(&paths.volume_root) {
                tracing::info!(root = %paths.volume_root.display(), "using persistent volume");
                return Self::at(&paths.volume_root, staging, true);
            }
            tracing::warn!(
                volume = %paths.volume_root.display(),
                "USE_VOLUME set but volume is not mounted or not writable; falling back to workspace"
            );
        }
        tracing::info!(root = %paths.workspace_root.display(), "using ephemeral workspace");
        Self::at(&paths.workspace_root, staging, false)
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.models.join(category.dir_name())
    }

    /// Create every category directory plus input/output/state. Idempotent.
    pub fn ensure_tree(&self) -> Result<(), BootError> {
        let mut dirs = vec![self.input.clone(), self.output.clone(), self.state.clone()];
        dirs.extend(Category::ALL.iter().map(|c| self.category_dir(*c)));
        for dir in dirs {
            fs::create_dir_all(&dir)
                .map_err(|e| BootError::provisioning(&dir, "create storage directory", e))?;
        }
        tracing::debug!(models = %self.models.display(), "storage tree ready");
        Ok(())
    }
}

/// A volume is usable when it is a directory we can create a file in.
fn volume_usable(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let probe = path.join(format!(".phoenix-probe-{}", std::process::id()));
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "volume write probe failed");
            false
        }
    }
}
