//! Draining the staging directory into the target tree.
//!
//! One sequential pass over every recognized model file: classify, then
//! relocate. The pass first waits for transfers still writing into staging.
//! Afterwards the staging directory is rescanned and removed only if no
//! recognized file is left in it and no transfer holds a path under it, so a
//! model that failed to move is never lost.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{self, CategoryAssignment};
use crate::relocate::{AtomicRelocator, RelocateError, Relocation};
use crate::storage::{count_model_files, model_files, PathClaims};

/// A complete file in the staging directory.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Path relative to the staging root.
    pub relative: PathBuf,
    pub size: u64,
}

impl StagedFile {
    fn load(staging: &Path, path: PathBuf) -> Result<Self, RelocateError> {
        let size = fs::metadata(&path)
            .map_err(|e| RelocateError::Io {
                operation: "stat",
                path: path.clone(),
                source: e,
            })?
            .len();
        let relative = path
            .strip_prefix(staging)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        Ok(StagedFile {
            path,
            relative,
            size,
        })
    }

    pub fn assignment(&self) -> CategoryAssignment {
        classify::assign(&self.path, &self.relative, self.size)
    }
}

/// How long a pass waits for in-flight transfers to release staging.
pub const IN_FLIGHT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct OrganizeSummary {
    /// Files moved (including replacements).
    pub successful: usize,
    /// Staged copies discarded because an identical-size file was already in place.
    pub already_present: usize,
    pub failed: usize,
    pub failures: Vec<(PathBuf, RelocateError)>,
    pub staging_removed: bool,
    /// A transfer still held a staging path when the pass ran.
    pub transfers_in_flight: bool,
}

pub struct OrganizerPipeline {
    relocator: AtomicRelocator,
    claims: Arc<PathClaims>,
    in_flight_wait: Duration,
}

impl OrganizerPipeline {
    pub fn new(models_root: impl Into<PathBuf>, claims: Arc<PathClaims>) -> Self {
        OrganizerPipeline {
            relocator: AtomicRelocator::new(models_root, Arc::clone(&claims)),
            claims,
            in_flight_wait: IN_FLIGHT_WAIT,
        }
    }

    pub fn with_in_flight_wait(mut self, wait: Duration) -> Self {
        self.in_flight_wait = wait;
        self
    }

    /// Organize everything under `staging`. `None` or a missing directory is a no-op.
    pub fn organize(&self, staging: Option<&Path>) -> OrganizeSummary {
        let mut summary = OrganizeSummary::default();
        let Some(staging) = staging else {
            tracing::debug!("no staging directory configured; nothing to organize");
            return summary;
        };
        if !staging.is_dir() {
            tracing::info!(staging = %staging.display(), "staging directory absent; nothing to organize");
            return summary;
        }

        if !self.claims.wait_idle_under(staging, self.in_flight_wait) {
            tracing::warn!(
                staging = %staging.display(),
                "transfers still writing into staging; organizing finished files only"
            );
            summary.transfers_in_flight = true;
        }

        let files = model_files(staging);
        tracing::info!(count = files.len(), staging = %staging.display(), "organizing staged files");

        // Destinations filled during this pass; a later file never overwrites one.
        let mut placed = HashSet::new();
        for path in files {
            match self.organize_one(staging, path.clone(), &placed) {
                Ok(Relocation::AlreadyPresent(dest)) => {
                    placed.insert(dest);
                    summary.already_present += 1;
                }
                Ok(moved) => {
                    placed.insert(moved.destination().to_path_buf());
                    summary.successful += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), "organize failed: {}", e);
                    summary.failed += 1;
                    summary.failures.push((path, e));
                }
            }
        }

        let remaining = count_model_files(staging);
        let idle = self.claims.wait_idle_under(staging, Duration::ZERO);
        summary.transfers_in_flight |= !idle;
        if remaining == 0 && idle {
            match fs::remove_dir_all(staging) {
                Ok(()) => {
                    summary.staging_removed = true;
                    tracing::info!(staging = %staging.display(), "staging directory removed");
                }
                Err(e) => tracing::warn!(staging = %staging.display(), "could not remove staging: {}", e),
            }
        } else if remaining > 0 {
            tracing::warn!(
                remaining,
                staging = %staging.display(),
                "model files remain in staging; keeping it"
            );
        } else {
            tracing::warn!(staging = %staging.display(), "a transfer still holds staging; keeping it");
        }

        tracing::info!(
            successful = summary.successful,
            already_present = summary.already_present,
            failed = summary.failed,
            "organize finished"
        );
        summary
    }

    fn organize_one(
        &self,
        staging: &Path,
        path: PathBuf,
        placed: &HashSet<PathBuf>,
    ) -> Result<Relocation, RelocateError> {
        let staged = StagedFile::load(staging, path)?;
        let assignment = staged.assignment();
        tracing::debug!(
            file = %staged.relative.display(),
            category = %assignment.category,
            rule = assignment.rule,
            "classified"
        );
        let name = staged
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| RelocateError::InvalidSource {
                path: staged.path.clone(),
            })?;
        let dest = self.relocator.target(assignment.category, &name);
        if !placed.contains(&dest) {
            return self.relocator.relocate(&staged.path, assignment.category);
        }
        let Some(alt) = disambiguated_name(&staged.relative, &name)
            .filter(|alt| !placed.contains(&self.relocator.target(assignment.category, alt)))
        else {
            return Err(RelocateError::NameCollision { path: dest });
        };
        tracing::info!(
            file = %staged.relative.display(),
            name = %alt.to_string_lossy(),
            "name already taken in this pass; renaming"
        );
        self.relocator.relocate_as(&staged.path, assignment.category, &alt)
    }
}

/// `<parent>_<name>` from the staged relative path, e.g.
/// `text_encoder_2/model.safetensors` -> `text_encoder_2_model.safetensors`.
fn disambiguated_name(relative: &Path, name: &OsString) -> Option<OsString> {
    let parent = relative.parent()?.file_name()?;
    let mut alt = OsString::from(parent);
    alt.push("_");
    alt.push(name);
    Some(alt)
}
