//! Moving classified files from staging into the target tree.
//!
//! Same-volume moves are a single `rename`. Across volumes the file is copied
//! to a hidden temp name beside the destination, synced, and renamed into
//! place before the source is deleted, so a crash at any point leaves at least
//! one complete copy. On failure the source stays in staging.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::classify::Category;
use crate::storage::PathClaims;

/// Linux `EXDEV`.
const EXDEV: i32 = 18;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("destination {} exists and is not a regular file", path.display())]
    DestinationNotFile { path: PathBuf },
    #[error("staged path {} has no file name", path.display())]
    InvalidSource { path: PathBuf },
    #[error("{} was already filled by another staged file in this pass", path.display())]
    NameCollision { path: PathBuf },
}

impl RelocateError {
    fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        RelocateError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How a file reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    Relocated(PathBuf),
    /// A different-size file was overwritten.
    Replaced(PathBuf),
    /// Identical-size file already there; the staged copy was discarded.
    AlreadyPresent(PathBuf),
}

impl Relocation {
    pub fn destination(&self) -> &Path {
        match self {
            Relocation::Relocated(p) | Relocation::Replaced(p) | Relocation::AlreadyPresent(p) => p,
        }
    }
}

pub struct AtomicRelocator {
    models_root: PathBuf,
    claims: Arc<PathClaims>,
}

impl AtomicRelocator {
    pub fn new(models_root: impl Into<PathBuf>, claims: Arc<PathClaims>) -> Self {
        AtomicRelocator {
            models_root: models_root.into(),
            claims,
        }
    }

    /// Where a file called `name` in `category` lands.
    pub fn target(&self, category: Category, name: &OsStr) -> PathBuf {
        self.models_root.join(category.dir_name()).join(name)
    }

    /// Move `source` into the directory for `category`, keeping its file name.
    pub fn relocate(&self, source: &Path, category: Category) -> Result<Relocation, RelocateError> {
        let name = source
            .file_name()
            .ok_or_else(|| RelocateError::InvalidSource {
                path: source.to_path_buf(),
            })?;
        self.relocate_as(source, category, name)
    }

    /// Move `source` into the directory for `category` under `name`.
    pub fn relocate_as(
        &self,
        source: &Path,
        category: Category,
        name: &OsStr,
    ) -> Result<Relocation, RelocateError> {
        let dir = self.models_root.join(category.dir_name());
        fs::create_dir_all(&dir).map_err(|e| RelocateError::io("create", &dir, e))?;
        let dest = dir.join(name);
        let _claim = self.claims.claim(&dest);

        let src_len = fs::metadata(source)
            .map_err(|e| RelocateError::io("stat", source, e))?
            .len();

        let mut replacing = false;
        match fs::metadata(&dest) {
            Ok(m) if !m.is_file() => {
                return Err(RelocateError::DestinationNotFile { path: dest });
            }
            Ok(m) if m.len() == src_len => {
                fs::remove_file(source).map_err(|e| RelocateError::io("remove", source, e))?;
                tracing::info!(dest = %dest.display(), "already present with identical size");
                return Ok(Relocation::AlreadyPresent(dest));
            }
            Ok(m) => {
                tracing::info!(
                    dest = %dest.display(),
                    old_size = m.len(),
                    new_size = src_len,
                    "replacing existing file of different size"
                );
                replacing = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RelocateError::io("stat", &dest, e)),
        }

        match fs::rename(source, &dest) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(src = %source.display(), "cross-device move, copying");
                copy_then_rename(source, &dest)?;
                if let Err(e) = fs::remove_file(source) {
                    tracing::warn!(src = %source.display(), "copied but could not remove source: {}", e);
                }
            }
            Err(e) => return Err(RelocateError::io("rename", source, e)),
        }

        tracing::info!(
            file = %name.to_string_lossy(),
            category = %category,
            "relocated"
        );
        Ok(if replacing {
            Relocation::Replaced(dest)
        } else {
            Relocation::Relocated(dest)
        })
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(EXDEV) || e.kind() == io::ErrorKind::CrossesDevices
}

/// Copy `source` beside `dest` under a hidden name, fsync, then rename over
/// `dest`. The temp is removed on failure; `source` is never touched.
pub(crate) fn copy_then_rename(source: &Path, dest: &Path) -> Result<(), RelocateError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.phoenix-tmp", name));

    let result = (|| {
        fs::copy(source, &tmp).map_err(|e| RelocateError::io("copy", &tmp, e))?;
        File::open(&tmp)
            .and_then(|f| f.sync_all())
            .map_err(|e| RelocateError::io("sync", &tmp, e))?;
        fs::rename(&tmp, dest).map_err(|e| RelocateError::io("rename", &tmp, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
