//! Pointing the inference application's data directories at the storage root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::SupervisorError;
use crate::storage::StorageLayout;

fn link_err(path: &Path, source: io::Error) -> SupervisorError {
    SupervisorError::Link {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks need unix"))
}

/// Replace `<app_dir>/{models,input,output}` with symlinks into the layout.
/// Idempotent. Entries of an existing real directory are moved into the
/// storage side first; anything that cannot move without overwriting is kept
/// by renaming the old directory to `<name>.orig`.
pub fn link_storage(app_dir: &Path, layout: &StorageLayout) -> Result<Vec<PathBuf>, SupervisorError> {
    fs::create_dir_all(app_dir).map_err(|e| link_err(app_dir, e))?;
    let mut linked = Vec::new();
    for (name, target) in [
        ("models", &layout.models),
        ("input", &layout.input),
        ("output", &layout.output),
    ] {
        let link = app_dir.join(name);
        if link == *target {
            continue;
        }
        fs::create_dir_all(target).map_err(|e| link_err(target, e))?;
        if prepare_link_path(&link, target)? {
            symlink(target, &link).map_err(|e| link_err(&link, e))?;
            tracing::info!("linked {} -> {}", link.display(), target.display());
        }
        linked.push(link);
    }
    Ok(linked)
}

/// Clear `link` so a symlink can be created. Returns false when the right
/// symlink is already there.
fn prepare_link_path(link: &Path, target: &Path) -> Result<bool, SupervisorError> {
    let meta = match fs::symlink_metadata(link) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(link_err(link, e)),
    };
    if meta.file_type().is_symlink() {
        if fs::read_link(link).map(|p| p == target).unwrap_or(false) {
            return Ok(false);
        }
        fs::remove_file(link).map_err(|e| link_err(link, e))?;
        return Ok(true);
    }
    if meta.is_dir() {
        let leftovers = migrate_entries(link, target)?;
        if leftovers == 0 {
            fs::remove_dir(link).map_err(|e| link_err(link, e))?;
        } else {
            tracing::warn!(
                "{} entries of {} already exist in {}; keeping the old directory",
                leftovers,
                link.display(),
                target.display()
            );
            set_aside(link)?;
        }
        return Ok(true);
    }
    set_aside(link)?;
    Ok(true)
}

fn set_aside(path: &Path) -> Result<(), SupervisorError> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".orig");
    let aside = PathBuf::from(aside);
    fs::rename(path, &aside).map_err(|e| link_err(path, e))?;
    tracing::info!("moved {} aside to {}", path.display(), aside.display());
    Ok(())
}

/// Move every entry of `from` into `to` without overwriting. Returns how many stayed behind.
fn migrate_entries(from: &Path, to: &Path) -> Result<usize, SupervisorError> {
    let mut leftovers = 0;
    for entry in fs::read_dir(from).map_err(|e| link_err(from, e))? {
        let entry = entry.map_err(|e| link_err(from, e))?;
        let dest = to.join(entry.file_name());
        if fs::symlink_metadata(&dest).is_ok() {
            leftovers += 1;
            continue;
        }
        match fs::rename(entry.path(), &dest) {
            Ok(()) => tracing::debug!("migrated {} into {}", entry.path().display(), to.display()),
            Err(e) => {
                tracing::warn!("could not migrate {}: {}", entry.path().display(), e);
                leftovers += 1;
            }
        }
    }
    Ok(leftovers)
}
