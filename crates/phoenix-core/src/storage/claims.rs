//! Exclusive claims on filesystem paths.
//!
//! A fetch claims its staging path and a relocation claims its destination so
//! two writers never race on the same file. Claims are released by dropping
//! the guard.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct PathClaims {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then hold it. Call from blocking contexts only.
    pub fn claim(&self, path: &Path) -> ClaimGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(path) {
            tracing::debug!(path = %path.display(), "waiting for path claim");
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(path.to_path_buf());
        ClaimGuard {
            claims: self,
            path: path.to_path_buf(),
        }
    }

    /// Wait up to `timeout` for every claim under `root` to be released.
    /// Returns whether `root` ended up idle.
    pub fn wait_idle_under(&self, root: &Path, timeout: Duration) -> bool {
        let busy = |held: &mut HashSet<PathBuf>| held.iter().any(|p| p.starts_with(root));
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let (mut held, _) = self
            .released
            .wait_timeout_while(held, timeout, busy)
            .unwrap_or_else(|e| e.into_inner());
        !busy(&mut held)
    }

    fn release(&self, path: &Path) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(path);
        self.released.notify_all();
    }
}

/// Releases the claimed path when dropped.
pub struct ClaimGuard<'a> {
    claims: &'a PathClaims,
    path: PathBuf,
}

impl ClaimGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claims.release(&self.path);
    }
}
