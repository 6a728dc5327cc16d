//! Scans of the target tree: name index for presence checks, model-file counts
//! for reconciliation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::classify::is_model_file;

/// Snapshot of every file name under the models tree.
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    names: HashSet<String>,
}

impl TargetIndex {
    /// Walk `models_root`. Unreadable entries are skipped; a missing root yields an empty index.
    pub fn scan(models_root: &Path) -> Self {
        let names = WalkDir::new(models_root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        TargetIndex { names }
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.names.contains(file_name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Every recognized-extension file under `root`, sorted for deterministic processing.
pub fn model_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_model_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Number of recognized-extension files under `root`.
pub fn count_model_files(root: &Path) -> usize {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_model_file(e.path()))
        .count()
}
