//! The boot-wide context: configuration plus the resolved storage layout.
//!
//! Built once at the end of SystemSetup and shared as `Arc<BootContext>`.
//! Nothing downstream recomputes paths or re-reads the environment.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{BootConfig, Tuning};
use crate::ledger::LEDGER_FILE;
use crate::storage::{PathClaims, StorageLayout};

pub struct BootContext {
    pub config: BootConfig,
    pub layout: StorageLayout,
    /// Path claims shared by fetchers (staging) and the organizer (destinations).
    pub claims: Arc<PathClaims>,
}

impl BootContext {
    pub fn new(config: BootConfig, layout: StorageLayout) -> Self {
        BootContext {
            config,
            layout,
            claims: Arc::new(PathClaims::new()),
        }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.config.tuning
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.layout.state.join(LEDGER_FILE)
    }

    /// Inference application directory.
    pub fn app_dir(&self) -> PathBuf {
        self.config.tuning.paths.app_dir.clone()
    }
}

impl std::fmt::Debug for BootContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootContext")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
