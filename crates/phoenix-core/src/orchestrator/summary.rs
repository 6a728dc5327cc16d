//! What a boot did, and how healthy the result is.

use std::fmt;

use crate::asset::DownloadSummary;
use crate::network::NetworkReport;
use crate::organize::OrganizeSummary;
use crate::plugins::PluginReport;
use crate::supervisor::LaunchReport;

use super::state::BootState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthClass {
    Healthy,
    /// Errors occurred or some assets are missing; the container still serves.
    Degraded,
    /// Assets were requested and the models tree holds none.
    Critical,
}

impl fmt::Display for HealthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthClass::Healthy => "healthy",
            HealthClass::Degraded => "degraded",
            HealthClass::Critical => "critical",
        })
    }
}

pub fn classify_health(errors: usize, assets_requested: bool, model_files: usize) -> HealthClass {
    if assets_requested && model_files == 0 {
        HealthClass::Critical
    } else if errors > 0 {
        HealthClass::Degraded
    } else {
        HealthClass::Healthy
    }
}

#[derive(Debug, Default)]
pub struct BootReport {
    pub transitions: Vec<(BootState, BootState)>,
    pub errors: usize,
    pub network: Option<NetworkReport>,
    pub downloads: Option<DownloadSummary>,
    pub organize: Option<OrganizeSummary>,
    pub plugins: Option<PluginReport>,
    pub launch: Option<LaunchReport>,
    pub assets_requested: bool,
    /// Recognized model files in the target tree after organizing.
    pub model_files: usize,
    /// True when the shutdown signal cut the sequence short.
    pub interrupted: bool,
    pub cleanup_ran: bool,
}

impl BootReport {
    pub fn add_errors(&mut self, n: usize) {
        self.errors += n;
    }

    pub fn visited(&self, state: BootState) -> bool {
        self.transitions.iter().any(|(_, to)| *to == state)
    }

    pub fn final_state(&self) -> BootState {
        self.transitions
            .last()
            .map(|(_, to)| *to)
            .unwrap_or(BootState::Init)
    }

    pub fn health(&self) -> HealthClass {
        classify_health(self.errors, self.assets_requested, self.model_files)
    }

    pub fn log_summary(&self) {
        let health = self.health();
        if let Some(d) = &self.downloads {
            tracing::info!(
                total = d.total,
                succeeded = d.succeeded,
                skipped = d.skipped,
                failed = d.failed,
                rejected = d.rejected,
                "downloads"
            );
        }
        if let Some(o) = &self.organize {
            tracing::info!(
                moved = o.successful,
                already_present = o.already_present,
                failed = o.failed,
                "organize"
            );
        }
        match health {
            HealthClass::Critical => tracing::error!(
                errors = self.errors,
                models = self.model_files,
                "boot {}: assets were requested but no model files are in place",
                health
            ),
            _ => tracing::info!(errors = self.errors, models = self.model_files, "boot {}", health),
        }
    }
}
