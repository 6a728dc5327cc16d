//! Boot sequencing: setup, network check, downloads, organizing, service
//! launch, monitoring, and an orderly shutdown that always runs cleanup.

mod run;
mod state;
mod step;
mod summary;

pub use run::StartupOrchestrator;
pub use state::BootState;
pub use step::{run_step, StepOutcome};
pub use summary::{classify_health, BootReport, HealthClass};
