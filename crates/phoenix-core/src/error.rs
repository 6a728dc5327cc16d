//! Boot-level error taxonomy.
//!
//! Only [`BootError::FatalProvisioning`] stops the state machine. Every other
//! kind is caught at the component that produced it, turned into a structured
//! result, and counted in the boot report.

use std::path::PathBuf;

use thiserror::Error;

use crate::relocate::RelocateError;
use crate::supervisor::SupervisorError;
use crate::transport::TransferError;

#[derive(Debug, Error)]
pub enum BootError {
    /// Storage or filesystem could not be prepared; the run cannot continue.
    #[error("storage provisioning failed at {path}: {reason}")]
    FatalProvisioning {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Network, HTTP, or checksum failure for one asset after retries.
    #[error("fetch of {asset} failed: {source}")]
    RecoverableFetch {
        asset: String,
        #[source]
        source: TransferError,
    },

    /// Move/copy failure; the file stays in staging.
    #[error("organize failed: {0}")]
    RecoverableOrganize(#[from] RelocateError),

    /// A service did not start or did not become healthy.
    #[error("service launch failed: {0}")]
    ServiceLaunch(#[from] SupervisorError),

    /// Malformed list entry or missing optional credential. Logged, never counted.
    #[error("configuration warning: {0}")]
    ConfigurationWarning(String),
}

impl BootError {
    pub fn provisioning(path: impl Into<PathBuf>, reason: impl Into<String>, source: std::io::Error) -> Self {
        BootError::FatalProvisioning {
            path: path.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// True for the one kind that halts the boot sequence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootError::FatalProvisioning { .. })
    }

    /// Warnings are logged and skipped; they do not count as errors.
    pub fn counts_as_error(&self) -> bool {
        !matches!(self, BootError::ConfigurationWarning(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provisioning_is_fatal() {
        let fatal = BootError::provisioning(
            "/workspace",
            "create models tree",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(fatal.is_fatal());
        assert!(fatal.counts_as_error());

        let warn = BootError::ConfigurationWarning("bad id".into());
        assert!(!warn.is_fatal());
        assert!(!warn.counts_as_error());

        let fetch = BootError::RecoverableFetch {
            asset: "123".into(),
            source: TransferError::Http(503),
        };
        assert!(!fetch.is_fatal());
        assert!(fetch.to_string().contains("HTTP 503"));
    }
}
