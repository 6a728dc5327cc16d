//! Supervised service handles and their health state machine.

use std::fmt;
use tokio::process::Child;

use super::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Inference,
    FileBrowser,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Inference, ServiceKind::FileBrowser];

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Inference => "inference",
            ServiceKind::FileBrowser => "filebrowser",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `Unknown → Starting → {Healthy | Unresponsive}`; `Healthy ↔ Unresponsive`
/// through re-polls; anything → `Starting` on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Starting,
    Healthy,
    Unresponsive,
}

impl HealthStatus {
    pub fn can_transition(self, to: HealthStatus) -> bool {
        use HealthStatus::*;
        match (self, to) {
            (_, Starting) => true,
            (_, Unknown) => false,
            (Unknown, _) => false,
            (Starting | Healthy | Unresponsive, Healthy | Unresponsive) => true,
        }
    }
}

/// A launched service.
#[derive(Debug)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    pub port: u16,
    pub(super) child: Option<Child>,
    health: HealthStatus,
}

impl ServiceHandle {
    pub(super) fn new(kind: ServiceKind, port: u16) -> Self {
        ServiceHandle {
            kind,
            port,
            child: None,
            health: HealthStatus::Unknown,
        }
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, to: HealthStatus) -> Result<(), SupervisorError> {
        if !self.health.can_transition(to) {
            return Err(SupervisorError::IllegalTransition {
                service: self.kind,
                from: self.health,
                to,
            });
        }
        if self.health != to {
            tracing::debug!(service = %self.kind, from = ?self.health, to = ?to, "health transition");
        }
        self.health = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HealthStatus::*;

    #[test]
    fn legal_path() {
        let mut h = ServiceHandle::new(ServiceKind::Inference, 8188);
        assert_eq!(h.health(), Unknown);
        h.transition(Starting).unwrap();
        h.transition(Unresponsive).unwrap();
        h.transition(Healthy).unwrap();
        h.transition(Healthy).unwrap();
        h.transition(Starting).unwrap();
        h.transition(Healthy).unwrap();
    }

    #[test]
    fn illegal_transitions_rejected() {
        let mut h = ServiceHandle::new(ServiceKind::FileBrowser, 8080);
        let err = h.transition(Healthy).unwrap_err();
        assert!(matches!(err, SupervisorError::IllegalTransition { .. }));
        assert_eq!(h.health(), Unknown);
        h.transition(Starting).unwrap();
        assert!(h.transition(Unknown).is_err());
        assert!(!Unknown.can_transition(Unresponsive));
    }
}
