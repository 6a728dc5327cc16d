use std::fmt;

/// Where the boot sequence is. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootState {
    Init,
    SystemSetup,
    NetworkCheck,
    Download,
    Organize,
    ServiceLaunch,
    Monitoring,
    ShuttingDown,
    Terminated,
}

impl BootState {
    /// The happy-path successor, or None once terminated.
    pub fn next(self) -> Option<BootState> {
        use BootState::*;
        Some(match self {
            Init => SystemSetup,
            SystemSetup => NetworkCheck,
            NetworkCheck => Download,
            Download => Organize,
            Organize => ServiceLaunch,
            ServiceLaunch => Monitoring,
            Monitoring => ShuttingDown,
            ShuttingDown => Terminated,
            Terminated => return None,
        })
    }

    /// A move is legal when it goes forward. Any state before ShuttingDown may
    /// jump straight to it (signal or fatal setup).
    pub fn can_move_to(self, to: BootState) -> bool {
        to > self && (Some(to) == self.next() || to == BootState::ShuttingDown)
    }

    pub fn name(self) -> &'static str {
        match self {
            BootState::Init => "init",
            BootState::SystemSetup => "system-setup",
            BootState::NetworkCheck => "network-check",
            BootState::Download => "download",
            BootState::Organize => "organize",
            BootState::ServiceLaunch => "service-launch",
            BootState::Monitoring => "monitoring",
            BootState::ShuttingDown => "shutting-down",
            BootState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
