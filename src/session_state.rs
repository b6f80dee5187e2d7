//! Shared vocabulary for where one `up` invocation is in its lifecycle.

use std::fmt;

use crate::provider::Droplet;

/// Lifecycle of a disposable session. Exactly one per invocation, owned by
/// the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Create request sent, no droplet id yet.
    Provisioning,
    /// Droplet exists, polling until it reports `active`.
    WaitingActive,
    /// Dialing SSH, bootstrapping, opening the tunnel and the PTY.
    ConnectingShell,
    /// Operator is attached to the remote shell.
    Interactive,
    /// Deleting the droplet (or waiting for an in-flight create to finish
    /// so it can be deleted).
    Terminating,
    /// Nothing left to clean up.
    Destroyed,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        SessionState::Provisioning,
        SessionState::WaitingActive,
        SessionState::ConnectingShell,
        SessionState::Interactive,
        SessionState::Terminating,
        SessionState::Destroyed,
    ];

    /// Terminal states end the event loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Destroyed)
    }

    /// States where a droplet may exist and has not been handed to deletion.
    pub fn holds_droplet(self) -> bool {
        matches!(
            self,
            SessionState::Provisioning
                | SessionState::WaitingActive
                | SessionState::ConnectingShell
                | SessionState::Interactive
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Provisioning => "provisioning",
            SessionState::WaitingActive => "waiting for active",
            SessionState::ConnectingShell => "connecting shell",
            SessionState::Interactive => "interactive",
            SessionState::Terminating => "terminating",
            SessionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Last observed status of the remote droplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Provisioning,
    Active,
    Unreachable,
    Deleted,
}

impl InstanceStatus {
    pub fn from_api(status: &str) -> Self {
        match status {
            "active" => InstanceStatus::Active,
            "new" => InstanceStatus::Provisioning,
            _ => InstanceStatus::Unreachable,
        }
    }
}

/// The droplet created for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInstanceHandle {
    pub id: u64,
    pub name: String,
    pub status: InstanceStatus,
}

impl RemoteInstanceHandle {
    pub fn from_droplet(droplet: &Droplet) -> Self {
        Self {
            id: droplet.id,
            name: droplet.name.clone(),
            status: InstanceStatus::from_api(&droplet.status),
        }
    }
}
