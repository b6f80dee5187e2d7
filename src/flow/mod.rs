//! Event-driven session lifecycle.
//!
//! A `Flow` is a set of pure transition rules mapping
//! `(SessionState, Event) -> (SessionState, Vec<Effect>)`. The event loop
//! drives it by dispatching effects to workers and feeding their completion
//! events (plus operator interrupts and shell notifications) back in.

pub mod disposable;
pub mod event_loop;

use crate::provider::Droplet;
use crate::session_state::{RemoteInstanceHandle, SessionState};
use crate::shell::ShellLink;
use crate::workers::DestroyOutcome;

pub use disposable::DisposableFlow;

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Event {
    /// Flow just started, triggers initial effects.
    FlowStarted,

    // Worker completion events
    Created(RemoteInstanceHandle),
    CreateFailed(String),
    Active(Droplet),
    PollFailed(String),
    ShellConnected(ShellLink),
    ShellFailed(String),
    Destroyed(DestroyOutcome),

    // Operator and remote side
    /// SIGINT or SIGTERM delivered to the process.
    Interrupted,
    /// The remote shell closed its channel.
    SessionClosed,
    /// Unexpected failure while attached (relay I/O, tunnel server).
    Fault(String),
}

impl Event {
    /// Error text carried by failure events.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Event::CreateFailed(msg)
            | Event::PollFailed(msg)
            | Event::ShellFailed(msg)
            | Event::Fault(msg) => Some(msg),
            _ => None,
        }
    }
}

// ── Effects ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Submit the create request for the droplet.
    CreateDroplet,
    /// Poll the droplet once per interval until it reports `active`.
    PollUntilActive,
    /// Dial SSH, run the bootstrap, open the tunnel and the interactive PTY.
    ConnectShell,
    /// Forward ETX to the remote shell instead of exiting.
    SendSoftInterrupt,
    /// Delete the droplet, retrying until the outcome is known.
    DestroyDroplet,
}

// ── Flow trait ──────────────────────────────────────────────────────

pub trait Flow: Send + Sync {
    /// Pure transition: given current state and an event, return the new
    /// state and any effects to dispatch.
    ///
    /// Events that do not apply return the current state with no effects.
    fn transition(&self, state: &SessionState, event: &Event) -> (SessionState, Vec<Effect>);
}
