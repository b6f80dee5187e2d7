//! Terse progress narration on stderr.

use std::io::Write;

use crate::flow::Event;
use crate::session_state::SessionState;
use crate::workers::DestroyOutcome;

use super::{Observer, Transition};

const DESTROY_WARNING: &str = "Destroying the droplet. Closing the process before this is done \
means you'll have to delete it manually!";

/// Writes narration to stderr, which is also where the remote shell's stderr
/// goes, so lines stay in order with it.
#[derive(Default)]
pub struct Narrator;

impl Observer for Narrator {
    fn on_transition(&mut self, t: &Transition) {
        if let Some(text) = narrate(t) {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        }
    }
}

/// Text for one transition. Step lines end without a newline so the
/// following `done!` lands on the same line.
pub fn narrate(t: &Transition) -> Option<String> {
    use SessionState::*;

    match (&t.old_state, &t.new_state, &t.event) {
        (Provisioning, Provisioning, Event::FlowStarted) => Some("Creating droplet... ".into()),
        (_, WaitingActive, Event::Created(handle)) => Some(format!(
            "done! (id {})\nWaiting for droplet to be active... ",
            handle.id
        )),
        (_, ConnectingShell, Event::Active(_)) => {
            Some("done!\nConnecting to the droplet... ".into())
        }
        (_, Interactive, Event::ShellConnected(_)) => Some("done!\n".into()),

        (Provisioning, Destroyed, Event::CreateFailed(_)) => Some("failed!\n".into()),
        (Provisioning, Terminating, event) => Some(format!(
            "\n{}\nWaiting for droplet creation to finish so it can be destroyed.\n",
            reason(event)
        )),
        (old, Terminating, event) if *old != Terminating => {
            Some(format!("\n{}\n{DESTROY_WARNING}\n", reason(event)))
        }
        // Interrupted before the id came back, and creation then failed.
        (Terminating, Destroyed, Event::CreateFailed(_)) => {
            Some("Droplet creation failed, nothing to destroy.\n".into())
        }
        (Terminating, Terminating, Event::Created(_)) => Some(format!("{DESTROY_WARNING}\n")),
        (_, Destroyed, Event::Destroyed(outcome)) => Some(
            match outcome {
                DestroyOutcome::Deleted => "Droplet destroyed.\n",
                DestroyOutcome::AlreadyGone => "Droplet was already gone.\n",
                DestroyOutcome::AuthorizationRevoked => {
                    "The authorization token was revoked. \
                     You will need to manually destroy this droplet!\n"
                }
            }
            .into(),
        ),
        _ => None,
    }
}

fn reason(event: &Event) -> String {
    match event {
        Event::Interrupted => "Interrupted.".into(),
        Event::SessionClosed => "Session closed.".into(),
        other => match other.failure() {
            Some(msg) => format!("Error: {msg}"),
            None => "Stopping.".into(),
        },
    }
}
