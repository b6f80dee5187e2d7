//! The `up` flow: create, wait, attach, and always destroy.

use crate::session_state::SessionState;

use super::{Effect, Event, Flow};

pub struct DisposableFlow;

impl Flow for DisposableFlow {
    fn transition(&self, state: &SessionState, event: &Event) -> (SessionState, Vec<Effect>) {
        use SessionState::*;

        match (state, event) {
            // ── Provisioning ──
            (Provisioning, Event::FlowStarted) => (Provisioning, vec![Effect::CreateDroplet]),
            (Provisioning, Event::Created(_)) => (WaitingActive, vec![Effect::PollUntilActive]),
            // Nothing was created, nothing to delete.
            (Provisioning, Event::CreateFailed(_)) => (Destroyed, vec![]),
            // The create call is in flight and may still produce a droplet.
            // Wait for its outcome before deleting.
            (Provisioning, Event::Interrupted | Event::Fault(_)) => (Terminating, vec![]),

            // ── Waiting and connecting ──
            (WaitingActive, Event::Active(_)) => (ConnectingShell, vec![Effect::ConnectShell]),
            (ConnectingShell, Event::ShellConnected(_)) => (Interactive, vec![]),
            (
                WaitingActive | ConnectingShell,
                Event::PollFailed(_)
                | Event::ShellFailed(_)
                | Event::Fault(_)
                | Event::Interrupted
                | Event::SessionClosed,
            ) => (Terminating, vec![Effect::DestroyDroplet]),

            // ── Interactive ──
            (Interactive, Event::Interrupted) => (Interactive, vec![Effect::SendSoftInterrupt]),
            (Interactive, Event::SessionClosed | Event::Fault(_) | Event::ShellFailed(_)) => {
                (Terminating, vec![Effect::DestroyDroplet])
            }

            // ── Terminating ──
            (Terminating, Event::Created(_)) => (Terminating, vec![Effect::DestroyDroplet]),
            (Terminating, Event::CreateFailed(_)) => (Destroyed, vec![]),
            (Terminating, Event::Destroyed(_)) => (Destroyed, vec![]),

            // Late worker results and repeated interrupts while winding down.
            _ => {
                tracing::debug!(%state, ?event, "event ignored");
                (*state, vec![])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Droplet;
    use crate::session_state::{InstanceStatus, RemoteInstanceHandle};
    use crate::shell::ShellLink;
    use crate::workers::DestroyOutcome;

    fn created() -> Event {
        Event::Created(RemoteInstanceHandle {
            id: 7,
            name: "d".into(),
            status: InstanceStatus::Provisioning,
        })
    }

    fn active() -> Event {
        Event::Active(Droplet {
            id: 7,
            status: "active".into(),
            ..Droplet::default()
        })
    }

    fn connected() -> Event {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Event::ShellConnected(ShellLink::detached(tx))
    }

    fn run(events: &[Event]) -> (SessionState, Vec<Effect>) {
        let flow = DisposableFlow;
        let mut state = SessionState::Provisioning;
        let mut all = Vec::new();
        for event in events {
            let (next, effects) = flow.transition(&state, event);
            state = next;
            all.extend(effects);
        }
        (state, all)
    }

    // ── Happy path ──

    #[test]
    fn happy_path() {
        let flow = DisposableFlow;

        let (state, effects) = flow.transition(&SessionState::Provisioning, &Event::FlowStarted);
        assert_eq!(state, SessionState::Provisioning);
        assert_eq!(effects, vec![Effect::CreateDroplet]);

        let (state, effects) = flow.transition(&state, &created());
        assert_eq!(state, SessionState::WaitingActive);
        assert_eq!(effects, vec![Effect::PollUntilActive]);

        let (state, effects) = flow.transition(&state, &active());
        assert_eq!(state, SessionState::ConnectingShell);
        assert_eq!(effects, vec![Effect::ConnectShell]);

        let (state, effects) = flow.transition(&state, &connected());
        assert_eq!(state, SessionState::Interactive);
        assert!(effects.is_empty());

        let (state, effects) = flow.transition(&state, &Event::SessionClosed);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects, vec![Effect::DestroyDroplet]);

        let (state, effects) =
            flow.transition(&state, &Event::Destroyed(DestroyOutcome::Deleted));
        assert_eq!(state, SessionState::Destroyed);
        assert!(effects.is_empty());
    }

    // ── Interrupts ──

    #[test]
    fn interrupt_while_interactive_is_forwarded() {
        let flow = DisposableFlow;
        let (state, effects) = flow.transition(&SessionState::Interactive, &Event::Interrupted);
        assert_eq!(state, SessionState::Interactive);
        assert_eq!(effects, vec![Effect::SendSoftInterrupt]);
    }

    #[test]
    fn interrupt_during_create_destroys_once_created() {
        let (state, effects) = run(&[Event::FlowStarted, Event::Interrupted]);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects, vec![Effect::CreateDroplet]);

        let (state, effects) = run(&[Event::FlowStarted, Event::Interrupted, created()]);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects, vec![Effect::CreateDroplet, Effect::DestroyDroplet]);
    }

    #[test]
    fn interrupt_during_create_that_fails() {
        let (state, effects) = run(&[
            Event::FlowStarted,
            Event::Interrupted,
            Event::CreateFailed("quota".into()),
        ]);
        assert_eq!(state, SessionState::Destroyed);
        assert_eq!(effects, vec![Effect::CreateDroplet]);
    }

    #[test]
    fn interrupt_while_waiting_destroys() {
        let (state, effects) = run(&[Event::FlowStarted, created(), Event::Interrupted]);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(
            effects,
            vec![
                Effect::CreateDroplet,
                Effect::PollUntilActive,
                Effect::DestroyDroplet
            ]
        );
    }

    #[test]
    fn interrupts_while_terminating_are_ignored() {
        let flow = DisposableFlow;
        let (state, effects) = flow.transition(&SessionState::Terminating, &Event::Interrupted);
        assert_eq!(state, SessionState::Terminating);
        assert!(effects.is_empty());
    }

    // ── Failures ──

    #[test]
    fn create_failure_is_terminal_without_delete() {
        let (state, effects) = run(&[Event::FlowStarted, Event::CreateFailed("422".into())]);
        assert_eq!(state, SessionState::Destroyed);
        assert_eq!(effects, vec![Effect::CreateDroplet]);
    }

    #[test]
    fn poll_failure_destroys() {
        let (state, effects) = run(&[
            Event::FlowStarted,
            created(),
            Event::PollFailed("500".into()),
        ]);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects.last(), Some(&Effect::DestroyDroplet));
    }

    #[test]
    fn shell_failure_destroys() {
        let (state, effects) = run(&[
            Event::FlowStarted,
            created(),
            active(),
            Event::ShellFailed("bootstrap exited with status 1".into()),
        ]);
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects.last(), Some(&Effect::DestroyDroplet));
    }

    #[test]
    fn relay_fault_destroys() {
        let flow = DisposableFlow;
        let (state, effects) =
            flow.transition(&SessionState::Interactive, &Event::Fault("stdout closed".into()));
        assert_eq!(state, SessionState::Terminating);
        assert_eq!(effects, vec![Effect::DestroyDroplet]);
    }

    // ── Cleanup ──

    #[test]
    fn every_destroy_outcome_is_terminal() {
        let flow = DisposableFlow;
        for outcome in [
            DestroyOutcome::Deleted,
            DestroyOutcome::AlreadyGone,
            DestroyOutcome::AuthorizationRevoked,
        ] {
            let (state, _) =
                flow.transition(&SessionState::Terminating, &Event::Destroyed(outcome));
            assert_eq!(state, SessionState::Destroyed);
        }
    }

    #[test]
    fn late_results_are_ignored_while_terminating() {
        let flow = DisposableFlow;
        for event in [active(), connected(), Event::SessionClosed, Event::PollFailed("x".into())] {
            let (state, effects) = flow.transition(&SessionState::Terminating, &event);
            assert_eq!(state, SessionState::Terminating);
            assert!(effects.is_empty(), "{event:?} produced {effects:?}");
        }
    }

    /// Once a droplet exists, any way out of the session schedules exactly
    /// one delete.
    #[test]
    fn every_exit_after_creation_deletes_once() {
        let prefixes: Vec<Vec<Event>> = vec![
            vec![Event::FlowStarted, created()],
            vec![Event::FlowStarted, created(), active()],
            vec![Event::FlowStarted, created(), active(), connected()],
        ];
        let exits = [
            Event::Interrupted,
            Event::Fault("boom".into()),
            Event::SessionClosed,
            Event::ShellFailed("gone".into()),
        ];

        for prefix in &prefixes {
            for exit in &exits {
                let mut events = prefix.clone();
                events.push(exit.clone());
                // Interactive forwards the first interrupt; the session then
                // ends when the remote shell closes.
                events.push(Event::SessionClosed);
                events.push(Event::Interrupted);

                let (state, effects) = run(&events);
                let deletes = effects
                    .iter()
                    .filter(|e| **e == Effect::DestroyDroplet)
                    .count();
                assert_eq!(state, SessionState::Terminating, "{events:?}");
                assert_eq!(deletes, 1, "{events:?}");
            }
        }
    }

    #[test]
    fn failure_text() {
        assert_eq!(Event::PollFailed("x".into()).failure(), Some("x"));
        assert_eq!(Event::SessionClosed.failure(), None);
    }
}
