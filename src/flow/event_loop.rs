//! Event loop that drives a session flow.
//!
//! Receives events from workers (async blocks in FuturesUnordered) and from
//! outside the loop (signals, the shell relay) via an mpsc channel, feeds them
//! into the flow's transition function, and dispatches the resulting effects
//! as new workers.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::network;
use crate::observer::Transition;
use crate::provider::{CreateRequest, ResourceManager};
use crate::session_state::{InstanceStatus, RemoteInstanceHandle, SessionState};
use crate::shell::{ShellConnector, ShellLink};
use crate::workers::{self, DestroyOutcome};

use super::{Effect, Event, Flow};

type Worker = Pin<Box<dyn Future<Output = Option<Event>> + Send>>;

/// The created droplet, shared with whoever must clean up after the loop.
pub type InstanceSlot = Arc<Mutex<Option<RemoteInstanceHandle>>>;

// ── FlowContext ────────────────────────────────────────────────────

/// Pauses between repeated remote calls.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Between status polls while waiting for `active`.
    pub poll: Duration,
    /// Between failed delete attempts.
    pub delete_retry: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            delete_retry: Duration::from_secs(1),
        }
    }
}

/// Shared context for the event loop and its workers.
pub struct FlowContext {
    pub provider: Arc<dyn ResourceManager>,
    pub shell: Arc<dyn ShellConnector>,
    pub request: CreateRequest,
    pub prefer_ipv6: bool,
    pub timings: Timings,

    /// Handed to workers that report back after their own completion
    /// (the shell relay).
    pub events_tx: mpsc::UnboundedSender<Event>,

    /// Broadcasts transitions to observers.
    pub transition_tx: broadcast::Sender<Transition>,

    /// Cancelled when the session starts winding down, stopping polls,
    /// dials, and the relay.
    pub cancel: CancellationToken,

    /// Written as soon as the droplet exists, so it can still be deleted
    /// if the loop itself dies.
    pub instance: InstanceSlot,
}

impl FlowContext {
    fn remember(&self, handle: &RemoteInstanceHandle) {
        *self.instance.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
    }

    /// The droplet created by this session, if any.
    pub fn recorded_instance(&self) -> Option<RemoteInstanceHandle> {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── SessionReport ──────────────────────────────────────────────────

/// What the loop learned along the way.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub final_state: SessionState,
    pub instance: Option<RemoteInstanceHandle>,
    pub address: Option<IpAddr>,
    pub destroy: Option<DestroyOutcome>,
    /// First failure observed, if any.
    pub failure: Option<String>,
    pub interrupts: usize,
}

impl SessionReport {
    fn new() -> Self {
        Self {
            final_state: SessionState::Provisioning,
            instance: None,
            address: None,
            destroy: None,
            failure: None,
            interrupts: 0,
        }
    }

    /// Report for a loop that never returned one.
    pub fn aborted(instance: Option<RemoteInstanceHandle>, failure: String) -> Self {
        Self {
            final_state: SessionState::Terminating,
            instance,
            failure: Some(failure),
            ..Self::new()
        }
    }

    fn record(&mut self, event: &Event, prefer_ipv6: bool) {
        if let Some(msg) = event.failure()
            && self.failure.is_none()
        {
            self.failure = Some(msg.to_string());
        }

        match event {
            Event::Created(handle) => self.instance = Some(handle.clone()),
            Event::Active(droplet) => {
                self.address = network::pick_address(droplet, prefer_ipv6);
                self.set_status(InstanceStatus::Active);
            }
            Event::PollFailed(_) => self.set_status(InstanceStatus::Unreachable),
            Event::Destroyed(outcome) => {
                self.destroy = Some(*outcome);
                if outcome.is_confirmed() {
                    self.set_status(InstanceStatus::Deleted);
                }
            }
            Event::Interrupted => self.interrupts += 1,
            _ => {}
        }
    }

    fn set_status(&mut self, status: InstanceStatus) {
        if let Some(instance) = &mut self.instance {
            instance.status = status;
        }
    }
}

// ── Event loop ─────────────────────────────────────────────────────

/// Run `flow` from `Provisioning` until it reaches a terminal state.
pub async fn run_event_loop(
    flow: &dyn Flow,
    ctx: &FlowContext,
    events_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> SessionReport {
    let mut state = SessionState::Provisioning;
    let mut report = SessionReport::new();
    let mut shell: Option<ShellLink> = None;
    let mut workers: FuturesUnordered<Worker> = FuturesUnordered::new();
    let mut pending = Some(Event::FlowStarted);

    loop {
        let event = match pending.take() {
            Some(event) => event,
            None => tokio::select! {
                Some(event) = events_rx.recv() => event,
                Some(done) = workers.next() => match done {
                    Some(event) => event,
                    // Worker was cancelled.
                    None => continue,
                },
                else => break,
            },
        };

        report.record(&event, ctx.prefer_ipv6);
        if let Event::Created(handle) = &event {
            ctx.remember(handle);
        }
        if let (SessionState::ConnectingShell, Event::ShellConnected(link)) = (&state, &event) {
            shell = Some(link.clone());
        }

        let (new_state, effects) = flow.transition(&state, &event);
        publish_transition(&ctx.transition_tx, &state, &new_state, &event);

        if state.holds_droplet() && !new_state.holds_droplet() {
            tracing::info!(from = %state, to = %new_state, "session winding down");
            ctx.cancel.cancel();
            shell = None;
        }
        state = new_state;
        report.final_state = state;

        for effect in effects {
            match effect {
                Effect::SendSoftInterrupt => {
                    let sent = match &shell {
                        Some(link) => link.send_interrupt(),
                        None => Ok(()),
                    };
                    if let Err(e) = sent {
                        pending = Some(Event::Fault(e.to_string()));
                    }
                }
                other => workers.push(make_worker(other, ctx, &report)),
            }
        }

        if state.is_terminal() {
            break;
        }
    }

    ctx.cancel.cancel();
    report
}

// ── Worker dispatch ────────────────────────────────────────────────

/// Map an Effect to an async worker that produces an Event on completion,
/// or nothing if it was cancelled.
fn make_worker(effect: Effect, ctx: &FlowContext, report: &SessionReport) -> Worker {
    let provider = ctx.provider.clone();
    let instance_id = report.instance.as_ref().map(|i| i.id);

    match effect {
        Effect::CreateDroplet => {
            let request = ctx.request.clone();
            Box::pin(async move {
                Some(match workers::create_droplet(provider.as_ref(), &request).await {
                    Ok(handle) => Event::Created(handle),
                    Err(e) => Event::CreateFailed(e.to_string()),
                })
            })
        }
        Effect::PollUntilActive => {
            let Some(id) = instance_id else {
                return ready(Event::PollFailed("no droplet to poll".into()));
            };
            let interval = ctx.timings.poll;
            let cancel = ctx.cancel.clone();
            Box::pin(async move {
                workers::poll_until_active(provider.as_ref(), id, interval, &cancel)
                    .await
                    .map(|result| match result {
                        Ok(droplet) => Event::Active(droplet),
                        Err(e) => Event::PollFailed(e.to_string()),
                    })
            })
        }
        Effect::ConnectShell => {
            let Some(address) = report.address else {
                return ready(Event::ShellFailed("droplet has no public address".into()));
            };
            let connector = ctx.shell.clone();
            let cancel = ctx.cancel.clone();
            let events = ctx.events_tx.clone();
            Box::pin(async move {
                match connector.connect(address, cancel, events).await {
                    Ok(Some(link)) => Some(Event::ShellConnected(link)),
                    Ok(None) => None,
                    Err(e) => Some(Event::ShellFailed(e.to_string())),
                }
            })
        }
        Effect::DestroyDroplet => {
            let Some(id) = instance_id else {
                tracing::warn!("destroy requested before a droplet id was known");
                return ready(Event::Destroyed(DestroyOutcome::AlreadyGone));
            };
            let delay = ctx.timings.delete_retry;
            Box::pin(async move {
                let outcome = workers::destroy_with_retry(provider.as_ref(), id, delay).await;
                Some(Event::Destroyed(outcome))
            })
        }
        // Handled inline by the loop.
        Effect::SendSoftInterrupt => Box::pin(async { None }),
    }
}

fn ready(event: Event) -> Worker {
    Box::pin(async move { Some(event) })
}

// ── Helpers ────────────────────────────────────────────────────────

/// Publish a state transition to all observers.
fn publish_transition(
    tx: &broadcast::Sender<Transition>,
    old: &SessionState,
    new: &SessionState,
    event: &Event,
) {
    let t = Transition::new(*old, *new, event.clone());
    // No subscribers is fine.
    let _ = tx.send(t);
}

// ── Tests ──────────────────────────────────────────────────────────
