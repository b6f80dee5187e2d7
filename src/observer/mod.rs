//! Observer model.
//!
//! The event loop publishes every transition on a broadcast channel. An
//! observer task consumes them in order and renders the operator-facing
//! progress lines, so workers never print anything themselves.

pub mod narrator;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::flow::Event;
use crate::session_state::SessionState;

pub use narrator::Narrator;

/// A state transition published by the event loop.
#[derive(Debug, Clone)]
pub struct Transition {
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub event: Event,
}

impl Transition {
    pub fn new(old: SessionState, new: SessionState, event: Event) -> Self {
        Self {
            old_state: old,
            new_state: new,
            event,
        }
    }
}

pub trait Observer: Send + 'static {
    /// Handle one transition. Called sequentially, in publication order.
    fn on_transition(&mut self, t: &Transition);
}

/// Drive `observer` until the loop reaches a terminal state or the channel
/// closes.
pub fn spawn_observer(
    mut observer: impl Observer,
    mut rx: broadcast::Receiver<Transition>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(t) => {
                    observer.on_transition(&t);
                    if t.new_state.is_terminal() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "observer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
