//! Standalone worker functions for droplet lifecycle operations.
//!
//! Each function is a self-contained async operation with clean inputs and
//! outputs. The event loop's `make_worker()` wraps them into events. No
//! terminal output here, that's the observer's job.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DisposableError;
use crate::provider::{CreateRequest, Droplet, ResourceManager};
use crate::session_state::RemoteInstanceHandle;

/// How a delete attempt loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Deleted,
    /// The API reported 404; someone else deleted it.
    AlreadyGone,
    /// The API reported 401; the droplet still exists.
    AuthorizationRevoked,
}

impl DestroyOutcome {
    /// The droplet is known not to exist anymore.
    pub fn is_confirmed(self) -> bool {
        !matches!(self, DestroyOutcome::AuthorizationRevoked)
    }
}

/// Submit the create request.
pub async fn create_droplet(
    provider: &dyn ResourceManager,
    request: &CreateRequest,
) -> Result<RemoteInstanceHandle, DisposableError> {
    let droplet = provider.create(request).await?;
    info!(id = droplet.id, name = %droplet.name, region = %request.region, "droplet created");
    Ok(RemoteInstanceHandle::from_droplet(&droplet))
}

/// Sleep, fetch, repeat until the droplet reports `active`.
///
/// Returns `None` when cancelled. A failed status request ends the wait.
pub async fn poll_until_active(
    provider: &dyn ResourceManager,
    id: u64,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<Result<Droplet, DisposableError>> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return None,
            fetched = provider.get(id) => fetched,
        };

        match fetched {
            Ok(droplet) if droplet.is_active() => return Some(Ok(droplet)),
            Ok(droplet) => debug!(id, status = %droplet.status, "droplet not active yet"),
            Err(e) => return Some(Err(e)),
        }
    }
}

/// Delete the droplet, retrying transient failures after `delay`.
///
/// Only 404 and 401 end the loop without a successful delete.
pub async fn destroy_with_retry(
    provider: &dyn ResourceManager,
    id: u64,
    delay: Duration,
) -> DestroyOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.delete(id).await {
            Ok(()) => {
                info!(id, attempt, "droplet deleted");
                return DestroyOutcome::Deleted;
            }
            Err(e) if e.is_not_found() => {
                info!(id, "droplet already gone");
                return DestroyOutcome::AlreadyGone;
            }
            Err(e) if e.is_unauthorized() => {
                warn!(id, "token revoked, droplet must be deleted manually");
                return DestroyOutcome::AuthorizationRevoked;
            }
            Err(e) => {
                warn!(id, attempt, error = %e, "delete failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
