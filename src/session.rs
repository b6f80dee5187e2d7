//! `up`: one disposable droplet, one interactive session, always destroyed.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::error::DisposableError;
use crate::flow::event_loop::{FlowContext, SessionReport, Timings, run_event_loop};
use crate::flow::{DisposableFlow, Event};
use crate::network;
use crate::observer::{Narrator, spawn_observer};
use crate::progress;
use crate::provider::{CreateRequest, ResourceManager, latest_debian};
use crate::shell::{ShellConnector, ShellSettings, SshConnector};
use crate::tools;
use crate::workers::{self, DestroyOutcome};

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub prefer_ipv6: bool,
    pub timings: Timings,
}

/// Where and what to launch; `None` falls back to the configured default.
#[derive(Debug, Clone, Default)]
pub struct UpArgs {
    pub distro: Option<String>,
    pub region: Option<String>,
    pub size: Option<String>,
}

/// Entry point for `disposable up`.
pub async fn run_up(ctx: &AppContext, args: UpArgs) -> Result<(), DisposableError> {
    let config = &ctx.system.config;
    let region = args.region.unwrap_or_else(|| config.region.clone());
    let size = args.size.unwrap_or_else(|| config.size.clone());
    let image = match args.distro {
        Some(slug) => slug,
        None => {
            progress::spin("Finding the latest Debian image", resolve_debian(ctx)).await?
        }
    };
    tracing::info!(%region, %size, %image, "starting disposable session");

    let session = &config.session;
    let settings = ShellSettings {
        user: session.user.clone(),
        private_key: ctx.system.private_key()?,
        bootstrap: session.bootstrap_command(),
        tunnel_port: session.tunnel_port,
        transfer_root: std::env::current_dir()
            .map_err(|e| DisposableError::io("failed to resolve working directory", e))?,
        dial_retry: std::time::Duration::from_secs(1),
        tools: session
            .tools_dir
            .as_deref()
            .map(PathBuf::from)
            .or_else(tools::default_tools_dir)
            .map(|dir| tools::load_transfer_tools(&dir))
            .unwrap_or_default(),
    };

    let prefer_ipv6 = session.probe_ipv6 && network::prefers_ipv6().await;
    let request = CreateRequest::disposable(&region, &size, &image, config.key_id);

    run_disposable_session(
        ctx.api.clone(),
        Arc::new(SshConnector::new(settings)),
        request,
        SessionOptions {
            prefer_ipv6,
            timings: Timings::default(),
        },
    )
    .await?;
    Ok(())
}

async fn resolve_debian(ctx: &AppContext) -> Result<String, DisposableError> {
    let images = ctx.api.list_distribution_images().await.map_err(|e| {
        if e.is_unauthorized() {
            DisposableError::Unauthorized
        } else {
            e
        }
    })?;
    latest_debian(&images)
        .and_then(|image| image.slug.clone())
        .ok_or(DisposableError::NoDebianImage)
}

/// Create the droplet, attach to it, and destroy it on every exit path.
///
/// Returns once destruction has been confirmed, or with
/// `ManualDeletionRequired` when it never can be.
pub async fn run_disposable_session(
    provider: Arc<dyn ResourceManager>,
    shell: Arc<dyn ShellConnector>,
    request: CreateRequest,
    options: SessionOptions,
) -> Result<SessionReport, DisposableError> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (transition_tx, transition_rx) = broadcast::channel(64);
    let narrator = spawn_observer(Narrator, transition_rx);
    let signals = watch_signals(events_tx.clone())?;

    let ctx = Arc::new(FlowContext {
        provider,
        shell,
        request,
        prefer_ipv6: options.prefer_ipv6,
        timings: options.timings,
        events_tx,
        transition_tx,
        cancel: CancellationToken::new(),
        instance: Default::default(),
    });

    let loop_ctx = ctx.clone();
    let run = tokio::spawn(async move {
        run_event_loop(&DisposableFlow, &loop_ctx, &mut events_rx).await
    });
    let mut report = match run.await {
        Ok(report) => report,
        Err(e) => {
            ctx.cancel.cancel();
            tracing::error!(error = %e, "session loop crashed");
            SessionReport::aborted(ctx.recorded_instance(), format!("session loop crashed: {e}"))
        }
    };
    signals.abort();
    release(&ctx, &mut report).await;

    drop(ctx);
    let _ = narrator.await;

    conclude(report)
}

/// Turn SIGINT and SIGTERM into `Interrupted` events for as long as the
/// session runs.
fn watch_signals(events: mpsc::UnboundedSender<Event>) -> Result<JoinHandle<()>, DisposableError> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| DisposableError::io("failed to install SIGTERM handler", e))?;
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| DisposableError::io("failed to install SIGINT handler", e))?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                else => break,
            };
            tracing::info!(signal = name, "interrupt received");
            if events.send(Event::Interrupted).is_err() {
                break;
            }
        }
    }))
}

/// Last line of defence: a droplet the loop recorded but never saw deleted
/// is deleted here before control returns.
async fn release(ctx: &FlowContext, report: &mut SessionReport) {
    let Some(instance) = &report.instance else {
        return;
    };
    if report.destroy.is_some() {
        return;
    }
    tracing::warn!(id = instance.id, state = %report.final_state, "loop ended without deleting droplet");
    let outcome =
        workers::destroy_with_retry(ctx.provider.as_ref(), instance.id, ctx.timings.delete_retry)
            .await;
    report.destroy = Some(outcome);
}

fn conclude(report: SessionReport) -> Result<SessionReport, DisposableError> {
    if let (Some(DestroyOutcome::AuthorizationRevoked), Some(instance)) =
        (report.destroy, &report.instance)
    {
        return Err(DisposableError::ManualDeletionRequired { id: instance.id });
    }

    match (&report.failure, &report.instance) {
        (Some(message), None) => Err(DisposableError::CreateFailed {
            message: message.clone(),
        }),
        (Some(message), Some(_)) => Err(DisposableError::SessionFailed {
            message: message.clone(),
        }),
        (None, _) => Ok(report),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session_state::SessionState;
    use crate::testing::{FAKE_ID, FAKE_V6, FakeProvider, FakeShell};

    const TICK: Duration = Duration::from_millis(5);

    fn options(prefer_ipv6: bool) -> SessionOptions {
        SessionOptions {
            prefer_ipv6,
            timings: Timings {
                poll: TICK,
                delete_retry: TICK,
            },
        }
    }

    fn request() -> CreateRequest {
        CreateRequest::disposable("ams3", "s-2vcpu-2gb", "debian-12-x64", 77)
    }

    #[tokio::test]
    async fn normal_exit_destroys_droplet() {
        let provider = Arc::new(FakeProvider::new().with_statuses(&["new", "active"]));
        let (shell, _input) = FakeShell::new();
        let shell = Arc::new(shell.closing_after(TICK));

        let report =
            run_disposable_session(provider.clone(), shell.clone(), request(), options(true))
                .await
                .unwrap();

        assert_eq!(report.final_state, SessionState::Destroyed);
        assert_eq!(report.destroy, Some(DestroyOutcome::Deleted));
        assert_eq!(provider.delete_calls(), 1);
        assert_eq!(shell.dialed(), vec![FAKE_V6.parse::<std::net::IpAddr>().unwrap()]);

        let created = provider.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].region, "ams3");
        assert_eq!(created[0].ssh_key_id, 77);
        assert!(created[0].ipv6);
    }

    #[tokio::test]
    async fn create_failure_surfaces_without_delete() {
        let provider = Arc::new(FakeProvider::new().with_create_error(422));
        let (shell, _input) = FakeShell::new();

        let err = run_disposable_session(provider.clone(), Arc::new(shell), request(), options(false))
            .await
            .unwrap_err();

        assert!(matches!(err, DisposableError::CreateFailed { .. }));
        assert_eq!(provider.delete_calls(), 0);
    }

    #[tokio::test]
    async fn session_failure_is_reported_after_cleanup() {
        let provider = Arc::new(FakeProvider::new());
        let (shell, _input) = FakeShell::new();
        let shell = Arc::new(shell.failing("bootstrap exited with status 1"));

        let err = run_disposable_session(provider.clone(), shell, request(), options(false))
            .await
            .unwrap_err();

        match err {
            DisposableError::SessionFailed { message } => assert!(message.contains("bootstrap")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.delete_calls(), 1);
    }

    #[tokio::test]
    async fn relay_fault_fails_session_after_cleanup() {
        let provider = Arc::new(FakeProvider::new());
        let (shell, _input) = FakeShell::new();
        let shell = Arc::new(shell.faulting_after(TICK, "failed to read standard input: EIO"));

        let err = run_disposable_session(provider.clone(), shell, request(), options(false))
            .await
            .unwrap_err();

        match err {
            DisposableError::SessionFailed { message } => {
                assert!(message.contains("standard input"))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.delete_calls(), 1);
    }

    #[tokio::test]
    async fn panicking_worker_still_destroys() {
        let provider = Arc::new(FakeProvider::new().with_panicking_get());
        let (shell, _input) = FakeShell::new();

        let err = run_disposable_session(provider.clone(), Arc::new(shell), request(), options(false))
            .await
            .unwrap_err();

        match err {
            DisposableError::SessionFailed { message } => assert!(message.contains("crashed")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.get_calls(), 1);
        assert_eq!(provider.delete_calls(), 1);
    }

    #[tokio::test]
    async fn revoked_token_requires_manual_deletion() {
        let provider = Arc::new(FakeProvider::new().with_deletes(&[Some(401)]));
        let (shell, _input) = FakeShell::new();
        let shell = Arc::new(shell.closing_after(TICK));

        let err = run_disposable_session(provider.clone(), shell, request(), options(false))
            .await
            .unwrap_err();

        match err {
            DisposableError::ManualDeletionRequired { id } => assert_eq!(id, FAKE_ID),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.delete_calls(), 1);
    }

    #[tokio::test]
    async fn release_deletes_unconfirmed_droplet() {
        let provider = Arc::new(FakeProvider::new());
        let (shell, _input) = FakeShell::new();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (transition_tx, _) = broadcast::channel(4);
        let ctx = FlowContext {
            provider: provider.clone(),
            shell: Arc::new(shell),
            request: request(),
            prefer_ipv6: false,
            timings: options(false).timings,
            events_tx,
            transition_tx,
            cancel: CancellationToken::new(),
            instance: Default::default(),
        };

        let mut report = SessionReport {
            final_state: SessionState::Interactive,
            instance: Some(crate::session_state::RemoteInstanceHandle {
                id: FAKE_ID,
                name: "leftover".into(),
                status: crate::session_state::InstanceStatus::Active,
            }),
            address: None,
            destroy: None,
            failure: None,
            interrupts: 0,
        };
        release(&ctx, &mut report).await;

        assert_eq!(report.destroy, Some(DestroyOutcome::Deleted));
        assert_eq!(provider.delete_calls(), 1);

        // Already confirmed: nothing more to do.
        release(&ctx, &mut report).await;
        assert_eq!(provider.delete_calls(), 1);
    }
}
