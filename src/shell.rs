//! Remote shell over SSH.
//!
//! Dials the droplet until sshd answers, runs the bootstrap command, asks the
//! server to forward its loopback tunnel port back to us, serves the transfer
//! routes on those forwarded channels, and relays a PTY between the local
//! terminal and the remote shell.

use std::fmt;
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use disposable_transfer::codec::TUNNEL_HOST;
use disposable_transfer::server::{self as transfer, Listener, TransferState};
use russh::client::{self, Msg};
use russh::keys::{self, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, ChannelStream, Pty};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DisposableError;
use crate::flow::Event;
use crate::tools::TransferTool;

/// Byte sent to the remote shell for a forwarded Ctrl+C.
pub const ETX: u8 = 0x03;
pub const SSH_PORT: u16 = 22;
/// How often the local terminal size is compared against the remote PTY.
pub const RESIZE_POLL: Duration = Duration::from_millis(100);
/// Upper bound on one dial + handshake + auth attempt.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const TERM: &str = "vt100";

/// Everything needed to attach to a freshly created droplet.
#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub user: String,
    /// OpenSSH-encoded private key.
    pub private_key: String,
    pub bootstrap: String,
    pub tunnel_port: u16,
    /// Relative transfer paths resolve against this directory.
    pub transfer_root: PathBuf,
    pub dial_retry: Duration,
    /// Uploaded after the bootstrap command.
    pub tools: Vec<TransferTool>,
}

// ── ShellLink ──────────────────────────────────────────────

/// Handle to an attached shell, carried in `Event::ShellConnected`.
///
/// Dropping the last clone tears down the SSH connection and its tasks.
#[derive(Clone)]
pub struct ShellLink {
    input: mpsc::UnboundedSender<Vec<u8>>,
    session: Option<Arc<ShellSession>>,
}

impl ShellLink {
    /// A link with no connection behind it; input goes to `input`.
    pub fn detached(input: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            input,
            session: None,
        }
    }

    /// Forward a Ctrl+C to the remote side.
    pub fn send_interrupt(&self) -> Result<(), DisposableError> {
        self.input
            .send(vec![ETX])
            .map_err(|_| DisposableError::Ssh {
                message: "remote shell input is closed".into(),
            })
    }
}

impl fmt::Debug for ShellLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellLink")
            .field("connected", &self.session.is_some())
            .finish()
    }
}

struct ShellSession {
    _handle: client::Handle<TunnelHandler>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── Connector ──────────────────────────────────────────────

#[async_trait]
pub trait ShellConnector: Send + Sync + 'static {
    /// Attach to the droplet at `address`.
    ///
    /// Returns `Ok(None)` when `cancel` fires first. Relay failures and the
    /// remote side closing are reported later on `events`.
    async fn connect(
        &self,
        address: IpAddr,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ShellLink>, DisposableError>;
}

pub struct SshConnector {
    settings: ShellSettings,
}

impl SshConnector {
    pub fn new(settings: ShellSettings) -> Self {
        Self { settings }
    }

    async fn establish(
        &self,
        address: IpAddr,
        events: mpsc::UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Result<ShellLink, DisposableError> {
        let settings = &self.settings;
        let key = keys::decode_secret_key(&settings.private_key, None).map_err(|e| {
            DisposableError::Key {
                message: e.to_string(),
            }
        })?;
        let key = Arc::new(key);
        let addr = SocketAddr::new(address, SSH_PORT);

        // Every dial attempt shares one forward queue so the listener below
        // sees channels from whichever attempt succeeded.
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let handler = TunnelHandler {
            forwarded: forwarded_tx,
        };

        let mut attempt = 0u32;
        let mut handle = loop {
            attempt += 1;
            match dial(addr, &settings.user, &key, handler.clone()).await {
                Ok(handle) => break handle,
                Err(e) => {
                    tracing::debug!(%addr, attempt, error = %e, "ssh not ready, retrying");
                    tokio::time::sleep(settings.dial_retry).await;
                }
            }
        };
        tracing::info!(%addr, attempt, user = %settings.user, "ssh authenticated");

        run_remote(&handle, &settings.bootstrap, None)
            .await
            .map_err(|e| DisposableError::Ssh {
                message: format!("bootstrap command failed: {e}"),
            })?;
        install_tools(&handle, &settings.tools).await;

        let port = handle
            .tcpip_forward(TUNNEL_HOST, u32::from(settings.tunnel_port))
            .await
            .map_err(ssh_error)?;
        let state = TransferState::new(settings.transfer_root.clone());
        tracing::info!(port, root = %state.root().display(), "reverse tunnel open");

        let channel = handle.channel_open_session().await.map_err(ssh_error)?;
        let (cols, rows) = terminal_size();
        channel
            .request_pty(
                true,
                TERM,
                cols,
                rows,
                0,
                0,
                &[(Pty::ECHO, 0), (Pty::IGNCR, 1)],
            )
            .await
            .map_err(ssh_error)?;
        channel.request_shell(true).await.map_err(ssh_error)?;

        let listener = TunnelListener {
            incoming: forwarded_rx,
            port: settings.tunnel_port,
        };
        let server_events = events.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = transfer::serve(listener, state).await {
                let _ = server_events.send(Event::Fault(format!("transfer tunnel stopped: {e}")));
            }
        });

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        spawn_input_reader(std::io::stdin(), input_tx.clone(), events.clone())?;
        let relay = tokio::spawn(relay(channel, input_rx, cancel, events));

        Ok(ShellLink {
            input: input_tx,
            session: Some(Arc::new(ShellSession {
                _handle: handle,
                tasks: vec![server, relay],
            })),
        })
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        address: IpAddr,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<Event>,
    ) -> Result<Option<ShellLink>, DisposableError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            link = self.establish(address, events, cancel.clone()) => link.map(Some),
        }
    }
}

fn ssh_error(e: russh::Error) -> DisposableError {
    DisposableError::Ssh {
        message: e.to_string(),
    }
}

// ── Dial ───────────────────────────────────────────────────

/// Accepts any host key: every droplet is brand new, so there is nothing to
/// pin against.
#[derive(Clone)]
struct TunnelHandler {
    forwarded: mpsc::UnboundedSender<Pin<Box<ChannelStream<Msg>>>>,
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            connected_address,
            connected_port,
            originator_address,
            originator_port,
            "tunnel connection"
        );
        let _ = self.forwarded.send(Box::pin(channel.into_stream()));
        Ok(())
    }
}

async fn dial(
    addr: SocketAddr,
    user: &str,
    key: &Arc<keys::PrivateKey>,
    handler: TunnelHandler,
) -> Result<client::Handle<TunnelHandler>, DisposableError> {
    let attempt = async {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, addr, handler)
            .await
            .map_err(ssh_error)?;
        let auth = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), None))
            .await
            .map_err(ssh_error)?;
        if !auth.success() {
            return Err(DisposableError::Ssh {
                message: format!("public key rejected for user {user}"),
            });
        }
        Ok(handle)
    };

    tokio::time::timeout(DIAL_TIMEOUT, attempt)
        .await
        .map_err(|_| DisposableError::Ssh {
            message: format!("timed out connecting to {addr}"),
        })?
}

/// Run `command` on its own exec channel, feeding it `stdin` if given.
/// A non-zero exit status is an error.
async fn run_remote(
    handle: &client::Handle<TunnelHandler>,
    command: &str,
    stdin: Option<&[u8]>,
) -> Result<(), DisposableError> {
    let mut channel = handle.channel_open_session().await.map_err(ssh_error)?;
    channel.exec(true, command).await.map_err(ssh_error)?;
    if let Some(bytes) = stdin {
        channel.data(bytes).await.map_err(ssh_error)?;
        channel.eof().await.map_err(ssh_error)?;
    }

    let mut stderr = Vec::new();
    let mut exit_code = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                tracing::debug!(command, output = %String::from_utf8_lossy(&data), "remote stdout");
            }
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    match exit_code {
        Some(0) => Ok(()),
        Some(code) => Err(DisposableError::Ssh {
            message: format!(
                "exited with status {code}: {}",
                String::from_utf8_lossy(&stderr).trim()
            ),
        }),
        None => {
            tracing::warn!(command, "remote command ended without an exit status");
            Ok(())
        }
    }
}

/// Upload the transfer executables. A failed upload only costs the
/// transfer commands, so the session goes on.
async fn install_tools(handle: &client::Handle<TunnelHandler>, tools: &[TransferTool]) {
    for tool in tools {
        match run_remote(handle, &tool.install_command(), Some(&tool.binary[..])).await {
            Ok(()) => {
                tracing::info!(tool = tool.name, bytes = tool.binary.len(), "transfer tool installed")
            }
            Err(e) => {
                tracing::warn!(tool = tool.name, error = %e, "transfer tool not installed")
            }
        }
    }
}

// ── Tunnel listener ────────────────────────────────────────

/// Feeds server-forwarded SSH channels to the transfer server as if they
/// were accepted TCP connections.
struct TunnelListener {
    incoming: mpsc::UnboundedReceiver<Pin<Box<ChannelStream<Msg>>>>,
    port: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct TunnelAddr {
    pub port: u16,
}

impl Listener for TunnelListener {
    type Io = Pin<Box<ChannelStream<Msg>>>;
    type Addr = TunnelAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(stream) => (stream, TunnelAddr { port: self.port }),
            // Connection gone: nothing more will ever arrive.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(TunnelAddr { port: self.port })
    }
}

// ── Terminal relay ─────────────────────────────────────────

/// Local terminal size as `(cols, rows)`.
fn terminal_size() -> (u32, u32) {
    let (rows, cols) = console::Term::stdout().size();
    (u32::from(cols), u32::from(rows))
}

/// The remote PTY ignores carriage returns, but a local Enter arrives as
/// `\r` on some terminals, so drop them before forwarding.
fn strip_carriage_returns(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|b| *b != b'\r').collect()
}

/// Blocking reads of local input live on their own thread.
///
/// End of input ends the session like a remote close and a read error ends
/// it as a fault; either way the droplet is destroyed. The thread also
/// stops once the relay no longer accepts input.
fn spawn_input_reader<R>(
    mut reader: R,
    input: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<Event>,
) -> Result<(), DisposableError>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("stdin-relay".into())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            let ended = loop {
                match reader.read(&mut buf) {
                    Ok(0) => break Event::SessionClosed,
                    Ok(n) => {
                        let bytes = strip_carriage_returns(&buf[..n]);
                        if !bytes.is_empty() && input.send(bytes).is_err() {
                            return;
                        }
                    }
                    // SIGINT lands here while a read is blocked.
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => break Event::Fault(format!("failed to read standard input: {e}")),
                }
            };
            tracing::info!(?ended, "local input ended");
            let _ = events.send(ended);
        })
        .map_err(|e| DisposableError::io("failed to start stdin reader", e))?;
    Ok(())
}

async fn relay(
    mut channel: Channel<Msg>,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut geometry = terminal_size();
    let mut resize = tokio::time::interval(RESIZE_POLL);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Err(e) = write_flush(&mut stdout, &data).await {
                        break Event::Fault(format!("failed to write to stdout: {e}"));
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    if let Err(e) = write_flush(&mut stderr, &data).await {
                        break Event::Fault(format!("failed to write to stderr: {e}"));
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::info!(exit_status, "remote shell exited");
                }
                Some(ChannelMsg::Close) | None => break Event::SessionClosed,
                Some(_) => {}
            },
            // Never yields None: the ShellLink keeps a sender alive. End of
            // local input arrives on `events` instead.
            Some(bytes) = input.recv() => {
                if let Err(e) = channel.data(&bytes[..]).await {
                    break Event::Fault(format!("failed to forward input: {e}"));
                }
            }
            _ = resize.tick() => {
                let current = terminal_size();
                if current != geometry {
                    geometry = current;
                    tracing::debug!(cols = current.0, rows = current.1, "terminal resized");
                    if let Err(e) = channel.window_change(current.0, current.1, 0, 0).await {
                        break Event::Fault(format!("failed to resize remote terminal: {e}"));
                    }
                }
            }
        }
    };

    let _ = events.send(outcome);
}

async fn write_flush<W: AsyncWrite + Unpin>(out: &mut W, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data).await?;
    out.flush().await
}
