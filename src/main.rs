use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use disposable::cli::{Cli, Command};
use disposable::context::AppContext;
use disposable::logging;
use disposable::session::{self, UpArgs};
use disposable::setup;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Terminal layer: the remote shell owns the terminal during `up`, so
    // tracing stays off stderr unless asked for.
    let terminal_filter = if cli.verbose {
        EnvFilter::new("disposable=debug,disposable_transfer=debug")
    } else {
        EnvFilter::new("off")
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures debug, discards until a session starts.
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("disposable=debug,disposable_transfer=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let config_path = cli.config_path();

    // auth runs before a config exists
    if matches!(cli.command, Command::Auth) {
        return setup::run_auth(&config_path).await.map_err(Into::into);
    }

    let mut ctx = AppContext::load(&config_path)?;

    match cli.command {
        Command::Auth => unreachable!(),
        Command::Setregion => setup::run_set_region(&mut ctx).await?,
        Command::Setsize => setup::run_set_size(&mut ctx).await?,
        Command::Up {
            distro,
            region,
            size,
        } => {
            let logs_dir = disposable::paths::logs_dir();
            let log_path = logging::session_log_path(&logs_dir);
            if file_handle.set_file(&log_path).is_ok() {
                logging::rotate_session_logs(&logs_dir, logging::KEEP_SESSION_LOGS);
            }
            tracing::info!(log = %log_path.display(), "session log");

            session::run_up(
                &ctx,
                UpArgs {
                    distro,
                    region,
                    size,
                },
            )
            .await?
        }
    }

    Ok(())
}
