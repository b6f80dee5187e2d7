use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use disposable_transfer::TransferClient;
use disposable_transfer::client::default_destination;

/// Copy a file or folder from the host running `disposable up` onto this
/// droplet.
#[derive(Parser, Debug)]
#[command(name = "copyfrom", version)]
struct Args {
    /// Host file or folder to fetch
    source: String,

    /// Where to save it on the droplet (default: ./<name>)
    destination: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let destination = args
        .destination
        .unwrap_or_else(|| PathBuf::from(default_destination(&args.source)));

    let result = match TransferClient::from_env() {
        Ok(client) => client.pull(&args.source, &destination).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            println!(
                "host:{} -> {} ({} files, {} folders, {} bytes)",
                args.source,
                destination.display(),
                report.files,
                report.folders,
                report.bytes
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("copyfrom: {e}");
            ExitCode::FAILURE
        }
    }
}
