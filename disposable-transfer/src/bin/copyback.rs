use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use disposable_transfer::TransferClient;
use disposable_transfer::client::default_destination;

/// Copy a file or folder from this droplet back to the host running
/// `disposable up`.
#[derive(Parser, Debug)]
#[command(name = "copyback", version)]
struct Args {
    /// Droplet file or folder to send
    source: PathBuf,

    /// Where to save it on the host (default: ./<name> in the host's working directory)
    destination: Option<String>,
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
        .unwrap_or_else(|| default_destination(&args.source.to_string_lossy()));

    let result = match TransferClient::from_env() {
        Ok(client) => client.push(&args.source, &destination).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            println!(
                "{} -> host:{destination} ({} files, {} bytes)",
                args.source.display(),
                report.files,
                report.bytes
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("copyback: {e}");
            ExitCode::FAILURE
        }
    }
}
