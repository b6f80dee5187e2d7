use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "disposable",
    about = "Throwaway DigitalOcean droplets with a shell and a file tunnel",
    version
)]
pub struct Cli {
    /// Path to config file [default: ~/.config/disposable/config.toml]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::paths::default_config_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Set the API token (and, on first run, region, size and SSH key)
    Auth,

    /// Choose the default region
    Setregion,

    /// Choose the default droplet size
    Setsize,

    /// Create a droplet, open a shell on it, destroy it on exit
    Up {
        /// Image slug [default: latest Debian]
        #[arg(long)]
        distro: Option<String>,

        /// Region slug [default: configured region]
        #[arg(long)]
        region: Option<String>,

        /// Size slug [default: configured size]
        #[arg(long)]
        size: Option<String>,
    },
}
