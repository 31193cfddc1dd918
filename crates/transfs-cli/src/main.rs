//! TransFS CLI - mount a virtual view of a software filestore.
//!
//! Provides commands for:
//! - Mounting and unmounting the virtual filesystem
//! - Validating and inspecting the configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check::CheckCommand, mount::MountCommand, unmount::UnmountCommand};

#[derive(Debug, Parser)]
#[command(name = "transfs", version, about = "Virtual filesystem views over a software filestore")]
pub struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mount the virtual filesystem
    Mount(MountCommand),
    /// Unmount the virtual filesystem
    Unmount(UnmountCommand),
    /// Validate the configuration and print the virtual tree
    Check(CheckCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(transfs_core::Config::default_path);

    match cli.command {
        Commands::Mount(cmd) => cmd.execute(&config_path).await,
        Commands::Unmount(cmd) => cmd.execute(&config_path).await,
        Commands::Check(cmd) => cmd.execute(&config_path),
    }
}
