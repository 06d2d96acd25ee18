//! Airlift CLI - secure clipboard and file sync with a paired device.

mod commands;
mod process;
mod ui;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airlift")]
#[command(about = "Secure clipboard and file sync with a paired device", long_about = None)]
struct Cli {
    /// Device name to advertise
    #[arg(short, long, default_value_t = default_device_name())]
    name: String,

    /// Pairing passphrase; falls back to the AIRLIFT_PASSPHRASE variable
    #[arg(short, long)]
    passphrase: Option<String>,

    /// Salt shared between the paired devices
    #[arg(long, default_value = "airlift-pairing-v1")]
    salt: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "airlift-device".to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync service (default)
    Run {
        /// Control endpoint of the peer (host:port)
        #[arg(long)]
        peer: Option<String>,
    },
    /// Send one file to the peer and exit
    Send {
        /// File to send
        file: std::path::PathBuf,
        /// Control endpoint of the peer (host:port)
        #[arg(long)]
        peer: String,
    },
    /// Show device info
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("airlift=info".parse()?)
                .add_directive("mdns_sd=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { peer: None }) {
        Commands::Run { peer } => {
            commands::run_service(cli.name, cli.passphrase, cli.salt, peer).await?
        }
        Commands::Send { file, peer } => {
            commands::send_file(cli.name, cli.passphrase, cli.salt, file, peer).await?
        }
        Commands::Info => commands::show_info(cli.name),
    }

    Ok(())
}
