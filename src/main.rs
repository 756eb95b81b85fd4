use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    open_service, CheckCommand, ConfigCommand, InitCommand, QueueCommand, RunCommand,
    StatusCommand, SyncCommand,
};
use pharmasync::config::Config;

#[derive(Parser)]
#[command(name = "pharmasync")]
#[command(version)]
#[command(about = "Offline-first sync between the local store and the shared remote store", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connection, queue and last-sync status
    Status(StatusCommand),

    /// Probe the remote store
    Check(CheckCommand),

    /// Inspect or clear pending writes
    Queue(QueueCommand),

    /// Sync with the remote store now
    Sync(SyncCommand),

    /// Seed an empty local store from the remote store
    Init(InitCommand),

    /// Run the background sync scheduler
    Run(RunCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pharmasync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let service = open_service(&config).await?;
    let result = match command {
        Commands::Status(cmd) => cmd.run(&service).await,
        Commands::Check(cmd) => cmd.run(&service).await,
        Commands::Queue(cmd) => cmd.run(&service),
        Commands::Sync(cmd) => cmd.run(&service).await,
        Commands::Init(cmd) => cmd.run(&service).await,
        Commands::Run(cmd) => cmd.run(&service).await,
        Commands::Config(_) => Ok(()),
    };

    // Pending writes must be on disk before the process exits
    service.flush_queue().await;
    result
}
