//! Manual sync triggers and the long-running sync loop.

use clap::{Args, Subcommand};
use std::time::Duration;

use pharmasync::engine::SyncReport;
use pharmasync::service::SyncService;

/// Run a sync against the remote store
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: SyncSubcommand,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Push queued writes and local tables to the remote store
    Push,
    /// Pull remote tables into the local store
    Pull,
    /// Push, then pull
    All,
}

impl SyncCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        let report = match self.command {
            SyncSubcommand::Push => service.trigger_sync_to_remote().await?,
            SyncSubcommand::Pull => service.trigger_sync_to_local().await?,
            SyncSubcommand::All => service.trigger_full_sync().await?,
        };
        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &SyncReport) {
    if report.skipped {
        println!("Another sync is running; nothing done.");
        return;
    }
    println!("  ↑ {} pushed", report.local_to_remote);
    println!("  ↓ {} pulled", report.remote_to_local);
    if report.errors > 0 {
        println!("  ✗ {} error(s); see log for details", report.errors);
    } else {
        println!("Sync complete.");
    }
}

/// Seed an empty local store from the remote store
#[derive(Args)]
pub struct InitCommand;

impl InitCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        if service.initialize_database().await {
            println!("Local store ready.");
            Ok(())
        } else {
            Err("Local store could not be initialized; see log for details".into())
        }
    }
}

/// Run the background sync scheduler until interrupted
#[derive(Args)]
pub struct RunCommand {
    /// Seconds to wait for background work on shutdown
    #[arg(long, default_value = "10")]
    grace_secs: u64,
}

impl RunCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        service.check_connectivity().await;
        if !service.initialize_database().await {
            tracing::warn!("Starting with an uninitialized local store");
        }

        let handle = service.start_scheduler();
        println!("Sync running. Press Ctrl-C to stop.");

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        handle.shutdown().await;

        let grace = Duration::from_secs(self.grace_secs);
        if tokio::time::timeout(grace, service.supervisor().wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("Background tasks still running after {:?}", grace);
        }

        let pending = service.get_sync_queue().len();
        if pending > 0 {
            println!("{} write(s) still pending; they resume on next start.", pending);
        }
        Ok(())
    }
}
