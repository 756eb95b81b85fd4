use clap::{Args, Subcommand};

use pharmasync::service::SyncService;

use super::OutputFormat;

/// Inspect or clear pending writes
#[derive(Args)]
pub struct QueueCommand {
    #[command(subcommand)]
    command: QueueSubcommand,
}

#[derive(Subcommand)]
enum QueueSubcommand {
    /// List pending writes, oldest first
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Discard every pending write
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

impl QueueCommand {
    pub fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            QueueSubcommand::Show { format } => {
                let entries = service.get_sync_queue();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        if entries.is_empty() {
                            println!("No pending writes.");
                            return Ok(());
                        }
                        for entry in &entries {
                            let id = entry.record.id().unwrap_or_else(|_| "?".to_string());
                            println!(
                                "{}  {:<6} {:<12} {}",
                                entry.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                                entry.operation,
                                entry.table,
                                id
                            );
                        }
                        println!();
                        println!("{} pending write(s)", entries.len());
                    }
                }
                Ok(())
            }
            QueueSubcommand::Clear { yes } => {
                if !yes {
                    println!(
                        "This discards {} pending write(s) that never reached the remote store.",
                        service.get_sync_queue().len()
                    );
                    println!("Re-run with --yes to confirm.");
                    return Ok(());
                }
                let cleared = service.clear_sync_queue();
                println!("Cleared {} pending write(s).", cleared);
                Ok(())
            }
        }
    }
}
