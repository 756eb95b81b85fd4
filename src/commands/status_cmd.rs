use clap::Args;

use pharmasync::connectivity::ConnectivityStatus;
use pharmasync::service::SyncService;

use super::OutputFormat;

/// Show sync status
#[derive(Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl StatusCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        service.check_connectivity().await;
        // Resolve the active store for the fresh connectivity status
        service.get_client();
        let status = service.get_sync_status();

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                println!("Connection:     {}", status.connection_status);
                println!("Active store:   {}", status.current_store_type);
                println!("Pending writes: {}", status.pending_items_count);
                match status.last_sync_timestamp {
                    Some(ts) => println!("Last sync:      {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("Last sync:      never"),
                }
                println!("Errors:         {}", status.error_count);
                println!("Dropped writes: {}", status.dropped_items_count);
            }
        }
        Ok(())
    }
}

/// Probe the remote store
#[derive(Args)]
pub struct CheckCommand;

impl CheckCommand {
    pub async fn run(&self, service: &SyncService) -> Result<(), Box<dyn std::error::Error>> {
        print!("Remote store: ");
        match service.check_connectivity().await {
            ConnectivityStatus::Online => println!("✓ reachable"),
            status => println!("✗ {}", status),
        }
        Ok(())
    }
}
