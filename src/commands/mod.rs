mod config_cmd;
mod queue_cmd;
mod status_cmd;
mod sync_cmd;

pub use config_cmd::{ConfigCommand, OutputFormat};
pub use queue_cmd::QueueCommand;
pub use status_cmd::{CheckCommand, StatusCommand};
pub use sync_cmd::{InitCommand, RunCommand, SyncCommand};

use std::sync::Arc;

use pharmasync::config::Config;
use pharmasync::queue::SyncQueue;
use pharmasync::service::{ServiceOptions, SyncService};
use pharmasync::store::{HttpStore, SqliteStore, StoreType};

/// Opens both stores and wires the sync service from configuration.
pub async fn open_service(config: &Config) -> Result<SyncService, Box<dyn std::error::Error>> {
    let remote_url = config.sync.remote_url.as_deref().ok_or(
        "No remote store configured. Set sync.remote_url in the config file or PHARMASYNC_REMOTE_URL.",
    )?;

    let local = SqliteStore::open(&config.database_path.value, StoreType::Local).await?;
    let remote = HttpStore::new(remote_url, config.sync.api_key.clone())?;
    let registry = config.registry()?;
    let queue = SyncQueue::persistent(config.sync.queue_limits(), config.queue_path())?;

    let options = ServiceOptions {
        mode: config.mode.value,
        probe_timeout: config.sync.probe_timeout(),
        debounce: config.sync.debounce(),
        schedule: config.sync.schedule(),
    };

    Ok(SyncService::new(
        Arc::new(local),
        Arc::new(remote),
        registry,
        queue,
        options,
    ))
}
