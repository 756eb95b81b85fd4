//! PharmaSync Remote Store Server
//!
//! Serves the shared remote store that every branch's sync engine pushes to
//! and pulls from. Records are kept in SQLite.
//!
//! # Configuration
//!
//! Environment variables:
//! - `PHARMASYNC_PORT`: Port to listen on (default: 8080)
//! - `PHARMASYNC_SERVER_DB`: SQLite file (default: ~/.local/share/pharmasync-server/remote.db)
//! - `PHARMASYNC_SERVER_CONFIG`: Path to config file (default: ~/.config/pharmasync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     name: "branch-downtown"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET /tables/{table}/records[?since=RFC3339]`: List records
//! - `GET|PUT|DELETE /tables/{table}/records/{id}`: Single record
//! - `GET /tables/{table}/count`: Row count

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pharmasync::server::{router, ApiKeyStore, AppState, ServerConfig};
use pharmasync::store::{SqliteStore, StoreType};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pharmasync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ServerConfig::from_env();

    tracing::info!("Database: {}", config.database_path.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let store = match SqliteStore::open(&config.database_path, StoreType::Remote).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Load API keys
    let api_keys = Arc::new(ApiKeyStore::load(&config.config_path));

    // Build app state
    let state = AppState {
        store: Arc::new(store),
        api_keys,
    };

    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
