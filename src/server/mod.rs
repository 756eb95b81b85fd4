//! HTTP front end of the shared remote store.
//!
//! Serves the table-parameterized record API that [`HttpStore`] talks to,
//! backed by any [`StoreClient`] (a [`SqliteStore`] in production).
//!
//! [`HttpStore`]: crate::store::HttpStore
//! [`SqliteStore`]: crate::store::SqliteStore

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::StoreError;
use crate::record::Record;
use crate::store::{Filter, StoreClient};

// ============================================================================
// Configuration
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    /// Label of the branch or device using the key
    name: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// SQLite file backing the remote store
    pub database_path: PathBuf,
    /// Path to config file
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("PHARMASYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let database_path = std::env::var("PHARMASYNC_SERVER_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("pharmasync-server")
                    .join("remote.db")
            });

        let config_path = std::env::var("PHARMASYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("pharmasync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            database_path,
            config_path,
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated client info, added to request extensions after auth
#[derive(Debug, Clone)]
pub struct AuthClient {
    pub name: String,
}

/// API key store - maps key -> AuthClient
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthClient>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    pub fn load(config_path: &FsPath) -> Self {
        let keys = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let map: HashMap<_, _> = config
                        .api_keys
                        .into_iter()
                        .map(|entry| (entry.key, AuthClient { name: entry.name }))
                        .collect();
                    tracing::info!("Loaded {} API key(s)", map.len());
                    map
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                HashMap::new()
            }
        };

        Self { keys }
    }

    pub fn with_key(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.keys.insert(key.into(), AuthClient { name: name.into() });
        self
    }

    /// Validate an API key and return the associated client
    fn validate(&self, key: &str) -> Option<AuthClient> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreClient>,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            );
        }
    };

    // Validate API key
    match state.api_keys.validate(api_key) {
        Some(client) => {
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler failure mapped onto an HTTP status
enum ApiError {
    BadRequest(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            ApiError::Store(StoreError::InvalidRecord(e)) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_record", e.to_string())
            }
            ApiError::Store(e) => {
                tracing::error!("Store error: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    e.to_string(),
                )
            }
        }
    }
}

fn check_table(table: &str) -> Result<(), ApiError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid table name '{}'", table)))
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        })
        .into_response(),
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            e.to_string(),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    since: Option<DateTime<Utc>>,
}

async fn list_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Record>>, ApiError> {
    check_table(&table)?;
    let filter = match query.since {
        Some(since) => Filter::UpdatedSince(since),
        None => Filter::All,
    };
    Ok(Json(state.store.find(&table, &filter).await?))
}

async fn get_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    check_table(&table)?;
    match state.store.get(&table, &id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok(error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no record '{}' in '{}'", id, table),
        )),
    }
}

async fn put_record(
    State(state): State<AppState>,
    Extension(client): Extension<AuthClient>,
    Path((table, id)): Path<(String, String)>,
    Json(record): Json<Record>,
) -> Result<Json<Record>, ApiError> {
    check_table(&table)?;
    let record_id = record.id().map_err(StoreError::from)?;
    if record_id != id {
        return Err(ApiError::BadRequest(format!(
            "record id '{}' does not match path id '{}'",
            record_id, id
        )));
    }

    state.store.upsert(&table, &record).await?;
    tracing::debug!("{} wrote '{}' {}", client.name, table, id);
    Ok(Json(record))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_record(
    State(state): State<AppState>,
    Extension(client): Extension<AuthClient>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    check_table(&table)?;
    let deleted = state.store.delete(&table, &id).await?;
    tracing::debug!("{} deleted '{}' {} ({})", client.name, table, id, deleted);
    Ok(Json(DeleteResponse { deleted }))
}

#[derive(Serialize)]
struct CountResponse {
    count: u64,
}

async fn count_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    check_table(&table)?;
    let count = state.store.count(&table).await?;
    Ok(Json(CountResponse { count }))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/tables/{table}/records", get(list_records))
        .route(
            "/tables/{table}/records/{id}",
            get(get_record).put(put_record).delete(delete_record),
        )
        .route("/tables/{table}/count", get(count_records))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
