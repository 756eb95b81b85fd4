use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SyncError;
use crate::mapping::{TableMapping, TableRegistry};
use crate::queue::QueueLimits;
use crate::scheduler::Schedule;
use crate::selector::StoreMode;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote store URL (e.g., "http://localhost:8080" or "https://sync.example.com")
    pub remote_url: Option<String>,
    /// API key for the remote store
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Preferred store; resolved into [`Config::mode`]
    #[serde(skip_serializing)]
    pub mode: Option<StoreMode>,
    pub connectivity_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub backup_interval_secs: u64,
    pub auth_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub watchdog_threshold_secs: u64,
    pub queue_max_len: usize,
    pub queue_max_attempts: u32,
    /// Where pending writes are persisted (default: data dir)
    pub queue_path: Option<PathBuf>,
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let schedule = Schedule::default();
        let limits = QueueLimits::default();
        Self {
            remote_url: None,
            api_key: None,
            mode: None,
            connectivity_interval_secs: schedule.connectivity_interval.as_secs(),
            probe_timeout_ms: 2000,
            backup_interval_secs: schedule.backup_interval.as_secs(),
            auth_interval_secs: schedule.auth_interval.as_secs(),
            watchdog_interval_secs: schedule.watchdog_interval.as_secs(),
            watchdog_threshold_secs: schedule.watchdog_threshold.as_secs(),
            queue_max_len: limits.max_len,
            queue_max_attempts: limits.max_attempts,
            queue_path: None,
            debounce_ms: 1000,
        }
    }
}

impl SyncConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            connectivity_interval: Duration::from_secs(self.connectivity_interval_secs.max(1)),
            backup_interval: Duration::from_secs(self.backup_interval_secs.max(1)),
            auth_interval: Duration::from_secs(self.auth_interval_secs.max(1)),
            watchdog_interval: Duration::from_secs(self.watchdog_interval_secs.max(1)),
            watchdog_threshold: Duration::from_secs(self.watchdog_threshold_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_len: self.queue_max_len.max(1),
            max_attempts: self.queue_max_attempts.max(1),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the local SQLite store
    pub database_path: ConfigValue<PathBuf>,
    /// Preferred store
    pub mode: ConfigValue<StoreMode>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
    /// Table mappings; the pharmacy defaults when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableMapping>>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    sync: Option<SyncConfig>,
    tables: Option<Vec<TableMapping>>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("pharmasync.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut mode = ConfigValue::new(StoreMode::default(), ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();
        let mut tables = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
            if let Some(file_mode) = sync.mode {
                mode = ConfigValue::new(file_mode, ConfigSource::File);
            }
            tables = file_config.tables;
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("PHARMASYNC_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("PHARMASYNC_MODE") {
            let env_mode = value
                .parse::<StoreMode>()
                .map_err(ConfigError::InvalidValue)?;
            mode = ConfigValue::new(env_mode, ConfigSource::Environment);
        }
        // Sync env var overrides
        if let Ok(url) = std::env::var("PHARMASYNC_REMOTE_URL") {
            sync.remote_url = Some(url);
        }
        if let Ok(key) = std::env::var("PHARMASYNC_API_KEY") {
            sync.api_key = Some(key);
        }

        Ok(Self {
            database_path,
            mode,
            config_file,
            sync,
            tables,
        })
    }

    /// Builds the table registry from the configured mappings.
    pub fn registry(&self) -> Result<TableRegistry, SyncError> {
        match &self.tables {
            Some(mappings) => TableRegistry::new(mappings.clone()),
            None => TableRegistry::pharmacy_default(),
        }
    }

    /// Where the sync queue snapshot lives.
    pub fn queue_path(&self) -> PathBuf {
        self.sync
            .queue_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("sync-queue.json"))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/pharmasync/
    /// - macOS: ~/Library/Application Support/pharmasync/
    /// - Windows: %APPDATA%/pharmasync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pharmasync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/pharmasync/
    /// - macOS: ~/Library/Application Support/pharmasync/
    /// - Windows: %APPDATA%/pharmasync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pharmasync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(message) => write!(f, "Invalid configuration: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SyncDirection;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("pharmasync.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.sync.probe_timeout_ms, 2000);
        assert_eq!(config.sync.queue_max_len, 10_000);
        assert_eq!(config.sync.schedule(), Schedule::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/store.db").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  remote_url: http://localhost:8080").unwrap();
        writeln!(file, "  mode: online").unwrap();
        writeln!(file, "  backup_interval_secs: 60").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/store.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.mode.value, StoreMode::Online);
        assert_eq!(config.mode.source, ConfigSource::File);
        assert_eq!(
            config.sync.remote_url.as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(
            config.sync.schedule().backup_interval,
            Duration::from_secs(60)
        );
        // Unset fields keep their defaults
        assert_eq!(config.sync.debounce_ms, 1000);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_database_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: data/local.db").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/local.db")
        );
    }

    #[test]
    fn test_tables_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "tables:").unwrap();
        writeln!(file, "  - local_name: staff").unwrap();
        writeln!(file, "    remote_name: branch_staff").unwrap();
        writeln!(file, "    direction: pull_excluded").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve("staff").unwrap().direction,
            SyncDirection::PullExcluded
        );
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  mode: offline").unwrap();

        // Set env var
        std::env::set_var("PHARMASYNC_MODE", "online");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.mode.value, StoreMode::Online);
        assert_eq!(config.mode.source, ConfigSource::Environment);

        // Clean up
        std::env::remove_var("PHARMASYNC_MODE");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut sync = SyncConfig::default();
        sync.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&sync).unwrap();
        assert!(!json.contains("secret"));
    }
}
