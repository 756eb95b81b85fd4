use clap::{Args, Subcommand, ValueEnum};

use pharmasync::config::Config;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("mode: {}", config.mode.value);
                        println!("  source: {}", config.mode.source);
                        println!();

                        let sync = &config.sync;
                        println!("sync:");
                        println!(
                            "  remote_url: {}",
                            sync.remote_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  api_key: {}",
                            if sync.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!(
                            "  connectivity_interval_secs: {}",
                            sync.connectivity_interval_secs
                        );
                        println!("  probe_timeout_ms: {}", sync.probe_timeout_ms);
                        println!("  backup_interval_secs: {}", sync.backup_interval_secs);
                        println!("  auth_interval_secs: {}", sync.auth_interval_secs);
                        println!("  watchdog_interval_secs: {}", sync.watchdog_interval_secs);
                        println!(
                            "  watchdog_threshold_secs: {}",
                            sync.watchdog_threshold_secs
                        );
                        println!("  queue_max_len: {}", sync.queue_max_len);
                        println!("  queue_max_attempts: {}", sync.queue_max_attempts);
                        println!("  queue_path: {}", config.queue_path().display());
                        println!("  debounce_ms: {}", sync.debounce_ms);
                        println!();

                        let registry = config.registry()?;
                        let origin = if config.tables.is_some() {
                            "file"
                        } else {
                            "default"
                        };
                        println!("tables ({}):", origin);
                        for mapping in registry.iter() {
                            println!(
                                "  {} -> {} ({})",
                                mapping.local_name, mapping.remote_name, mapping.direction
                            );
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
