// ⚙️ Configuration - TOML file + command-line overrides

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "merchant-batch-archive",
    about = "Ingest merchant transaction files, archive them by merchant and month"
)]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "merchant-batch-archive.toml")]
    pub config: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Export directory (overrides config file)
    #[arg(short, long)]
    pub export_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add the merchant names of a file (xlsx, ods or csv) to the Merchants list
    ImportMerchants { file: PathBuf },

    /// Ingest a transaction file as a new upload batch
    Import { file: PathBuf },

    /// Archive live transactions and purge them
    Export {
        /// Export only this upload batch (default: everything)
        #[arg(long)]
        upload: Option<i64>,
    },

    /// Monthly merchant totals over live data
    Report {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Upload and export history
    History,

    /// Delete an upload batch and its live rows
    DeleteUpload { id: i64 },

    /// Delete an export history entry and its archive
    DeleteExport { id: i64 },

    /// Add a merchant name
    AddMerchant { name: String },

    /// Remove a merchant name
    RemoveMerchant { name: String },

    /// Add a card scheme name
    AddCardScheme { name: String },

    /// Remove a card scheme name
    RemoveCardScheme { name: String },

    /// Browse the monthly report in the terminal
    View,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Reference lists (Merchants, CardSchemes)
    #[serde(default = "default_setup_db")]
    pub setup_db: PathBuf,

    /// Transactions and batch history
    #[serde(default = "default_data_db")]
    pub data_db: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            setup_db: default_setup_db(),
            data_db: default_data_db(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            dir: default_export_dir(),
        }
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
        file: None,
    }
}

fn default_setup_db() -> PathBuf {
    PathBuf::from("setup.db")
}

fn default_data_db() -> PathBuf {
    PathBuf::from("data.db")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            export: ExportConfig::default(),
            logging: default_logging(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref dir) = cli.export_dir {
            config.export.dir = dir.clone();
        }

        config
    }

    /// Parse a config file body; a malformed file falls back to defaults
    pub fn parse(contents: &str) -> Self {
        toml::from_str(contents).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    }
}
