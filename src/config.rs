use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Command;

#[derive(Parser, Debug)]
#[command(name = "outlay", about = "Outlay - expense and recurring expense storage")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "outlay.toml")]
    pub config: PathBuf,

    /// Log level (overrides config file and environment)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Storage backend: json or postgres
    #[arg(long)]
    pub storage_type: Option<String>,

    /// Data directory for json, host/database for postgres
    #[arg(long)]
    pub storage_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Json,
    Postgres,
}

impl StorageKind {
    /// Anything unrecognized selects the file store.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => StorageKind::Postgres,
            _ => StorageKind::Json,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default, rename = "type")]
    pub kind: StorageKind,

    #[serde(default = "default_storage_url")]
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_ssl")]
    pub ssl: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

const SSL_MODES: [&str; 5] = ["disable", "prefer", "require", "verify-ca", "verify-full"];

fn default_storage_url() -> String {
    "data".to_string()
}

fn default_ssl() -> String {
    "disable".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            kind: StorageKind::Json,
            url: default_storage_url(),
            user: None,
            password: None,
            ssl: default_ssl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// File, then environment, then CLI. A missing file means defaults.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        Self::load_with(cli, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        cli: &CliArgs,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&cli.config)?;
        config.apply_env(lookup);

        if let Some(ref kind) = cli.storage_type {
            config.storage.kind = StorageKind::parse_lenient(kind);
        }
        if let Some(ref url) = cli.storage_url {
            config.storage.url = url.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        config.storage.normalize();

        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Applies the `STORAGE_*` overrides. `lookup` stands in for the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(kind) = lookup("STORAGE_TYPE") {
            self.storage.kind = StorageKind::parse_lenient(&kind);
        }
        if let Some(url) = lookup("STORAGE_URL") {
            self.storage.url = url;
        }
        if let Some(user) = lookup("STORAGE_USER") {
            self.storage.user = Some(user);
        }
        if let Some(password) = lookup("STORAGE_PASS") {
            self.storage.password = Some(password);
        }
        if let Some(ssl) = lookup("STORAGE_SSL") {
            self.storage.ssl = ssl;
        }
    }
}

impl StorageConfig {
    fn normalize(&mut self) {
        if self.url.trim().is_empty() {
            self.url = default_storage_url();
        }
        if !SSL_MODES.contains(&self.ssl.as_str()) {
            self.ssl = default_ssl();
        }
    }
}
