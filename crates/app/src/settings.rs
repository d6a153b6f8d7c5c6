//! Handles settings for the application. Configuration is read from
//! `config/railbook.toml` (or the file given with `--config`) and
//! `RAILBOOK__*` environment variables, e.g. `RAILBOOK__APP__LEVEL=debug`.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG: &str = "config/railbook";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Memory,
    Sqlite(String),
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Database::Memory => String::from("sqlite::memory:"),
            Database::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_owner")]
    pub owner: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
            owner: default_owner(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_owner() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub rule_cache_size: usize,
    pub pending_void_days: i64,
    pub refund_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let config = engine::EngineConfig::default();
        Self {
            rule_cache_size: config.rule_cache_size,
            pending_void_days: config.pending_void_days,
            refund_attempts: config.refund_attempts,
        }
    }
}

impl From<&EngineSettings> for engine::EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            rule_cache_size: settings.rule_cache_size,
            pending_void_days: settings.pending_void_days,
            refund_attempts: settings.refund_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Publisher {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for Publisher {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 250,
            max_backoff_ms: 15_000,
            max_jitter_ms: 500,
        }
    }
}

impl From<&Publisher> for engine::Backoff {
    fn from(settings: &Publisher) -> Self {
        Self {
            initial: Duration::from_millis(settings.initial_backoff_ms),
            max: Duration::from_millis(settings.max_backoff_ms),
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub engine: EngineSettings,
    pub publisher: Option<Publisher>,
}

impl Settings {
    /// Load settings. The default file is optional, an explicit `path` is not.
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG)).required(path.is_some()))
            .add_source(
                Environment::with_prefix("RAILBOOK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
