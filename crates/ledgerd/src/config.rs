//! Configuration for ledgerd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ledger_database::RetryPolicy;
use ledger_outbox::DispatcherConfig;

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "ledger.db";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_DELAY_SECS: u64 = 300;

/// Main ledgerd configuration.
///
/// Values resolve in precedence order: CLI flag, then environment variable
/// (handled by clap), then config file, then the built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Webhook endpoint receiving event POSTs. Required for `run` and `flush`.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Maximum rows claimed per poll cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay between poll cycles in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Age in seconds after which another dispatcher may take over a claim.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    /// Delivery attempts before a row is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry backoff in seconds.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Backoff cap in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_claim_timeout_secs() -> u64 {
    DEFAULT_CLAIM_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_secs() -> u64 {
    DEFAULT_BASE_DELAY_SECS
}

fn default_max_delay_secs() -> u64 {
    DEFAULT_MAX_DELAY_SECS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            webhook_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            claim_timeout_secs: DEFAULT_CLAIM_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific JSON file. Missing keys take their
    /// default values.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            claim_timeout: Duration::from_secs(self.claim_timeout_secs),
            retry: self.retry_policy(),
        }
    }
}
