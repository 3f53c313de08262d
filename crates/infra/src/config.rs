//! Configuration loading and representation.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file
//! (`etchforge.toml` in the working directory, or an explicit path), then
//! environment variables such as `ETCHFORGE__RECONCILIATION__BATCH_SIZE=100`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, ensure};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use etchforge_observability::LogSettings;

use crate::jobs::{JobExecutorConfig, RetryPolicy};

const ENV_PREFIX: &str = "ETCHFORGE";
const DEFAULT_FILE: &str = "etchforge";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// Expiry applied to quotes created without an explicit `expires_at`.
    pub default_quote_ttl_days: u32,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            default_quote_ttl_days: 7,
        }
    }
}

impl NegotiationSettings {
    pub fn default_quote_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.default_quote_ttl_days))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// Items reconciled per batch in a tenant-wide run.
    pub batch_size: usize,
    /// How often the background executor polls for queued runs.
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval_ms: 100,
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl ReconciliationSettings {
    /// Executor settings for the thread that runs queued tenant reconciliations.
    pub fn executor_config(&self) -> JobExecutorConfig {
        JobExecutorConfig::default().with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.base_delay_ms);
        RetryPolicy::exponential(self.max_attempts, base, base * 32)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogSettings,
    pub negotiation: NegotiationSettings,
    pub reconciliation: ReconciliationSettings,
}

impl AppConfig {
    /// Load defaults, then `path` (or `etchforge.toml` if present), then the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).context("encoding defaults")?)
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("loading configuration")?;

        Self::finish(config)
    }

    /// Defaults overlaid with an inline TOML document (no file or environment lookup).
    pub fn from_toml(document: &str) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).context("encoding defaults")?)
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()
            .context("parsing configuration")?;

        Self::finish(config)
    }

    fn finish(config: Config) -> anyhow::Result<Self> {
        let app: AppConfig = config
            .try_deserialize()
            .context("deserializing configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Install the global log subscriber described by the `log` section.
    pub fn init_logging(&self) {
        etchforge_observability::init(&self.log);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.negotiation.default_quote_ttl_days > 0,
            "negotiation.default_quote_ttl_days must be at least 1"
        );
        ensure!(
            self.reconciliation.batch_size > 0,
            "reconciliation.batch_size must be at least 1"
        );
        ensure!(
            self.reconciliation.poll_interval_ms > 0,
            "reconciliation.poll_interval_ms must be at least 1"
        );
        Ok(())
    }
}
