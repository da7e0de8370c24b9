//! Runtime configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional file,
//! then `REPLAY__SECTION__KEY` environment variables.

use crate::api::MarketScenario;
use crate::models::KlineInterval;
use crate::replay::ReplaySettings;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub feed: FeedConfig,
    pub replay: ReplayConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Routes of the simulated exchange, mirroring the Bybit v5 layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub kline_ws: String,
    pub private_ws: String,
    pub create_order: String,
    pub set_trading_stop: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            kline_ws: "/v5/public/linear".to_string(),
            private_ws: "/v5/private".to_string(),
            create_order: "/v5/order/create".to_string(),
            set_trading_stop: "/v5/position/trading-stop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    #[default]
    Bybit,
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub source: FeedSource,
    pub base_url: String,
    pub category: String,
    pub symbol: String,
    /// Upstream notation: "1", "5", "60", "D", ...
    pub interval: String,
    pub start_time_ms: i64,
    /// Exclusive
    pub end_time_ms: i64,
    pub page_limit: u32,
    pub requests_per_second: u32,
    /// Synthetic source only
    pub seed: u64,
    /// Synthetic source only
    pub scenario: MarketScenario,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: FeedSource::default(),
            base_url: crate::api::bybit::BYBIT_API_BASE.to_string(),
            category: "linear".to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "1".to_string(),
            start_time_ms: 1_700_000_000_000,
            end_time_ms: 1_700_086_400_000,
            page_limit: 200,
            requests_per_second: 10,
            seed: 42,
            scenario: MarketScenario::default(),
        }
    }
}

impl FeedConfig {
    pub fn kline_interval(&self) -> Result<KlineInterval, String> {
        self.interval.parse()
    }

    pub fn window(&self) -> (i64, i64) {
        (self.start_time_ms, self.end_time_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub tick_interval_ms: u64,
    pub emit_latency_ms: u64,
    pub fee_rate: Decimal,
    /// Stop the server once a replay window has been fully served
    pub exit_on_exhaustion: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 25,
            emit_latency_ms: 3,
            fee_rate: Decimal::ZERO,
            exit_on_exhaustion: false,
        }
    }
}

impl ReplayConfig {
    pub fn settings(&self) -> ReplaySettings {
        ReplaySettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            emit_latency: Duration::from_millis(self.emit_latency_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-lines file; when unset records are only logged
    pub path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("orders.jsonl")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "marketreplay=info".to_string(),
        }
    }
}

/// Configuration errors: unreadable sources or out-of-range values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load defaults, then `path` if given, then `REPLAY__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("REPLAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let feed = &self.feed;
        if feed.end_time_ms <= feed.start_time_ms {
            return Err(ConfigError::Invalid(format!(
                "feed.end_time_ms ({}) must be after feed.start_time_ms ({})",
                feed.end_time_ms, feed.start_time_ms
            )));
        }
        if !(1..=1000).contains(&feed.page_limit) {
            return Err(ConfigError::Invalid(format!(
                "feed.page_limit must be within 1..=1000, got {}",
                feed.page_limit
            )));
        }
        feed.kline_interval().map_err(ConfigError::Invalid)?;

        if self.replay.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("replay.tick_interval_ms must be positive".into()));
        }
        if self.replay.fee_rate.is_sign_negative() {
            return Err(ConfigError::Invalid(format!(
                "replay.fee_rate must not be negative, got {}",
                self.replay.fee_rate
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
