//! Engine configuration
//!
//! Loaded from a TOML file; every section has defaults so a missing file is
//! not fatal for the library surface, only for the binary when it insists
//! on one.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Core engine settings
    pub engine: CoreConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Rolling-history defaults
    pub history: HistoryConfig,
    /// Exchanges to connect
    pub exchanges: Vec<ExchangeEntry>,
}

/// Core engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Balance polling interval in seconds; zero disables balance polling
    pub balance_refresh_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            balance_refresh_secs: 10,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter, e.g. `info` or `strategy_engine=debug`
    pub level: String,
    /// Log file path
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "logs/strategy-engine.log".to_string(),
        }
    }
}

/// Rolling-history defaults used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Window capacity in samples
    pub window: usize,
    /// Historian gating interval in seconds; zero records every event
    pub interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: 64,
            interval_secs: 60,
        }
    }
}

/// One exchange to connect at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeEntry {
    /// Exchange name, unique across the config
    pub name: String,
    /// Whether websocket streaming is enabled
    #[serde(default = "default_true")]
    pub websocket_enabled: bool,
    /// Markets the exchange quotes, with seed prices
    #[serde(default)]
    pub markets: Vec<MarketSeed>,
}

/// A market and its seed price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSeed {
    /// Base currency code
    pub base: String,
    /// Quote currency code
    pub quote: String,
    /// Seed last-trade price
    pub price: f64,
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    /// Load the configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            EngineError::Config(format!(
                "cannot read {}: {err}",
                path.as_ref().display()
            ))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.history.window == 0 {
            return Err(EngineError::Config("history.window must be non-zero".to_string()).into());
        }
        let mut seen = std::collections::HashSet::new();
        for exchange in &self.exchanges {
            if exchange.name.trim().is_empty() {
                return Err(
                    EngineError::Config("exchange name cannot be empty".to_string()).into(),
                );
            }
            if !seen.insert(exchange.name.to_lowercase()) {
                return Err(EngineError::Config(format!(
                    "duplicate exchange name: {}",
                    exchange.name
                ))
                .into());
            }
            for market in &exchange.markets {
                if market.price <= 0.0 {
                    return Err(EngineError::Config(format!(
                        "seed price for {}-{} must be positive",
                        market.base, market.quote
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// The balance polling interval, if polling is enabled
    pub fn balance_refresh(&self) -> Option<Duration> {
        if self.engine.balance_refresh_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.engine.balance_refresh_secs))
        }
    }

    /// The historian gating interval
    pub fn history_interval(&self) -> Duration {
        Duration::from_secs(self.history.interval_secs)
    }
}
