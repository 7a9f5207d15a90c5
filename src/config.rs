//! Session configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime};
use serde::Deserialize;

use crate::client::Environment;
use crate::error::{Error, Result};
use crate::executor::RiskLimits;

/// Top-level session configuration, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub auth: AuthConfig,
    pub market: MarketConfig,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// `paper` simulates fills locally; `live` trades real orders.
    #[serde(default)]
    pub mode: Mode,
    /// Exchange environment; `demo` unless explicitly set to `prod`.
    #[serde(default)]
    pub environment: EnvironmentName,
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        serde_json::from_str(&text).map_err(Error::Json)
    }

    pub fn environment(&self) -> Environment {
        match self.environment {
            EnvironmentName::Demo => Environment::Demo,
            EnvironmentName::Prod => Environment::Prod,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    #[default]
    Demo,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub private_key_path: String,
    pub access_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub ticker: String,
    /// Capacity of the mid-price sample window.
    pub volatility_window: usize,
    /// Strike in underlying-asset dollars.
    pub strike: f64,
    /// `HH:MM MM/DD/YYYY`, interpreted at a fixed UTC-5 offset (EST).
    pub expiry_datetime: String,
    /// Seed balance for paper trading.
    #[serde(default)]
    pub starting_balance: f64,
}

impl MarketConfig {
    /// Expiry as POSIX milliseconds.
    pub fn expiry_ms(&self) -> Result<i64> {
        parse_est_datetime(&self.expiry_datetime)
    }
}

/// Parse `HH:MM MM/DD/YYYY` against the fixed EST offset (UTC-5).
fn parse_est_datetime(text: &str) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(text, "%H:%M %m/%d/%Y")
        .map_err(|e| Error::Config(format!("invalid expiry_datetime '{}': {}", text, e)))?;
    let est = FixedOffset::west_opt(5 * 3600).expect("valid offset");
    let local = naive
        .and_local_timezone(est)
        .single()
        .ok_or_else(|| Error::Config(format!("ambiguous expiry_datetime '{}'", text)))?;
    Ok(local.timestamp_millis())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    pub signal_channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub portfolio_limits: PortfolioLimits,
    pub staleness_limits: StalenessLimits,
    pub trading_parameters: TradingParameters,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioLimits {
    pub max_inventory: i64,
    pub max_inventory_dev: i64,
    pub max_balance_dev: f64,
    pub minimum_balance: f64,
    /// Wall-clock session length in seconds before forced close.
    pub terminal_exit_time: f64,
}

impl PortfolioLimits {
    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_inventory: self.max_inventory,
            minimum_balance: self.minimum_balance,
            max_inventory_dev: self.max_inventory_dev,
            max_balance_dev: self.max_balance_dev,
        }
    }

    pub fn terminal_exit(&self) -> Duration {
        Duration::from_secs_f64(self.terminal_exit_time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StalenessLimits {
    /// Seconds between periodic reconciliations.
    pub reconciliation_period: f64,
    /// Maximum seconds since the last applied delta before the book is
    /// considered stale.
    pub maximum_orderbook_staleness: f64,
}

impl StalenessLimits {
    pub fn reconciliation(&self) -> Duration {
        Duration::from_secs_f64(self.reconciliation_period)
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs_f64(self.maximum_orderbook_staleness)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingParameters {
    pub minimum_edge: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log categories to enable at info level; empty enables everything.
    #[serde(default)]
    pub logger_list: Vec<String>,
    /// Whether log lines go to the console.
    #[serde(default = "default_console_outs")]
    pub console_outs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logger_list: Vec::new(),
            console_outs: true,
        }
    }
}

fn default_console_outs() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "auth": {
            "private_key_path": "/keys/kalshi.pem",
            "access_key": "ak-123"
        },
        "market": {
            "ticker": "KXETHD-X",
            "volatility_window": 128,
            "strike": 3500.0,
            "expiry_datetime": "16:00 01/15/2026",
            "starting_balance": 1000.0
        },
        "signal": {
            "signal_channels": ["index.ETHUSD-INDEX"]
        },
        "risk": {
            "portfolio_limits": {
                "max_inventory": 50,
                "max_inventory_dev": 5,
                "max_balance_dev": 25.0,
                "minimum_balance": 100.0,
                "terminal_exit_time": 3600.0
            },
            "staleness_limits": {
                "reconciliation_period": 30.0,
                "maximum_orderbook_staleness": 15.0
            },
            "trading_parameters": {
                "minimum_edge": 0.03
            }
        },
        "logging": {
            "logger_list": ["orders", "fills"],
            "console_outs": true
        },
        "mode": "paper"
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config: SessionConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.market.ticker, "KXETHD-X");
        assert_eq!(config.risk.portfolio_limits.max_inventory, 50);
        assert_eq!(config.risk.trading_parameters.minimum_edge, 0.03);
        assert_eq!(config.mode, Mode::Paper);
        assert_eq!(config.environment(), Environment::Demo);
        assert_eq!(
            config.risk.staleness_limits.reconciliation(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_expiry_parse_est() {
        let config: SessionConfig = serde_json::from_str(SAMPLE).unwrap();
        // 16:00 EST = 21:00 UTC on 2026-01-15
        assert_eq!(config.market.expiry_ms().unwrap(), 1_768_510_800_000);
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        assert!(parse_est_datetime("not a date").is_err());
        assert!(parse_est_datetime("16:00").is_err());
    }

    #[test]
    fn test_mode_defaults_to_paper() {
        let mut value: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        value.as_object_mut().unwrap().remove("mode");
        let config: SessionConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.mode, Mode::Paper);
        assert_eq!(config.environment, EnvironmentName::Demo);
    }

    #[test]
    fn test_risk_limits_conversion() {
        let config: SessionConfig = serde_json::from_str(SAMPLE).unwrap();
        let limits = config.risk.portfolio_limits.risk_limits();
        assert_eq!(limits.max_inventory, 50);
        assert_eq!(limits.minimum_balance, 100.0);
    }
}
