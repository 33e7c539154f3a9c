//! Configuration management for the market engine
//! Supports environment variables (and a `.env` file) with default values

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::fixed::to_ledger_units;
use crate::settlement::EngineSettings;

/// Configuration for the market engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Market configuration
    pub market: MarketConfig,

    /// HTTP server configuration
    pub server: ServerConfig,
}

/// Market-specific configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Liquidity parameter used when a create request omits one (default: 100.0)
    pub default_liquidity: f64,

    /// Payout per winning share (default: 1.0)
    pub redemption_unit: f64,

    /// Largest outcome vector a market may have (default: 64)
    pub max_outcomes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_liquidity: 100.0,
            redemption_unit: 1.0,
            max_outcomes: 64,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        // A missing .env file is normal outside development
        dotenv::dotenv().ok();

        let mut config = Config::default();

        if let Ok(liquidity) = env::var("MARKET_DEFAULT_LIQUIDITY") {
            config.market.default_liquidity = parse_or_warn("MARKET_DEFAULT_LIQUIDITY", &liquidity, config.market.default_liquidity);
        }

        if let Ok(unit) = env::var("MARKET_REDEMPTION_UNIT") {
            config.market.redemption_unit = parse_or_warn("MARKET_REDEMPTION_UNIT", &unit, config.market.redemption_unit);
        }

        if let Ok(max_outcomes) = env::var("MARKET_MAX_OUTCOMES") {
            config.market.max_outcomes = parse_or_warn("MARKET_MAX_OUTCOMES", &max_outcomes, config.market.max_outcomes);
        }

        if let Ok(addr) = env::var("SERVER_BIND_ADDR") {
            config.server.bind_addr = parse_or_warn("SERVER_BIND_ADDR", &addr, config.server.bind_addr);
        }

        // Validate configuration
        config.validate();

        config
    }

    /// Validate configuration values
    fn validate(&mut self) {
        let defaults = MarketConfig::default();

        if !self.market.default_liquidity.is_finite() || self.market.default_liquidity <= 0.0 {
            warn!(value = self.market.default_liquidity, "invalid default_liquidity, using default");
            self.market.default_liquidity = defaults.default_liquidity;
        }

        if !self.market.redemption_unit.is_finite() || self.market.redemption_unit <= 0.0 {
            warn!(value = self.market.redemption_unit, "invalid redemption_unit, using default");
            self.market.redemption_unit = defaults.redemption_unit;
        }

        if self.market.max_outcomes < 2 {
            warn!(value = self.market.max_outcomes, "invalid max_outcomes, using default");
            self.market.max_outcomes = defaults.max_outcomes;
        }
    }

    /// Default liquidity in ledger units
    pub fn default_liquidity_units(&self) -> anyhow::Result<i128> {
        Ok(to_ledger_units(self.market.default_liquidity)?)
    }

    pub fn engine_settings(&self) -> anyhow::Result<EngineSettings> {
        Ok(EngineSettings {
            redemption_unit: to_ledger_units(self.market.redemption_unit)?,
            max_outcomes: self.market.max_outcomes,
        })
    }

    /// Log current configuration
    pub fn log_config(&self) {
        info!(
            default_liquidity = self.market.default_liquidity,
            redemption_unit = self.market.redemption_unit,
            max_outcomes = self.market.max_outcomes,
            bind_addr = %self.server.bind_addr,
            math_version = crate::fixed::MATH_VERSION,
            "market engine configuration"
        );
    }
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, raw: &str, fallback: T) -> T {
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(variable = name, value = raw, "unparseable configuration value, using default");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_convert_to_engine_settings() {
        let config = Config::default();
        let settings = config.engine_settings().unwrap();
        assert_eq!(settings.redemption_unit, 1_000_000);
        assert_eq!(settings.max_outcomes, 64);
        assert_eq!(config.default_liquidity_units().unwrap(), 100_000_000);
    }

    #[test]
    fn validate_restores_bad_values() {
        let mut config = Config::default();
        config.market.default_liquidity = -3.0;
        config.market.redemption_unit = f64::NAN;
        config.market.max_outcomes = 1;
        config.validate();
        assert_eq!(config.market.default_liquidity, 100.0);
        assert_eq!(config.market.redemption_unit, 1.0);
        assert_eq!(config.market.max_outcomes, 64);
    }

    #[test]
    fn parse_falls_back() {
        assert_eq!(parse_or_warn("X", "12", 3usize), 12);
        assert_eq!(parse_or_warn("X", "twelve", 3usize), 3);
    }
}
