use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use signal_bridge_types::EffectiveTradeConfig;

use crate::config_resolver::TenantOverrideConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: RunMode,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub exchange: ExchangeConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tenants: Vec<TenantOverrideConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Single,
    MultiTenant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

fn default_recv_window_ms() -> u64 {
    5_000
}

/// The global `EffectiveTradeConfig` read straight from config.toml. In
/// single-account mode it is used as-is; in multi-tenant mode it is the
/// fallback every per-tenant override resolves against
/// (`crate::config_resolver`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub risk_percent: rust_decimal::Decimal,
    pub max_position_usdt: rust_decimal::Decimal,
    pub max_daily_loss_usdt: rust_decimal::Decimal,
    pub max_dca_per_symbol: i64,
    pub dca_risk_multiplier: rust_decimal::Decimal,
    pub fixed_leverage: u32,
    pub allowed_symbols: Vec<String>,
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,
    pub default_symbol: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<RiskConfig> for EffectiveTradeConfig {
    fn from(r: RiskConfig) -> Self {
        EffectiveTradeConfig {
            risk_percent: r.risk_percent,
            max_position_usdt: r.max_position_usdt,
            max_daily_loss_usdt: r.max_daily_loss_usdt,
            max_dca_per_symbol: r.max_dca_per_symbol,
            dca_risk_multiplier: r.dca_risk_multiplier,
            fixed_leverage: r.fixed_leverage,
            allowed_symbols: r.allowed_symbols,
            dedup_enabled: r.dedup_enabled,
            default_symbol: r.default_symbol,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            directory: default_log_directory(),
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&raw).with_context(|| "parsing config.toml")?;

        // Secrets may be overridden from the environment rather than committed
        // to config.toml, matching the teacher's DATABASE_URL override pattern
        // in `bootstrap::services::setup`.
        if let Ok(key) = std::env::var("EXCHANGE_API_KEY") {
            config.exchange.api_key = key;
        }
        if let Ok(secret) = std::env::var("EXCHANGE_API_SECRET") {
            config.exchange.api_secret = secret;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_single_tenant_config() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [database]
            url = "sqlite::memory:"

            [exchange]
            rest_base_url = "https://fapi.example.com"
            ws_base_url = "wss://fstream.example.com/ws"

            [risk]
            risk_percent = "0.02"
            max_position_usdt = "50000"
            max_daily_loss_usdt = "1000"
            max_dca_per_symbol = 3
            dca_risk_multiplier = "2"
            fixed_leverage = 20
            allowed_symbols = ["BTCUSDT"]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mode, RunMode::Single);
        assert_eq!(config.server.port, 9000);
        assert!(config.logging.enabled);
    }
}
