use serde::{Deserialize, Serialize};

use signal_bridge_types::{EffectiveTradeConfig, TradeConfigOverride};

use crate::config::{Config, RunMode};
use crate::tenant::{ExchangeCredentials, Tenant, TenantRegistry};

/// A single tenant's row in `config.toml`'s `[[tenants]]` array: its
/// credentials and whatever per-trade parameters it overrides. Fields left
/// absent fall back field-by-field to `[risk]` (`spec.md` §3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantOverrideConfig {
    pub tenant_id: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_trade_enabled: bool,
    #[serde(flatten)]
    pub overrides: TradeConfigOverride,
}

fn default_true() -> bool {
    true
}

/// Build the runtime `TenantRegistry` from a loaded `Config`. In `Single`
/// mode, synthesizes one tenant (`"default"`) directly from `[exchange]` +
/// `[risk]`, ignoring any `[[tenants]]` entries. In `MultiTenant` mode,
/// every `[[tenants]]` row is resolved against `[risk]` as the global base.
pub fn build_tenant_registry(config: &Config) -> TenantRegistry {
    let global: EffectiveTradeConfig = config.risk.clone().into();

    let tenants = match config.mode {
        RunMode::Single => vec![Tenant {
            tenant_id: "default".to_string(),
            credentials: ExchangeCredentials {
                api_key: config.exchange.api_key.clone(),
                api_secret: config.exchange.api_secret.clone(),
            },
            config: global,
            enabled: true,
            auto_trade_enabled: true,
        }],
        RunMode::MultiTenant => config
            .tenants
            .iter()
            .map(|t| Tenant {
                tenant_id: t.tenant_id.clone(),
                credentials: ExchangeCredentials {
                    api_key: t.api_key.clone(),
                    api_secret: t.api_secret.clone(),
                },
                config: t.overrides.resolve(&global),
                enabled: t.enabled,
                auto_trade_enabled: t.auto_trade_enabled,
            })
            .collect(),
    };

    TenantRegistry::new(tenants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ExchangeConfig, LoggingConfig, RiskConfig, ServerConfig};
    use rust_decimal_macros::dec;

    fn base_config(mode: RunMode) -> Config {
        Config {
            mode,
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            exchange: ExchangeConfig {
                rest_base_url: "https://fapi.example.com".to_string(),
                ws_base_url: "wss://fstream.example.com/ws".to_string(),
                recv_window_ms: 5000,
                api_key: "global-key".to_string(),
                api_secret: "global-secret".to_string(),
            },
            risk: RiskConfig {
                risk_percent: dec!(0.02),
                max_position_usdt: dec!(50000),
                max_daily_loss_usdt: dec!(1000),
                max_dca_per_symbol: 3,
                dca_risk_multiplier: dec!(2),
                fixed_leverage: 20,
                allowed_symbols: vec!["BTCUSDT".to_string()],
                dedup_enabled: true,
                default_symbol: None,
            },
            logging: LoggingConfig::default(),
            tenants: vec![],
        }
    }

    #[test]
    fn single_mode_synthesizes_one_default_tenant() {
        let registry = build_tenant_registry(&base_config(RunMode::Single));
        let tenants = registry.all();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].tenant_id, "default");
        assert_eq!(tenants[0].config.fixed_leverage, 20);
    }

    #[test]
    fn multi_tenant_mode_resolves_each_override() {
        let mut config = base_config(RunMode::MultiTenant);
        config.tenants.push(TenantOverrideConfig {
            tenant_id: "acct-a".to_string(),
            api_key: "a-key".to_string(),
            api_secret: "a-secret".to_string(),
            enabled: true,
            auto_trade_enabled: true,
            overrides: TradeConfigOverride {
                risk_percent: Some(dec!(0.05)),
                ..Default::default()
            },
        });
        let registry = build_tenant_registry(&config);
        let tenant = registry.get("acct-a").unwrap();
        assert_eq!(tenant.config.risk_percent, dec!(0.05));
        assert_eq!(tenant.config.fixed_leverage, 20);
    }

    #[test]
    fn disabled_tenant_is_not_fanout_eligible() {
        let mut config = base_config(RunMode::MultiTenant);
        config.tenants.push(TenantOverrideConfig {
            tenant_id: "acct-b".to_string(),
            api_key: "b-key".to_string(),
            api_secret: "b-secret".to_string(),
            enabled: false,
            auto_trade_enabled: true,
            overrides: TradeConfigOverride::default(),
        });
        let registry = build_tenant_registry(&config);
        assert!(registry.eligible().is_empty());
    }
}
