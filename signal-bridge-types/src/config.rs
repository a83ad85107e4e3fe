use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A resolved, non-null bundle of per-trade parameters. Derived from either
/// a single global configuration or, in multi-tenant mode, from a per-tenant
/// override falling back field-by-field to the global configuration. All
/// downstream code consumes this type, never the raw config sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTradeConfig {
    pub risk_percent: Decimal,
    pub max_position_usdt: Decimal,
    pub max_daily_loss_usdt: Decimal,
    pub max_dca_per_symbol: i64,
    pub dca_risk_multiplier: Decimal,
    pub fixed_leverage: u32,
    pub allowed_symbols: Vec<String>,
    pub dedup_enabled: bool,
    pub default_symbol: Option<String>,
}

impl EffectiveTradeConfig {
    pub fn allows_symbol(&self, symbol: &str) -> bool {
        self.allowed_symbols.iter().any(|s| s == symbol)
    }
}

/// A raw per-tenant override: every field optional, merged field-by-field
/// onto a global `EffectiveTradeConfig` by the resolver in the server crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeConfigOverride {
    pub risk_percent: Option<Decimal>,
    pub max_position_usdt: Option<Decimal>,
    pub max_daily_loss_usdt: Option<Decimal>,
    pub max_dca_per_symbol: Option<i64>,
    pub dca_risk_multiplier: Option<Decimal>,
    pub fixed_leverage: Option<u32>,
    pub allowed_symbols: Option<Vec<String>>,
    pub dedup_enabled: Option<bool>,
    pub default_symbol: Option<String>,
}

impl TradeConfigOverride {
    /// Merge this override onto `base`, field by field.
    pub fn resolve(&self, base: &EffectiveTradeConfig) -> EffectiveTradeConfig {
        EffectiveTradeConfig {
            risk_percent: self.risk_percent.unwrap_or(base.risk_percent),
            max_position_usdt: self.max_position_usdt.unwrap_or(base.max_position_usdt),
            max_daily_loss_usdt: self
                .max_daily_loss_usdt
                .unwrap_or(base.max_daily_loss_usdt),
            max_dca_per_symbol: self.max_dca_per_symbol.unwrap_or(base.max_dca_per_symbol),
            dca_risk_multiplier: self
                .dca_risk_multiplier
                .unwrap_or(base.dca_risk_multiplier),
            fixed_leverage: self.fixed_leverage.unwrap_or(base.fixed_leverage),
            allowed_symbols: self
                .allowed_symbols
                .clone()
                .unwrap_or_else(|| base.allowed_symbols.clone()),
            dedup_enabled: self.dedup_enabled.unwrap_or(base.dedup_enabled),
            default_symbol: self
                .default_symbol
                .clone()
                .or_else(|| base.default_symbol.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base() -> EffectiveTradeConfig {
        EffectiveTradeConfig {
            risk_percent: dec!(0.02),
            max_position_usdt: dec!(50000),
            max_daily_loss_usdt: dec!(1000),
            max_dca_per_symbol: 3,
            dca_risk_multiplier: dec!(2),
            fixed_leverage: 20,
            allowed_symbols: vec!["BTCUSDT".to_string()],
            dedup_enabled: true,
            default_symbol: None,
        }
    }

    #[test]
    fn override_falls_back_field_by_field() {
        let over = TradeConfigOverride {
            risk_percent: Some(dec!(0.05)),
            ..Default::default()
        };
        let resolved = over.resolve(&base());
        assert_eq!(resolved.risk_percent, dec!(0.05));
        assert_eq!(resolved.max_position_usdt, dec!(50000));
        assert_eq!(resolved.fixed_leverage, 20);
    }

    #[test]
    fn empty_override_equals_base() {
        let resolved = TradeConfigOverride::default().resolve(&base());
        assert_eq!(resolved, base());
    }
}
