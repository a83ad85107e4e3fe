//! Pure position-sizing and P&L math (`spec.md` §4.1.2, §4.1.7). No I/O;
//! the engine supplies balance/mark/leverage and records the result.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::signal::Side;

/// Taker commission rate used to estimate an exit commission when the
/// exchange-reported value is unavailable or denominated in a non-quote
/// asset (`spec.md` §4.1.7, §4.2.2).
pub const ESTIMATED_TAKER_RATE: Decimal = dec!(0.0004);

/// Minimum notional (USDT) below which an order is rejected as too small.
pub const MINIMUM_NOTIONAL_USDT: Decimal = dec!(5);

/// Fraction of balance the engine will commit as margin at most.
pub const MAX_MARGIN_UTILIZATION: Decimal = dec!(0.90);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInput {
    pub balance: Decimal,
    pub risk_percent: Decimal,
    pub is_dca: bool,
    pub dca_risk_multiplier: Decimal,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub max_position_usdt: Decimal,
    pub leverage: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingOutput {
    pub quantity: Decimal,
    pub risk_amount: Decimal,
}

/// Risk-based position sizing with the three hard caps from `spec.md`
/// §4.1.2, applied in order: notional cap, margin-utilization cap, then the
/// minimum-notional floor. Returns `None` when the resulting order would be
/// below the minimum notional.
pub fn size_position(input: SizingInput) -> Option<SizingOutput> {
    let risk_multiplier = if input.is_dca {
        input.dca_risk_multiplier
    } else {
        Decimal::ONE
    };
    let risk_amount = input.balance * input.risk_percent * risk_multiplier;
    let risk_distance = (input.entry - input.stop_loss).abs();
    if risk_distance.is_zero() {
        return None;
    }
    let mut quantity = risk_amount / risk_distance;

    if input.max_position_usdt > Decimal::ZERO {
        let notional = input.entry * quantity;
        if notional > input.max_position_usdt {
            quantity = input.max_position_usdt / input.entry;
        }
    }

    let required_margin = input.entry * quantity / input.leverage;
    let margin_cap = input.balance * MAX_MARGIN_UTILIZATION;
    if required_margin > margin_cap {
        quantity = margin_cap * input.leverage / input.entry;
    }

    if input.entry * quantity < MINIMUM_NOTIONAL_USDT {
        return None;
    }

    Some(SizingOutput {
        quantity,
        risk_amount,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlInput {
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub entry_commission: Decimal,
    /// Exchange-reported exit commission; falls back to
    /// `ESTIMATED_TAKER_RATE` when absent.
    pub exit_commission: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlOutput {
    pub gross_profit: Decimal,
    pub commission: Decimal,
    pub net_profit: Decimal,
}

/// `spec.md` §4.1.7: direction law, commission conservation, 2-decimal
/// rounding for storage.
pub fn compute_pnl(input: PnlInput) -> PnlOutput {
    let direction = input.side.direction();
    let gross_profit = (input.exit_price - input.entry_price) * input.quantity * direction;
    let exit_commission = input
        .exit_commission
        .unwrap_or_else(|| input.exit_price * input.quantity * ESTIMATED_TAKER_RATE);
    let commission = input.entry_commission + exit_commission;
    let net_profit = gross_profit - commission;

    PnlOutput {
        gross_profit: gross_profit.round_dp(2),
        commission: commission.round_dp(2),
        net_profit: net_profit.round_dp(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_entry_happy_path_sizing() {
        let out = size_position(SizingInput {
            balance: dec!(10000),
            risk_percent: dec!(0.02),
            is_dca: false,
            dca_risk_multiplier: dec!(2),
            entry: dec!(95000),
            stop_loss: dec!(94000),
            max_position_usdt: dec!(50000),
            leverage: dec!(20),
        })
        .unwrap();
        assert_eq!(out.quantity, dec!(0.2));
        assert_eq!(out.risk_amount, dec!(200));
    }

    #[test]
    fn s4_dca_sizing_uses_risk_multiplier() {
        let out = size_position(SizingInput {
            balance: dec!(10000),
            risk_percent: dec!(0.02),
            is_dca: true,
            dca_risk_multiplier: dec!(2),
            entry: dec!(93000),
            stop_loss: dec!(92000),
            max_position_usdt: dec!(50000),
            leverage: dec!(20),
        })
        .unwrap();
        assert_eq!(out.quantity, dec!(0.4));
    }

    #[test]
    fn notional_cap_applies() {
        let out = size_position(SizingInput {
            balance: dec!(1_000_000),
            risk_percent: dec!(0.5),
            is_dca: false,
            dca_risk_multiplier: dec!(1),
            entry: dec!(100),
            stop_loss: dec!(90),
            max_position_usdt: dec!(1000),
            leverage: dec!(20),
        })
        .unwrap();
        // notional cap: 1000 / 100 = 10
        assert_eq!(out.quantity, dec!(10));
    }

    #[test]
    fn below_minimum_notional_rejected() {
        let out = size_position(SizingInput {
            balance: dec!(10),
            risk_percent: dec!(0.001),
            is_dca: false,
            dca_risk_multiplier: dec!(1),
            entry: dec!(95000),
            stop_loss: dec!(94000),
            max_position_usdt: dec!(50000),
            leverage: dec!(20),
        });
        assert!(out.is_none());
    }

    #[test]
    fn long_gross_profit_direction() {
        let out = compute_pnl(PnlInput {
            side: Side::Long,
            entry_price: dec!(95000),
            exit_price: dec!(96000),
            quantity: dec!(0.2),
            entry_commission: dec!(5),
            exit_commission: Some(dec!(5)),
        });
        assert_eq!(out.gross_profit, dec!(200));
        assert_eq!(out.commission, dec!(10));
        assert_eq!(out.net_profit, dec!(190));
    }

    #[test]
    fn short_gross_profit_direction_is_inverted() {
        let out = compute_pnl(PnlInput {
            side: Side::Short,
            entry_price: dec!(95000),
            exit_price: dec!(96000),
            quantity: dec!(0.2),
            entry_commission: dec!(5),
            exit_commission: Some(dec!(5)),
        });
        assert_eq!(out.gross_profit, dec!(-200));
    }

    #[test]
    fn missing_exit_commission_is_estimated() {
        let out = compute_pnl(PnlInput {
            side: Side::Long,
            entry_price: dec!(95000),
            exit_price: dec!(96000),
            quantity: dec!(0.2),
            entry_commission: dec!(5),
            exit_commission: None,
        });
        // 96000 * 0.2 * 0.0004 = 7.68
        assert_eq!(out.commission, dec!(12.68));
    }
}
