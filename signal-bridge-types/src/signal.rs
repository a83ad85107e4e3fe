use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RejectionReason;

/// What the upstream signal producer wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Entry,
    Dca,
    Close,
    MoveSl,
    Cancel,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn direction(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => -Decimal::ONE,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Provenance of the upstream message, for audit only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalSource {
    pub platform: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub guild_id: Option<String>,
    pub author_name: Option<String>,
    pub message_id: Option<String>,
}

/// The normalized, already-parsed description of what the user wants.
/// Ephemeral: built at intake, consumed by the engine, never persisted
/// as-is (the signal audit record in `error::SignalExecutionStatus` callers
/// is a separate, coarser record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub action: SignalAction,
    pub symbol: String,
    pub side: Option<Side>,
    pub entry_price_low: Option<Decimal>,
    pub entry_price_high: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profits: Vec<Decimal>,
    pub close_ratio: Option<Decimal>,
    pub new_stop_loss: Option<Decimal>,
    pub new_take_profit: Option<Decimal>,
    #[serde(default)]
    pub is_dca: bool,
    pub raw_message: Option<String>,
    pub source: Option<SignalSource>,
}

impl TradeSignal {
    /// The execution reference price: the low end of the entry range.
    pub fn entry_reference(&self) -> Option<Decimal> {
        self.entry_price_low.or(self.entry_price_high)
    }

    /// `closeRatio` defaults to 1 (full close) when absent.
    pub fn close_ratio_or_full(&self) -> Decimal {
        self.close_ratio.unwrap_or(Decimal::ONE)
    }

    pub fn is_partial_close(&self) -> bool {
        self.close_ratio_or_full() < Decimal::ONE
    }

    /// Validates the invariants from `spec.md` §3.1 for ENTRY/DCA and MOVE_SL
    /// signals. CLOSE and CANCEL carry no price invariants at this layer.
    pub fn validate(&self) -> Result<(), RejectionReason> {
        match self.action {
            SignalAction::Entry | SignalAction::Dca => {
                let entry = self
                    .entry_reference()
                    .ok_or(RejectionReason::InvalidSignal("missing entry price"))?;
                let stop_loss = self
                    .stop_loss
                    .ok_or(RejectionReason::InvalidSignal("missing stop loss"))?;
                if stop_loss.is_zero() {
                    return Err(RejectionReason::InvalidSignal("stop loss is zero"));
                }
                if let Some(side) = self.side {
                    let valid = match side {
                        Side::Long => stop_loss < entry,
                        Side::Short => stop_loss > entry,
                    };
                    if !valid {
                        return Err(RejectionReason::InvalidSignal(
                            "stop loss on wrong side of entry",
                        ));
                    }
                }
                Ok(())
            }
            SignalAction::MoveSl => {
                if self.new_stop_loss.is_none() && self.new_take_profit.is_none() {
                    return Err(RejectionReason::InvalidSignal(
                        "MOVE_SL requires new_stop_loss or new_take_profit",
                    ));
                }
                Ok(())
            }
            SignalAction::Close | SignalAction::Cancel | SignalAction::Info => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_signal() -> TradeSignal {
        TradeSignal {
            action: SignalAction::Entry,
            symbol: "BTCUSDT".to_string(),
            side: Some(Side::Long),
            entry_price_low: Some(dec!(95000)),
            entry_price_high: None,
            stop_loss: Some(dec!(94000)),
            take_profits: vec![dec!(97000)],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        }
    }

    #[test]
    fn valid_long_entry_passes() {
        assert!(base_signal().validate().is_ok());
    }

    #[test]
    fn stop_loss_above_entry_rejected_for_long() {
        let mut s = base_signal();
        s.stop_loss = Some(dec!(96000));
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_stop_loss_rejected() {
        let mut s = base_signal();
        s.stop_loss = Some(Decimal::ZERO);
        assert!(s.validate().is_err());
    }

    #[test]
    fn move_sl_requires_a_target() {
        let mut s = base_signal();
        s.action = SignalAction::MoveSl;
        s.new_stop_loss = None;
        s.new_take_profit = None;
        assert!(s.validate().is_err());
    }

    #[test]
    fn close_ratio_defaults_to_full() {
        let s = base_signal();
        assert_eq!(s.close_ratio_or_full(), Decimal::ONE);
        assert!(!s.is_partial_close());
    }
}
