use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

/// The persistent record of one logical position owned by one tenant.
/// At most one `Open` Trade may exist per `(tenant_id, symbol)` — enforced
/// by the persistence layer's unique index, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub tenant_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_order_id: Option<String>,
    pub stop_loss: Decimal,
    pub take_profits: Vec<Decimal>,
    /// Client-order-id of the currently-resting stop-loss, if one has been
    /// placed. The reconciler matches incoming stream fills against this
    /// rather than recomputing it, since ids are random per placement.
    pub sl_client_order_id: Option<String>,
    /// Client-order-ids of every currently-resting take-profit order, in
    /// the same order as `take_profits`.
    pub tp_client_order_ids: Vec<String>,
    pub leverage: u32,
    pub risk_amount: Decimal,
    pub entry_commission: Decimal,
    pub signal_hash: Option<String>,
    pub status: TradeStatus,
    pub dca_count: i64,
    pub total_closed_quantity: Decimal,
    pub remaining_quantity: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub exit_quantity: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_order_id: Option<String>,
    pub exit_reason: Option<String>,
    pub gross_profit: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub net_profit: Option<Decimal>,
    pub source_platform: Option<String>,
    pub source_channel: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// Quantity still open right now: `remaining_quantity` once a partial
    /// close has happened, else the full `entry_quantity`.
    pub fn effective_quantity(&self) -> Decimal {
        self.remaining_quantity.unwrap_or(self.entry_quantity)
    }

    /// Fold a new entry leg into the size-weighted average entry price.
    /// `spec.md` §4.1.4: uses `effective_quantity()` as the old quantity so a
    /// DCA after a partial close averages against what is actually still open.
    pub fn apply_dca(
        &mut self,
        new_price: Decimal,
        new_quantity: Decimal,
        new_stop_loss: Decimal,
        risk_contribution: Decimal,
        entry_commission: Decimal,
    ) {
        let old_qty = self.effective_quantity();
        let total_qty = old_qty + new_quantity;
        self.entry_price = (self.entry_price * old_qty + new_price * new_quantity) / total_qty;
        self.entry_quantity = total_qty;
        self.remaining_quantity = None;
        self.total_closed_quantity = Decimal::ZERO;
        self.dca_count += 1;
        self.risk_amount += risk_contribution;
        self.entry_commission += entry_commission;
        self.stop_loss = new_stop_loss;
    }

    /// Record a partial close: quantity stays open, bookkeeping accumulates.
    pub fn apply_partial_close(&mut self, closed_quantity: Decimal, commission: Decimal) {
        let effective = self.effective_quantity();
        self.total_closed_quantity += closed_quantity;
        self.remaining_quantity = Some(effective - closed_quantity);
        self.entry_commission += commission;
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }
}
