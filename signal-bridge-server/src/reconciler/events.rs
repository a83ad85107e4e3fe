//! Pure classification of one `OrderTradeUpdate` against the Trade it
//! belongs to (`spec.md` §4.2.2, §6.3). No I/O: `mod.rs` calls these and
//! then performs the actual exchange/persistence writes.

use rust_decimal::Decimal;

use signal_bridge_types::{calc::{compute_pnl, PnlInput}, Trade, TradeEventType};

use crate::exchange::types::{OrderStatus, OrderTradeUpdate};

/// What the reconciler should do in response to one stream update.
#[derive(Debug, PartialEq)]
pub enum Reaction {
    /// The update doesn't concern an order this bridge is tracking.
    Ignore,
    /// A protective order fully filled: the position is flat, close the
    /// Trade using the venue's own fill price and commission.
    StreamClose {
        exit_price: Decimal,
        exit_quantity: Decimal,
        commission: Decimal,
        realized_profit: Decimal,
        was_stop_loss: bool,
    },
    /// A protective order partially filled: reduce the open quantity but
    /// leave the Trade open.
    StreamPartialClose {
        filled_quantity: Decimal,
        commission: Decimal,
    },
    /// A protective order was cancelled or expired outside of this
    /// bridge's own cancel calls — the position is now missing its cover.
    ProtectionLost { was_stop_loss: bool },
}

/// Classify `update` against `trade`'s known protective orders, matched by
/// client-order-id rather than the venue's numeric order id — ids are
/// randomly generated per placement (`spec.md` §6.2), so only the id this
/// bridge itself handed the exchange when placing the order can identify
/// it on the way back. `spec.md` §6.3: only `ORDER_TRADE_UPDATE` events for
/// an order this bridge placed as SL/TP are actionable.
pub fn classify(trade: &Trade, update: &OrderTradeUpdate, sl_client_order_id: Option<&str>, tp_client_order_ids: &[String]) -> Reaction {
    let is_sl = sl_client_order_id == Some(update.client_order_id.as_str());
    let is_tp = tp_client_order_ids.iter().any(|id| id == &update.client_order_id);

    if !is_sl && !is_tp {
        return Reaction::Ignore;
    }

    match update.status {
        OrderStatus::Filled => Reaction::StreamClose {
            exit_price: update.avg_price,
            exit_quantity: update.filled_quantity,
            commission: update.commission,
            realized_profit: update.realized_profit,
            was_stop_loss: is_sl,
        },
        OrderStatus::PartiallyFilled => Reaction::StreamPartialClose {
            filled_quantity: update.filled_quantity,
            commission: update.commission,
        },
        OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected => {
            Reaction::ProtectionLost { was_stop_loss: is_sl }
        }
        OrderStatus::New => Reaction::Ignore,
    }
}

/// Apply a `StreamClose` reaction's numbers onto `trade`, mutating it into
/// its closed state. Uses the trade's `effective_quantity` at the time of
/// the stream event as the close quantity when the venue's own report
/// looks inconsistent (defensive against a stale `orig_quantity`).
pub fn apply_stream_close(
    trade: &mut Trade,
    exit_price: Decimal,
    exit_quantity: Decimal,
    commission: Decimal,
    was_stop_loss: bool,
) {
    let pnl = compute_pnl(PnlInput {
        side: trade.side,
        entry_price: trade.entry_price,
        exit_price,
        quantity: exit_quantity,
        entry_commission: trade.entry_commission,
        exit_commission: Some(commission),
    });
    trade.status = signal_bridge_types::TradeStatus::Closed;
    trade.exit_price = Some(exit_price);
    trade.exit_quantity = Some(exit_quantity);
    trade.exit_time = Some(chrono::Utc::now());
    trade.exit_reason = Some(if was_stop_loss { "stop_loss".to_string() } else { "take_profit".to_string() });
    trade.gross_profit = Some(pnl.gross_profit);
    trade.commission = Some(pnl.commission);
    trade.net_profit = Some(pnl.net_profit);
    trade.updated_at = chrono::Utc::now();
}

pub fn stream_close_event_type() -> TradeEventType {
    TradeEventType::StreamClose
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use signal_bridge_types::{Side, TradeStatus};

    fn sample_trade() -> Trade {
        Trade {
            trade_id: "t1".to_string(),
            tenant_id: "default".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: dec!(95000),
            entry_quantity: dec!(0.2),
            entry_time: Utc::now(),
            entry_order_id: Some("1".to_string()),
            stop_loss: dec!(94000),
            take_profits: vec![dec!(97000)],
            sl_client_order_id: Some("SL-1-0001".to_string()),
            tp_client_order_ids: vec!["TP-1-0001".to_string()],
            leverage: 20,
            risk_amount: dec!(200),
            entry_commission: dec!(5),
            signal_hash: None,
            status: TradeStatus::Open,
            dca_count: 0,
            total_closed_quantity: Decimal::ZERO,
            remaining_quantity: None,
            exit_price: None,
            exit_quantity: None,
            exit_time: None,
            exit_order_id: None,
            exit_reason: None,
            gross_profit: None,
            commission: None,
            net_profit: None,
            source_platform: None,
            source_channel: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn update(client_order_id: &str, status: OrderStatus) -> OrderTradeUpdate {
        OrderTradeUpdate {
            symbol: "BTCUSDT".to_string(),
            order_id: "900001".to_string(),
            client_order_id: client_order_id.to_string(),
            order_type: crate::exchange::types::OrderType::StopMarket,
            side: crate::exchange::types::OrderSide::Sell,
            status,
            avg_price: dec!(94000),
            filled_quantity: dec!(0.2),
            orig_quantity: dec!(0.2),
            commission: dec!(3.76),
            commission_asset: "USDT".to_string(),
            realized_profit: dec!(-200),
            transaction_time: Utc::now(),
        }
    }

    #[test]
    fn unknown_client_order_id_is_ignored() {
        let trade = sample_trade();
        let u = update("SL-999-dead", OrderStatus::Filled);
        assert_eq!(classify(&trade, &u, Some("SL-1-0001"), &[]), Reaction::Ignore);
    }

    #[test]
    fn stop_loss_fill_is_stream_close() {
        let trade = sample_trade();
        let u = update("SL-1-0001", OrderStatus::Filled);
        let reaction = classify(&trade, &u, Some("SL-1-0001"), &[]);
        assert!(matches!(reaction, Reaction::StreamClose { was_stop_loss: true, .. }));
    }

    #[test]
    fn take_profit_partial_fill_keeps_trade_open() {
        let trade = sample_trade();
        let u = update("TP-1-0001", OrderStatus::PartiallyFilled);
        let reaction = classify(&trade, &u, Some("SL-1-0001"), &["TP-1-0001".to_string()]);
        assert!(matches!(reaction, Reaction::StreamPartialClose { .. }));
    }

    #[test]
    fn cancelled_stop_loss_is_protection_lost() {
        let trade = sample_trade();
        let u = update("SL-1-0001", OrderStatus::Canceled);
        let reaction = classify(&trade, &u, Some("SL-1-0001"), &[]);
        assert_eq!(reaction, Reaction::ProtectionLost { was_stop_loss: true });
    }
}
