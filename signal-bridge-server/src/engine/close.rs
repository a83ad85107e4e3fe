use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::error;

use signal_bridge_types::{
    calc::{compute_pnl, PnlInput},
    OrderResult, TradeEventType, TradeSignal,
};

use crate::error::EngineError;
use crate::exchange::types::{OrderSide, OrderType};
use crate::ports::ExchangePort;
use crate::tenant::TenantCtx;

use super::{new_event, protective, ExecutionEngine};

/// The close limit is offset 0.1% from mark, away from the position (below
/// mark for a LONG close, above for a SHORT close) so it fills promptly
/// without crossing the book for free (`spec.md` §4.1.5 step 5).
const CLOSE_OFFSET: Decimal = dec!(0.001);

/// CLOSE (`spec.md` §4.1.5): full or partial close depending on
/// `close_ratio`. A partial close snapshots the resting SL/TP prices before
/// cancelling so they can be re-placed for the remaining quantity.
pub(super) async fn execute_close(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    signal: &TradeSignal,
) -> Result<(Vec<OrderResult>, Option<String>), EngineError> {
    let mut trade = engine.resolve_open_trade(ctx, &signal.symbol).await?;

    let ratio = signal.close_ratio_or_full();
    let effective = trade.effective_quantity();
    let close_quantity = (effective * ratio).min(effective);
    let is_partial = ratio < Decimal::ONE;

    let close_side = OrderSide::for_entry(trade.side).opposite();

    let open_orders = engine.exchange.get_open_orders(ctx, &trade.symbol).await?;
    let sl_snapshot = open_orders
        .iter()
        .find(|o| o.order_type == OrderType::StopMarket)
        .map(|o| o.price);
    let tp_snapshot = open_orders
        .iter()
        .find(|o| o.order_type == OrderType::TakeProfitMarket)
        .map(|o| o.price);

    engine.exchange.cancel_all_orders(ctx, &trade.symbol).await.ok();

    let mark = engine.exchange.get_mark_price(&trade.symbol).await?;
    let close_price = match close_side {
        OrderSide::Sell => mark * (Decimal::ONE - CLOSE_OFFSET),
        OrderSide::Buy => mark * (Decimal::ONE + CLOSE_OFFSET),
    };

    let mut results = Vec::new();

    let placed = engine
        .exchange
        .place_limit(ctx, &trade.symbol, close_side, close_price, close_quantity)
        .await;

    let placed = match placed {
        Ok(p) => p,
        Err(e) => {
            results.push(OrderResult::failed("LIMIT", e.to_string()));
            return Ok((results, Some(trade.trade_id)));
        }
    };

    let exit_price = placed.avg_price.unwrap_or(close_price);

    results.push(
        OrderResult::ok("LIMIT", format!("{close_side:?}"))
            .price(exit_price)
            .quantity(close_quantity)
            .exchange_order_id(placed.order_id.clone())
            .build(),
    );

    let pnl = compute_pnl(PnlInput {
        side: trade.side,
        entry_price: trade.entry_price,
        exit_price,
        quantity: close_quantity,
        entry_commission: trade.entry_commission,
        exit_commission: None,
    });

    let exit_order_id = placed.order_id.clone();
    let mut events = vec![new_event(
        &trade.trade_id,
        if is_partial { TradeEventType::PartialClose } else { TradeEventType::ClosePlaced },
    )
    .with_order(Some(placed.order_id), format!("{close_side:?}"), "LIMIT", exit_price, close_quantity)];

    let store_result = if is_partial {
        trade.apply_partial_close(close_quantity, pnl.commission);
        trade.updated_at = chrono::Utc::now();

        // Re-place protective orders for the remaining quantity, priority
        // per `spec.md` §4.1.5 step 7: explicit new target → pre-cancel
        // snapshot → (for SL only) entry-price cost protection → none.
        trade.stop_loss = signal.new_stop_loss.or(sl_snapshot).unwrap_or(trade.entry_price);
        trade.take_profits = signal.new_take_profit.or(tp_snapshot).into_iter().collect();

        let protective = protective::place_protective_orders(engine, ctx, &trade).await;
        protective.apply_ids(&mut trade);
        let (protective_results, protective_events) = protective.into_results_and_events();
        results.extend(protective_results);
        events.extend(protective_events);

        engine.store.record_partial_close(&trade, &events).await
    } else {
        trade.status = signal_bridge_types::TradeStatus::Closed;
        trade.exit_price = Some(exit_price);
        trade.exit_quantity = Some(close_quantity);
        trade.exit_time = Some(chrono::Utc::now());
        trade.exit_order_id = Some(exit_order_id);
        trade.exit_reason = Some("signal".to_string());
        trade.gross_profit = Some(pnl.gross_profit);
        trade.commission = Some(pnl.commission);
        trade.net_profit = Some(pnl.net_profit);
        trade.updated_at = chrono::Utc::now();

        engine.store.record_close(&trade, &events).await
    };

    if let Err(e) = store_result {
        error!(error = %e, trade_id = %trade.trade_id, "failed to persist close");
    }

    Ok((results, Some(trade.trade_id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use signal_bridge_types::{EffectiveTradeConfig, SignalAction, TradeSignal};

    use crate::dedup::DedupCache;
    use crate::exchange::types::PlacedOrder;
    use crate::locks::SymbolLockRegistry;
    use crate::ports::{MockExchangePort, MockNotificationSink, MockTradeStore};
    use crate::tenant::{ExchangeCredentials, TenantCtx};

    use super::super::tests_support::sample_open_trade;
    use super::super::ExecutionEngine;

    fn ctx() -> TenantCtx {
        TenantCtx {
            tenant_id: None,
            credentials: ExchangeCredentials { api_key: "k".into(), api_secret: "s".into() },
            config: EffectiveTradeConfig {
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
        }
    }

    fn close_signal(ratio: Decimal) -> TradeSignal {
        TradeSignal {
            action: SignalAction::Close,
            symbol: "BTCUSDT".to_string(),
            side: None,
            entry_price_low: None,
            entry_price_high: None,
            stop_loss: None,
            take_profits: vec![],
            close_ratio: Some(ratio),
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        }
    }

    fn placed(order_id: &str, avg_price: Decimal) -> PlacedOrder {
        PlacedOrder {
            order_id: order_id.to_string(),
            client_order_id: None,
            avg_price: Some(avg_price),
            filled_quantity: None,
        }
    }

    /// S5: a partial close re-places SL/TP for the remaining quantity and
    /// persists fresh client-order-ids rather than leaving the position bare.
    #[tokio::test]
    async fn partial_close_re_places_protective_orders_for_remainder() {
        let trade = sample_open_trade();

        let mut exchange = MockExchangePort::new();
        exchange.expect_get_open_orders().returning(|_, _| Ok(vec![]));
        exchange.expect_cancel_all_orders().returning(|_, _| Ok(()));
        exchange.expect_get_mark_price().returning(|_| Ok(dec!(96000)));
        exchange.expect_place_limit().returning(|_, _, _, _, _| Ok(placed("close-1", dec!(96000))));
        exchange.expect_place_stop_market().returning(|_, _, _, _, _, _| Ok(placed("sl-2", dec!(94000))));
        exchange.expect_place_take_profit_market().returning(|_, _, _, _, _, _| Ok(placed("tp-2", dec!(97000))));

        let mut store = MockTradeStore::new();
        store.expect_find_open_trade().returning(move |_, _| Ok(Some(trade.clone())));
        store.expect_record_partial_close().returning(|_, _| Ok(()));

        let engine = ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let (results, trade_id) = super::execute_close(&engine, &ctx(), &close_signal(dec!(0.5))).await.unwrap();
        assert!(trade_id.is_some());
        assert!(results.iter().all(|r| r.success));
        // LIMIT close + re-placed SL + re-placed TP
        assert_eq!(results.len(), 3);
    }
}
