use rust_decimal::Decimal;
use tracing::error;

use signal_bridge_types::{
    calc::{size_position, SizingInput},
    OrderResult, RejectionReason, SignalAction, TradeEventType, TradeSignal,
};

use crate::error::EngineError;
use crate::exchange::types::OrderSide;
use crate::ports::ExchangePort;
use crate::tenant::TenantCtx;

use super::{new_event, new_trade, protective, ExecutionEngine};

/// ENTRY and DCA share the same pipeline up through sizing and order
/// placement; they diverge only in what they do with the resulting Trade
/// row (`spec.md` §4.1.1, §4.1.4).
pub(super) async fn execute(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    signal: &TradeSignal,
    hash: &str,
) -> Result<(Vec<signal_bridge_types::OrderResult>, Option<String>), EngineError> {
    engine.pre_trade_checks(ctx, &signal.symbol).await?;

    let existing = engine
        .store
        .find_open_trade(ctx.scope(), &signal.symbol)
        .await
        .map_err(|e| EngineError::Critical(e.to_string()))?;

    let is_dca = signal.action == SignalAction::Dca || signal.is_dca;

    match (&existing, is_dca) {
        (Some(_), false) => {
            return Err(RejectionReason::PositionAlreadyOpen(signal.symbol.clone()).into())
        }
        (None, true) => {
            return Err(RejectionReason::NoOpenTrade(signal.symbol.clone()).into())
        }
        (Some(trade), true) => {
            if let Some(signal_side) = signal.side {
                if signal_side != trade.side {
                    return Err(RejectionReason::DcaSideMismatch {
                        signal_side: Some(signal_side),
                        position_side: trade.side,
                    }
                    .into());
                }
            }
            if trade.dca_count >= ctx.config.max_dca_per_symbol {
                return Err(RejectionReason::DcaCapReached {
                    symbol: signal.symbol.clone(),
                    count: trade.dca_count,
                    max: ctx.config.max_dca_per_symbol,
                }
                .into());
            }
        }
        (None, false) => {}
    }

    let open_orders = engine
        .exchange
        .get_open_orders(ctx, &signal.symbol)
        .await?;
    if open_orders
        .iter()
        .any(|o| o.order_type == crate::exchange::types::OrderType::Limit)
    {
        return Err(RejectionReason::OpenEntryOrderExists(signal.symbol.clone()).into());
    }

    let side = signal
        .side
        .or_else(|| existing.as_ref().map(|t| t.side))
        .ok_or_else(|| RejectionReason::InvalidSignal("missing side for entry"))?;
    let entry_price = signal
        .entry_reference()
        .ok_or_else(|| RejectionReason::InvalidSignal("missing entry price"))?;
    let stop_loss = signal
        .stop_loss
        .ok_or_else(|| RejectionReason::InvalidSignal("missing stop loss"))?;

    let balance = engine.exchange.get_balance(ctx).await?;
    let symbol_info = engine.exchange.get_symbol_info(&signal.symbol).await?;

    let sizing = size_position(SizingInput {
        balance,
        risk_percent: ctx.config.risk_percent,
        is_dca,
        dca_risk_multiplier: ctx.config.dca_risk_multiplier,
        entry: entry_price,
        stop_loss,
        max_position_usdt: ctx.config.max_position_usdt,
        leverage: Decimal::from(ctx.config.fixed_leverage),
    })
    .ok_or(RejectionReason::BelowMinimumNotional)?;

    let quantity = symbol_info.round_quantity(sizing.quantity);
    let price = symbol_info.round_price(entry_price);

    if !is_dca {
        engine
            .exchange
            .set_isolated_margin(ctx, &signal.symbol)
            .await
            .ok();
        engine
            .exchange
            .set_leverage(ctx, &signal.symbol, ctx.config.fixed_leverage)
            .await?;
    }

    let order_side = OrderSide::for_entry(side);
    let mut results = Vec::new();

    let placed = engine
        .exchange
        .place_limit(ctx, &signal.symbol, order_side, price, quantity)
        .await;

    let placed = match placed {
        Ok(p) => {
            results.push(
                OrderResult::ok("LIMIT", format!("{order_side:?}"))
                    .price(price)
                    .quantity(quantity)
                    .exchange_order_id(p.order_id.clone())
                    .build(),
            );
            p
        }
        Err(e) => {
            results.push(OrderResult::failed("LIMIT", e.to_string()));
            return Ok((results, None));
        }
    };

    let mut trade = if let Some(mut trade) = existing {
        // DCA re-averages the position and moves the stop-loss, so the old
        // protective orders no longer match. Cancel only the SL/TP by type —
        // the freshly-placed LIMIT entry above is untouched (`spec.md`
        // §4.1.4 step 1).
        for order in &open_orders {
            if order.order_type == crate::exchange::types::OrderType::StopMarket
                || order.order_type == crate::exchange::types::OrderType::TakeProfitMarket
            {
                engine
                    .exchange
                    .cancel_order(ctx, &signal.symbol, &order.order_id)
                    .await
                    .ok();
            }
        }

        let risk_contribution = sizing.risk_amount;
        trade.apply_dca(price, quantity, stop_loss, risk_contribution, Decimal::ZERO);
        trade
    } else {
        new_trade(
            ctx,
            signal,
            side,
            price,
            quantity,
            Some(placed.order_id.clone()),
            stop_loss,
            sizing.risk_amount,
            Decimal::ZERO,
            hash,
        )
    };

    let event_type = if is_dca {
        TradeEventType::DcaEntry
    } else {
        TradeEventType::EntryPlaced
    };
    let mut events = vec![new_event(&trade.trade_id, event_type).with_order(
        Some(placed.order_id.clone()),
        format!("{order_side:?}"),
        "LIMIT",
        price,
        quantity,
    )];

    // A take-profit failure is recorded but non-fatal; only a stop-loss
    // failure triggers fail-safe compensation (`spec.md` §4.1.3 step 4-5).
    let protective = protective::place_protective_orders(engine, ctx, &trade).await;
    let sl_failed = protective.sl_failed();
    protective.apply_ids(&mut trade);
    let (protective_results, protective_events) = protective.into_results_and_events();
    results.extend(protective_results);
    events.extend(protective_events);

    if sl_failed {
        error!(trade_id = %trade.trade_id, "stop-loss placement failed, running fail-safe");
        let fail_safe = protective::fail_safe_flatten(engine, ctx, &trade, &placed.order_id).await;
        results.extend(fail_safe.results);
        events.push(fail_safe.event);
        engine
            .notify_critical(
                ctx,
                "Stop-loss placement failure",
                &format!(
                    "{}: stop-loss failed after entry, fail-safe {}",
                    trade.symbol,
                    if fail_safe.resolved { "unwound the position" } else { "could not unwind the position" }
                ),
            )
            .await;

        if fail_safe.resolved {
            return Ok((results, None));
        }
    }

    let store_result = if is_dca {
        engine.store.record_dca_entry(&trade, &events).await
    } else {
        engine.store.record_entry(&trade, &events).await
    };
    if let Err(e) = store_result {
        error!(error = %e, trade_id = %trade.trade_id, "failed to persist trade after exchange writes succeeded");
    }

    Ok((results, Some(trade.trade_id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use signal_bridge_types::{EffectiveTradeConfig, Side, SignalAction};

    use crate::dedup::DedupCache;
    use crate::exchange::types::{OpenOrder, OrderType, PlacedOrder, SymbolInfo};
    use crate::locks::SymbolLockRegistry;
    use crate::ports::{MockExchangePort, MockNotificationSink, MockTradeStore};
    use crate::tenant::{ExchangeCredentials, TenantCtx};

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

    fn entry_signal(is_dca: bool) -> signal_bridge_types::TradeSignal {
        signal_bridge_types::TradeSignal {
            action: if is_dca { SignalAction::Dca } else { SignalAction::Entry },
            symbol: "BTCUSDT".to_string(),
            side: Some(Side::Long),
            entry_price_low: Some(dec!(95000)),
            entry_price_high: None,
            stop_loss: Some(dec!(94000)),
            take_profits: vec![dec!(97000)],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca,
            raw_message: None,
            source: None,
        }
    }

    fn symbol_info() -> SymbolInfo {
        SymbolInfo { price_tick: dec!(0.1), quantity_step: dec!(0.001) }
    }

    fn placed(order_id: &str) -> PlacedOrder {
        PlacedOrder {
            order_id: order_id.to_string(),
            client_order_id: None,
            avg_price: None,
            filled_quantity: None,
        }
    }

    /// S1: a clean ENTRY places the limit order plus SL/TP and persists a
    /// new Trade with no fail-safe involved.
    #[tokio::test]
    async fn entry_happy_path_places_limit_and_protective_orders() {
        let mut exchange = MockExchangePort::new();
        exchange.expect_get_open_orders().returning(|_, _| Ok(vec![]));
        exchange.expect_get_balance().returning(|_| Ok(dec!(10000)));
        exchange.expect_get_symbol_info().returning(|_| Ok(symbol_info()));
        exchange.expect_set_isolated_margin().returning(|_, _| Ok(()));
        exchange.expect_set_leverage().returning(|_, _, _| Ok(()));
        exchange.expect_place_limit().returning(|_, _, _, _, _| Ok(placed("1")));
        exchange.expect_place_stop_market().returning(|_, _, _, _, _, _| Ok(placed("2")));
        exchange.expect_place_take_profit_market().returning(|_, _, _, _, _, _| Ok(placed("3")));

        let mut store = MockTradeStore::new();
        store.expect_find_open_trade().returning(|_, _| Ok(None));
        store.expect_sum_today_realized_loss().returning(|_| Ok(dec!(0)));
        store.expect_record_entry().returning(|_, _| Ok(()));

        let engine = super::super::ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let (results, trade_id) = super::execute(&engine, &ctx(), &entry_signal(false), "hash1").await.unwrap();
        assert!(trade_id.is_some());
        assert!(results.iter().all(|r| r.success));
        // LIMIT + SL + 1 TP
        assert_eq!(results.len(), 3);
    }

    /// S4: a DCA into an existing position re-averages the Trade rather than
    /// rejecting it, and is recorded via `record_dca_entry`.
    #[tokio::test]
    async fn dca_into_existing_position_is_accepted_and_averaged() {
        let existing = crate::engine::tests_support::sample_open_trade();

        let mut exchange = MockExchangePort::new();
        exchange.expect_get_open_orders().returning(|_, _| {
            Ok(vec![OpenOrder {
                order_id: "sl-1".to_string(),
                order_type: OrderType::StopMarket,
                side: crate::exchange::types::OrderSide::Sell,
                price: dec!(94000),
                quantity: dec!(0.2),
                client_order_id: Some("SL-1-0001".to_string()),
            }])
        });
        exchange.expect_get_balance().returning(|_| Ok(dec!(10000)));
        exchange.expect_get_symbol_info().returning(|_| Ok(symbol_info()));
        exchange.expect_place_limit().returning(|_, _, _, _, _| Ok(placed("4")));
        exchange.expect_cancel_order().returning(|_, _, _| Ok(()));
        exchange.expect_place_stop_market().returning(|_, _, _, _, _, _| Ok(placed("5")));
        exchange.expect_place_take_profit_market().returning(|_, _, _, _, _, _| Ok(placed("6")));

        let mut store = MockTradeStore::new();
        store.expect_find_open_trade().returning(move |_, _| Ok(Some(existing.clone())));
        store.expect_sum_today_realized_loss().returning(|_| Ok(dec!(0)));
        store.expect_record_dca_entry().returning(|_, _| Ok(()));

        let engine = super::super::ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let (results, trade_id) = super::execute(&engine, &ctx(), &entry_signal(true), "hash2").await.unwrap();
        assert!(trade_id.is_some());
        assert!(results.iter().all(|r| r.success));
    }
}
