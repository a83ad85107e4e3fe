use tracing::error;

use signal_bridge_types::{OrderResult, Trade, TradeEvent, TradeEventType, TradeSignal};

use crate::error::EngineError;
use crate::exchange::types::OrderSide;
use crate::ports::ExchangePort;
use crate::tenant::TenantCtx;

use super::{new_client_order_id, new_event, ExecutionEngine};

/// Outcome of placing a trade's protective orders, split so the caller can
/// tell a stop-loss failure (fatal, triggers fail-safe) from a take-profit
/// failure (non-fatal, `spec.md` §4.1.3 step 4) apart.
pub(super) struct ProtectiveResults {
    pub sl: (OrderResult, Option<TradeEvent>),
    pub tps: Vec<(OrderResult, Option<TradeEvent>)>,
    /// Client-order-id of the stop-loss, set only if it actually went
    /// resting on the exchange. The caller stores this on the Trade so the
    /// reconciler can recognize the fill later.
    pub sl_client_order_id: Option<String>,
    pub tp_client_order_ids: Vec<String>,
}

impl ProtectiveResults {
    pub fn sl_failed(&self) -> bool {
        !self.sl.0.success
    }

    /// Write the ids of whichever protective orders were actually placed
    /// onto `trade`, so a later stream fill can be matched back to them.
    pub fn apply_ids(&self, trade: &mut Trade) {
        trade.sl_client_order_id = self.sl_client_order_id.clone();
        trade.tp_client_order_ids = self.tp_client_order_ids.clone();
    }

    pub fn into_results_and_events(self) -> (Vec<OrderResult>, Vec<TradeEvent>) {
        let mut results = vec![self.sl.0];
        let mut events = self.sl.1.into_iter().collect::<Vec<_>>();
        for (result, event) in self.tps {
            results.push(result);
            events.extend(event);
        }
        (results, events)
    }
}

/// Place the stop-loss and every take-profit for a freshly-opened or
/// DCA'd-into trade. The exchange client retries each placement itself on a
/// network-layer failure using the same client-order-id, so a single call
/// here is idempotent under retry (`spec.md` §4.1.6); callers that need to
/// replace a trade's protective orders (DCA, MOVE_SL, partial close) cancel
/// the old ones first rather than relying on id reuse.
pub(super) async fn place_protective_orders(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    trade: &Trade,
) -> ProtectiveResults {
    let close_side = OrderSide::for_entry(trade.side).opposite();
    let quantity = trade.effective_quantity();

    let sl_client_id = new_client_order_id("SL");
    let mut sl_placed_id = None;
    let sl = match engine
        .exchange
        .place_stop_market(ctx, &trade.symbol, close_side, trade.stop_loss, quantity, &sl_client_id)
        .await
    {
        Ok(placed) => {
            sl_placed_id = Some(sl_client_id);
            let event = new_event(&trade.trade_id, TradeEventType::SlPlaced).with_order(
                Some(placed.order_id.clone()),
                format!("{close_side:?}"),
                "STOP_MARKET",
                trade.stop_loss,
                quantity,
            );
            (
                OrderResult::ok("STOP_MARKET", format!("{close_side:?}"))
                    .price(trade.stop_loss)
                    .quantity(quantity)
                    .exchange_order_id(placed.order_id)
                    .build(),
                Some(event),
            )
        }
        Err(e) => (
            OrderResult::failed("STOP_MARKET", e.to_string()),
            Some(new_event(&trade.trade_id, TradeEventType::SlPlaced).failed(e.to_string())),
        ),
    };

    let mut tps = Vec::new();
    let mut tp_placed_ids = Vec::new();
    for tp in &trade.take_profits {
        let tp_client_id = new_client_order_id("TP");
        match engine
            .exchange
            .place_take_profit_market(ctx, &trade.symbol, close_side, *tp, quantity, &tp_client_id)
            .await
        {
            Ok(placed) => {
                tp_placed_ids.push(tp_client_id);
                let event = new_event(&trade.trade_id, TradeEventType::TpPlaced).with_order(
                    Some(placed.order_id.clone()),
                    format!("{close_side:?}"),
                    "TAKE_PROFIT_MARKET",
                    *tp,
                    quantity,
                );
                tps.push((
                    OrderResult::ok("TAKE_PROFIT_MARKET", format!("{close_side:?}"))
                        .price(*tp)
                        .quantity(quantity)
                        .exchange_order_id(placed.order_id)
                        .build(),
                    Some(event),
                ));
            }
            Err(e) => {
                tps.push((
                    OrderResult::failed("TAKE_PROFIT_MARKET", e.to_string()),
                    Some(new_event(&trade.trade_id, TradeEventType::TpPlaced).failed(e.to_string())),
                ));
            }
        }
    }

    ProtectiveResults {
        sl,
        tps,
        sl_client_order_id: sl_placed_id,
        tp_client_order_ids: tp_placed_ids,
    }
}

pub(super) struct FailSafeOutcome {
    pub results: Vec<OrderResult>,
    pub event: TradeEvent,
    /// `true` once the position is confirmed gone, either because the entry
    /// order was cancelled before it could fill or because the market
    /// flatten succeeded.
    pub resolved: bool,
}

/// `spec.md` §4.1.3 step 5: when stop-loss placement fails after the entry
/// was accepted, first try to cancel the entry order itself — if it hasn't
/// filled yet, this cleanly unwinds the trade with nothing left on the
/// exchange. Only if that cancel also fails (meaning the entry likely
/// filled) does this fall back to a market flatten. A market-flatten
/// failure is the one case critical enough to alert the notification sink.
pub(super) async fn fail_safe_flatten(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    trade: &Trade,
    entry_order_id: &str,
) -> FailSafeOutcome {
    match engine.exchange.cancel_order(ctx, &trade.symbol, entry_order_id).await {
        Ok(()) => {
            return FailSafeOutcome {
                results: vec![OrderResult::ok("CANCEL", "N/A").exchange_order_id(entry_order_id).build()],
                event: new_event(&trade.trade_id, TradeEventType::FailSafe),
                resolved: true,
            };
        }
        Err(e) => {
            tracing::warn!(trade_id = %trade.trade_id, error = %e, "entry cancel failed, falling back to market flatten");
        }
    }

    let mut results = vec![OrderResult::failed("CANCEL", "entry cancel failed")];

    let close_side = OrderSide::for_entry(trade.side).opposite();
    let quantity = trade.effective_quantity();
    match engine
        .exchange
        .place_market(ctx, &trade.symbol, close_side, quantity)
        .await
    {
        Ok(placed) => {
            results.push(
                OrderResult::ok("MARKET", format!("{close_side:?}"))
                    .quantity(quantity)
                    .exchange_order_id(placed.order_id)
                    .build(),
            );
            FailSafeOutcome {
                results,
                event: new_event(&trade.trade_id, TradeEventType::FailSafe),
                resolved: true,
            }
        }
        Err(e) => {
            error!(trade_id = %trade.trade_id, error = %e, "fail-safe market flatten itself failed");
            results.push(OrderResult::failed("MARKET", e.to_string()));
            FailSafeOutcome {
                results,
                event: new_event(&trade.trade_id, TradeEventType::FailSafe).failed(e.to_string()),
                resolved: false,
            }
        }
    }
}

/// MOVE_SL (`spec.md` §4.1.5): cancel the existing stop and/or take-profit
/// and replace with the new target(s). Entry and DCA legs are untouched.
pub(super) async fn execute_move_sl(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    signal: &TradeSignal,
) -> Result<(Vec<OrderResult>, Option<String>), EngineError> {
    let trade = engine.resolve_open_trade(ctx, &signal.symbol).await?;

    let new_stop_loss = signal.new_stop_loss.unwrap_or(trade.stop_loss);
    let close_side = OrderSide::for_entry(trade.side).opposite();
    let quantity = trade.effective_quantity();
    let mut results = Vec::new();
    let mut events = Vec::new();
    let mut new_sl_client_id = None;
    let mut new_tp_client_ids = Vec::new();

    if signal.new_stop_loss.is_some() {
        engine.exchange.cancel_all_orders(ctx, &trade.symbol).await.ok();
        let client_id = new_client_order_id("SL");
        match engine
            .exchange
            .place_stop_market(ctx, &trade.symbol, close_side, new_stop_loss, quantity, &client_id)
            .await
        {
            Ok(placed) => {
                new_sl_client_id = Some(client_id);
                results.push(
                    OrderResult::ok("STOP_MARKET", format!("{close_side:?}"))
                        .price(new_stop_loss)
                        .quantity(quantity)
                        .exchange_order_id(placed.order_id.clone())
                        .build(),
                );
                events.push(
                    new_event(&trade.trade_id, TradeEventType::MoveSl).with_order(
                        Some(placed.order_id),
                        format!("{close_side:?}"),
                        "STOP_MARKET",
                        new_stop_loss,
                        quantity,
                    ),
                );
            }
            Err(e) => {
                results.push(OrderResult::failed("STOP_MARKET", e.to_string()));
                events.push(new_event(&trade.trade_id, TradeEventType::MoveSl).failed(e.to_string()));
            }
        }
        for tp in &trade.take_profits {
            let tp_client_id = new_client_order_id("TP");
            if let Ok(placed) = engine
                .exchange
                .place_take_profit_market(ctx, &trade.symbol, close_side, *tp, quantity, &tp_client_id)
                .await
            {
                new_tp_client_ids.push(tp_client_id);
                results.push(
                    OrderResult::ok("TAKE_PROFIT_MARKET", format!("{close_side:?}"))
                        .price(*tp)
                        .quantity(quantity)
                        .exchange_order_id(placed.order_id)
                        .build(),
                );
            }
        }
    }

    let mut trade = trade;
    if signal.new_stop_loss.is_some() {
        trade.sl_client_order_id = new_sl_client_id;
        trade.tp_client_order_ids = new_tp_client_ids;
    }
    trade.stop_loss = new_stop_loss;
    if let Some(new_tp) = signal.new_take_profit {
        trade.take_profits = vec![new_tp];
    }
    trade.updated_at = chrono::Utc::now();

    if let Err(e) = engine.store.record_move_sl(&trade, &events).await {
        error!(error = %e, trade_id = %trade.trade_id, "failed to persist moved stop loss");
    }

    Ok((results, Some(trade.trade_id)))
}

/// CANCEL (`spec.md` §4.1.8): cancel every open order on the symbol and
/// mark the trade (if any) cancelled. Carries no price invariants.
pub(super) async fn execute_cancel(
    engine: &ExecutionEngine,
    ctx: &TenantCtx,
    signal: &TradeSignal,
) -> Result<(Vec<OrderResult>, Option<String>), EngineError> {
    engine.exchange.cancel_all_orders(ctx, &signal.symbol).await?;
    let mut results = vec![OrderResult::ok("CANCEL_ALL", "N/A").build()];

    let trade = engine
        .store
        .find_open_trade(ctx.scope(), &signal.symbol)
        .await
        .map_err(|e| EngineError::Critical(e.to_string()))?;

    let trade_id = if let Some(mut trade) = trade {
        trade.status = signal_bridge_types::TradeStatus::Cancelled;
        trade.updated_at = chrono::Utc::now();
        let event = new_event(&trade.trade_id, TradeEventType::CancelPlaced);
        if let Err(e) = engine.store.record_cancel(&trade, &[event]).await {
            error!(error = %e, trade_id = %trade.trade_id, "failed to persist cancellation");
        }
        results.push(OrderResult::ok("CANCEL", "N/A").build());
        Some(trade.trade_id)
    } else {
        None
    };

    Ok((results, trade_id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal_macros::dec;

    use signal_bridge_types::EffectiveTradeConfig;

    use crate::dedup::DedupCache;
    use crate::error::ExchangeError;
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

    fn placed(order_id: &str) -> PlacedOrder {
        PlacedOrder { order_id: order_id.to_string(), client_order_id: None, avg_price: None, filled_quantity: None }
    }

    /// S2: when the entry order hasn't filled yet, cancelling it cleanly
    /// unwinds the trade — no market flatten is attempted.
    #[tokio::test]
    async fn fail_safe_cancels_unfilled_entry_without_flattening() {
        let mut exchange = MockExchangePort::new();
        exchange.expect_cancel_order().returning(|_, _, _| Ok(()));

        let engine = ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(MockTradeStore::new()),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let trade = sample_open_trade();
        let outcome = super::fail_safe_flatten(&engine, &ctx(), &trade, "entry-1").await;
        assert!(outcome.resolved);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].success);
    }

    /// S3: if the entry cancel itself fails (the entry likely already
    /// filled), fall back to a market flatten.
    #[tokio::test]
    async fn fail_safe_falls_back_to_market_flatten_when_cancel_fails() {
        let mut exchange = MockExchangePort::new();
        exchange
            .expect_cancel_order()
            .returning(|_, _, _| Err(ExchangeError::Venue { code: -2011, msg: "already filled".to_string() }));
        exchange.expect_place_market().returning(|_, _, _, _| Ok(placed("flatten-1")));

        let engine = ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(MockTradeStore::new()),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let trade = sample_open_trade();
        let outcome = super::fail_safe_flatten(&engine, &ctx(), &trade, "entry-1").await;
        assert!(outcome.resolved);
        assert!(outcome.results.iter().any(|r| r.order_type == "MARKET" && r.success));
    }

    /// A market-flatten failure on top of the cancel failure is the one
    /// case critical enough to leave `resolved` false for the caller to alert on.
    #[tokio::test]
    async fn fail_safe_reports_unresolved_when_flatten_also_fails() {
        let mut exchange = MockExchangePort::new();
        exchange
            .expect_cancel_order()
            .returning(|_, _, _| Err(ExchangeError::Venue { code: -2011, msg: "already filled".to_string() }));
        exchange
            .expect_place_market()
            .returning(|_, _, _, _| Err(ExchangeError::Venue { code: -2019, msg: "insufficient margin".to_string() }));

        let engine = ExecutionEngine::new(
            Arc::new(exchange),
            Arc::new(MockTradeStore::new()),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );

        let trade = sample_open_trade();
        let outcome = super::fail_safe_flatten(&engine, &ctx(), &trade, "entry-1").await;
        assert!(!outcome.resolved);
    }
}
