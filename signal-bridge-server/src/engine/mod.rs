//! The execution engine: turns a validated `TradeSignal` into exchange
//! writes plus the `Trade`/`TradeEvent` rows that describe them
//! (`spec.md` §4.1). One instance is shared across every tenant; all
//! per-tenant state is threaded through via `TenantCtx`, never held here.

pub mod close;
pub mod entry;
pub mod protective;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use signal_bridge_types::{
    OrderResult, RejectionReason, SignalAction, SignalExecutionStatus, Side, Trade, TradeEvent,
    TradeEventType, TradeSignal,
};

use crate::dedup::DedupCache;
use crate::error::EngineError;
use crate::locks::SymbolLockRegistry;
use crate::ports::{ExchangePort, NotificationSink, Severity, TradeStore};
use crate::tenant::TenantCtx;

/// Window within which an identical signal hash is treated as a duplicate
/// (`spec.md` §4.3.4).
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

pub struct ExecutionEngine {
    pub(crate) exchange: Arc<dyn ExchangePort>,
    pub(crate) store: Arc<dyn TradeStore>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) locks: SymbolLockRegistry,
    dedup: DedupCache,
}

/// Protective-order client-order-ids follow `<prefix>-<epochMillis>-<hex4>`
/// (`spec.md` §6.2), prefix ∈ {SL, TP}, well under the venue's 36-char cap.
/// Idempotency under retry (`spec.md` §4.1.6) comes from the id being fixed
/// once per placement attempt, not from the id being derived from the trade
/// — a re-placement after an explicit cancel (DCA, MOVE_SL, partial close)
/// is a genuinely new order and gets a fresh id.
pub(crate) fn new_client_order_id(prefix: &str) -> String {
    let ms = Utc::now().timestamp_millis();
    let suffix: u16 = rand::random();
    format!("{prefix}-{ms}-{suffix:04x}")
}

impl ExecutionEngine {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        store: Arc<dyn TradeStore>,
        notifier: Arc<dyn NotificationSink>,
        locks: SymbolLockRegistry,
        dedup: DedupCache,
    ) -> Self {
        Self {
            exchange,
            store,
            notifier,
            locks,
            dedup,
        }
    }

    /// Entry point: validates, deduplicates, serializes on the symbol, then
    /// dispatches to the per-action handler. Returns every `OrderResult`
    /// attempted, in order, so the caller can see exactly how far execution
    /// got. Never panics and never leaves a signal unaudited.
    #[instrument(skip(self, signal), fields(symbol = %signal.symbol, action = ?signal.action))]
    pub async fn execute(&self, ctx: &TenantCtx, signal: &TradeSignal) -> Vec<OrderResult> {
        if signal.action == SignalAction::Info {
            return vec![];
        }

        if let Err(reason) = signal.validate() {
            self.audit(ctx, signal, SignalExecutionStatus::Rejected, Some(&reason.to_string()), None)
                .await;
            return vec![OrderResult::failed("VALIDATE", reason.to_string())];
        }

        let hash = signal_bridge_types::signal_hash(signal);
        if ctx.config.dedup_enabled && !self.check_dedup(ctx, signal, &hash).await {
            self.audit(ctx, signal, SignalExecutionStatus::Rejected, Some("duplicate"), None)
                .await;
            return vec![OrderResult::failed("DEDUP", RejectionReason::Duplicate.to_string())];
        }

        let _guard = self.locks.acquire(&signal.symbol).await;

        let outcome = match signal.action {
            SignalAction::Entry | SignalAction::Dca => entry::execute(self, ctx, signal, &hash).await,
            SignalAction::Close => close::execute_close(self, ctx, signal).await,
            SignalAction::MoveSl => protective::execute_move_sl(self, ctx, signal).await,
            SignalAction::Cancel => protective::execute_cancel(self, ctx, signal).await,
            SignalAction::Info => unreachable!("handled above"),
        };

        match outcome {
            Ok((results, trade_id)) => {
                self.audit(ctx, signal, SignalExecutionStatus::Executed, None, trade_id.as_deref())
                    .await;
                results
            }
            Err(reason) => {
                warn!(error = %reason, "signal execution rejected");
                self.audit(ctx, signal, SignalExecutionStatus::Rejected, Some(&reason.to_string()), None)
                    .await;
                vec![OrderResult::failed("EXECUTE", reason.to_string())]
            }
        }
    }

    async fn check_dedup(&self, ctx: &TenantCtx, signal: &TradeSignal, hash: &str) -> bool {
        let key = if signal.action == SignalAction::Cancel {
            signal_bridge_types::cancel_dedup_key(&signal.symbol)
        } else if let Some(tenant_id) = ctx.scope() {
            signal_bridge_types::tenant_dedup_key(tenant_id, hash)
        } else {
            hash.to_string()
        };

        if self.dedup.check_and_insert(&key, DEDUP_WINDOW).await {
            return false;
        }

        // Layer-2 backstop: a restart empties the in-memory cache, so also
        // check persistence before accepting (`spec.md` §4.3.4).
        let cutoff = Utc::now() - chrono::Duration::from_std(DEDUP_WINDOW).unwrap();
        match self.store.exists_by_signal_hash_and_created_at_after(hash, cutoff).await {
            Ok(true) => {
                self.dedup.backfill(&key).await;
                false
            }
            Ok(false) => true,
            Err(e) => {
                warn!(error = %e, "dedup persistence backstop check failed, proceeding");
                true
            }
        }
    }

    async fn audit(
        &self,
        ctx: &TenantCtx,
        signal: &TradeSignal,
        status: SignalExecutionStatus,
        rejection_reason: Option<&str>,
        trade_id: Option<&str>,
    ) {
        let hash = signal_bridge_types::dedup_key_for(signal);
        if let Err(e) = self
            .store
            .record_signal_audit(
                ctx.scope(),
                &hash,
                &format!("{:?}", signal.action).to_uppercase(),
                &signal.symbol,
                status,
                rejection_reason,
                trade_id,
            )
            .await
        {
            warn!(error = %e, "failed to record signal audit");
        }
    }

    /// Pre-trade checks shared by ENTRY and DCA (`spec.md` §4.1.1): symbol
    /// whitelist and the daily-loss circuit breaker. Position-state checks
    /// are specific to each action and live in `entry::execute`.
    pub(crate) async fn pre_trade_checks(&self, ctx: &TenantCtx, symbol: &str) -> Result<(), RejectionReason> {
        if !ctx.config.allows_symbol(symbol) {
            return Err(RejectionReason::NotWhitelisted(symbol.to_string()));
        }
        if ctx.config.max_daily_loss_usdt > Decimal::ZERO {
            let today_loss = self
                .store
                .sum_today_realized_loss(ctx.scope())
                .await
                .unwrap_or(Decimal::ZERO);
            if today_loss >= ctx.config.max_daily_loss_usdt {
                return Err(RejectionReason::DailyLossLimitExceeded {
                    limit: ctx.config.max_daily_loss_usdt,
                    today: today_loss,
                });
            }
        }
        Ok(())
    }

    pub(crate) async fn notify_critical(&self, ctx: &TenantCtx, title: &str, body: &str) {
        self.notifier.notify(ctx.scope(), title, body, Severity::Critical).await;
    }

    pub(crate) async fn notify_warning(&self, ctx: &TenantCtx, title: &str, body: &str) {
        self.notifier.notify(ctx.scope(), title, body, Severity::Warning).await;
    }

    /// CLOSE/MOVE_SL symbol fallback (`spec.md` §4.1.5): if `requested`
    /// has no OPEN trade, and exactly one OPEN trade exists for this tenant
    /// across all symbols, use it instead and tell the operator.
    pub(crate) async fn resolve_open_trade(
        &self,
        ctx: &TenantCtx,
        requested: &str,
    ) -> Result<Trade, EngineError> {
        if let Some(trade) = self
            .store
            .find_open_trade(ctx.scope(), requested)
            .await
            .map_err(|e| EngineError::Critical(e.to_string()))?
        {
            return Ok(trade);
        }

        let all = self
            .store
            .find_all_open_trades(ctx.scope())
            .await
            .map_err(|e| EngineError::Critical(e.to_string()))?;

        match all.len() {
            0 => Err(RejectionReason::NoOpenTrade(requested.to_string()).into()),
            1 => {
                let trade = all.into_iter().next().unwrap();
                self.notify_warning(
                    ctx,
                    "Symbol substituted",
                    &format!("no open trade for {requested}, using {} instead", trade.symbol),
                )
                .await;
                Ok(trade)
            }
            n => Err(RejectionReason::AmbiguousSymbol(n).into()),
        }
    }
}

/// Build the starting row for a brand-new Trade. Shared by ENTRY.
pub(crate) fn new_trade(
    ctx: &TenantCtx,
    signal: &TradeSignal,
    side: Side,
    entry_price: Decimal,
    quantity: Decimal,
    entry_order_id: Option<String>,
    stop_loss: Decimal,
    risk_amount: Decimal,
    entry_commission: Decimal,
    signal_hash: &str,
) -> Trade {
    let now = Utc::now();
    Trade {
        trade_id: Uuid::new_v4().to_string(),
        tenant_id: ctx.scope().unwrap_or("default").to_string(),
        symbol: signal.symbol.clone(),
        side,
        entry_price,
        entry_quantity: quantity,
        entry_time: now,
        entry_order_id,
        stop_loss,
        take_profits: signal.take_profits.clone(),
        sl_client_order_id: None,
        tp_client_order_ids: Vec::new(),
        leverage: ctx.config.fixed_leverage,
        risk_amount,
        entry_commission,
        signal_hash: Some(signal_hash.to_string()),
        status: signal_bridge_types::TradeStatus::Open,
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
        source_platform: signal.source.as_ref().map(|s| s.platform.clone()),
        source_channel: signal.source.as_ref().and_then(|s| s.channel_name.clone()),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn new_event(trade_id: &str, event_type: TradeEventType) -> TradeEvent {
    TradeEvent::new(trade_id, event_type)
}

/// Shared fixtures for the per-action test modules in `entry`, `close`, and
/// `protective` — one canonical open Trade so each only has to describe what
/// it changes.
#[cfg(test)]
pub(crate) mod tests_support {
    use rust_decimal_macros::dec;

    use signal_bridge_types::{Side, Trade, TradeStatus};

    pub(crate) fn sample_open_trade() -> Trade {
        let now = Utc::now();
        Trade {
            trade_id: "trade-1".to_string(),
            tenant_id: "default".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            entry_price: dec!(95000),
            entry_quantity: dec!(0.2),
            entry_time: now,
            entry_order_id: Some("entry-1".to_string()),
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
            total_closed_quantity: rust_decimal::Decimal::ZERO,
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
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MockExchangePort, MockNotificationSink, MockTradeStore};
    use signal_bridge_types::EffectiveTradeConfig;

    fn ctx() -> TenantCtx {
        TenantCtx {
            tenant_id: None,
            credentials: crate::tenant::ExchangeCredentials {
                api_key: "k".into(),
                api_secret: "s".into(),
            },
            config: EffectiveTradeConfig {
                risk_percent: Decimal::new(2, 2),
                max_position_usdt: Decimal::new(50000, 0),
                max_daily_loss_usdt: Decimal::new(1000, 0),
                max_dca_per_symbol: 3,
                dca_risk_multiplier: Decimal::new(2, 0),
                fixed_leverage: 20,
                allowed_symbols: vec!["BTCUSDT".to_string()],
                dedup_enabled: true,
                default_symbol: None,
            },
        }
    }

    #[tokio::test]
    async fn info_signal_is_a_no_op() {
        let engine = ExecutionEngine::new(
            Arc::new(MockExchangePort::new()),
            Arc::new(MockTradeStore::new()),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );
        let signal = TradeSignal {
            action: SignalAction::Info,
            symbol: "BTCUSDT".to_string(),
            side: None,
            entry_price_low: None,
            entry_price_high: None,
            stop_loss: None,
            take_profits: vec![],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        };
        let results = engine.execute(&ctx(), &signal).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn symbol_not_whitelisted_is_rejected() {
        let mut store = MockTradeStore::new();
        store
            .expect_record_signal_audit()
            .returning(|_, _, _, _, _, _, _| Ok(()));
        let engine = ExecutionEngine::new(
            Arc::new(MockExchangePort::new()),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );
        let signal = TradeSignal {
            action: SignalAction::Entry,
            symbol: "ETHUSDT".to_string(),
            side: Some(Side::Long),
            entry_price_low: Some(Decimal::new(3000, 0)),
            entry_price_high: None,
            stop_loss: Some(Decimal::new(2900, 0)),
            take_profits: vec![],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        };
        let results = engine.execute(&ctx(), &signal).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }

    /// S8: the daily-loss circuit breaker rejects a new entry once today's
    /// realized loss already meets the configured limit.
    #[tokio::test]
    async fn daily_loss_limit_reached_is_rejected() {
        let mut store = MockTradeStore::new();
        store
            .expect_sum_today_realized_loss()
            .returning(|_| Ok(Decimal::new(1000, 0)));
        store
            .expect_record_signal_audit()
            .returning(|_, _, _, _, _, _, _| Ok(()));
        let engine = ExecutionEngine::new(
            Arc::new(MockExchangePort::new()),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        );
        let signal = TradeSignal {
            action: SignalAction::Entry,
            symbol: "BTCUSDT".to_string(),
            side: Some(Side::Long),
            entry_price_low: Some(Decimal::new(95000, 0)),
            entry_price_high: None,
            stop_loss: Some(Decimal::new(94000, 0)),
            take_profits: vec![],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        };
        let results = engine.execute(&ctx(), &signal).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }
}
