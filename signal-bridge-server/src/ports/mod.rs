//! Outbound port traits: the seams the execution engine, stream reconciler,
//! and fan-out service depend on instead of concrete infrastructure. Mirrors
//! `relay-server::ports::{mod, outbound}`'s `#[cfg_attr(test,
//! mockall::automock)]` pattern so engine tests can inject a recording or
//! failing double without touching the network or a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use signal_bridge_types::{Trade, TradeEvent};

use crate::error::{ExchangeError, StoreError};
use crate::exchange::types::{OpenOrder, OrderSide, PlacedOrder, PositionInfo, SymbolInfo};
use crate::tenant::TenantCtx;

/// Severity of a notification, mirrored on the wire as a plain string so any
/// downstream sink (log, webhook, chat) can render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The venue's signed + public REST surface (`spec.md` §4.5, §6.2).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangePort: Send + Sync {
    async fn get_balance(&self, ctx: &TenantCtx) -> Result<Decimal, ExchangeError>;
    async fn get_position(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
    ) -> Result<PositionInfo, ExchangeError>;
    async fn get_open_orders(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
    ) -> Result<Vec<OpenOrder>, ExchangeError>;
    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError>;

    async fn cancel_order(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), ExchangeError>;
    async fn cancel_all_orders(&self, ctx: &TenantCtx, symbol: &str) -> Result<(), ExchangeError>;

    async fn place_limit(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn place_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<PlacedOrder, ExchangeError>;

    /// Reduce-only, close-on-trigger stop. Carries a caller-generated
    /// client-order-id for idempotent retry (`spec.md` §4.1.6).
    async fn place_stop_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        stop_price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn place_take_profit_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        trigger_price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn set_leverage(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), ExchangeError>;

    async fn set_isolated_margin(&self, ctx: &TenantCtx, symbol: &str) -> Result<(), ExchangeError>;
}

/// The venue's user-data-stream handshake (`spec.md` §4.5, §6.3). The
/// long-lived socket read loop itself lives in `crate::reconciler`, not
/// behind this port — only the REST half of the lifecycle is mockable here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStreamPort: Send + Sync {
    async fn create_listen_key(&self, ctx: &TenantCtx) -> Result<String, ExchangeError>;
    async fn keepalive_listen_key(&self, ctx: &TenantCtx, key: &str)
        -> Result<(), ExchangeError>;
    async fn delete_listen_key(&self, ctx: &TenantCtx, key: &str) -> Result<(), ExchangeError>;
    fn ws_base_url(&self) -> String;
}

/// `spec.md` §4.6: durable Trade/TradeEvent/signal-audit storage. Every
/// `record_*` method here runs in a single transaction covering the Trade
/// write and its TradeEvent appends (§4.6.3); failures are logged by the
/// caller and never retract exchange state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn find_open_trade(
        &self,
        tenant_id: Option<&str>,
        symbol: &str,
    ) -> Result<Option<Trade>, StoreError>;

    async fn find_all_open_trades(&self, tenant_id: Option<&str>) -> Result<Vec<Trade>, StoreError>;

    async fn find_dca_count_by_symbol(
        &self,
        tenant_id: Option<&str>,
        symbol: &str,
    ) -> Result<i64, StoreError>;

    async fn find_closed_trades_between(
        &self,
        tenant_id: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError>;

    async fn exists_by_signal_hash_and_created_at_after(
        &self,
        signal_hash: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Signed sum of today's realized negative `net_profit` values, tenant
    /// scoped when `tenant_id` is `Some` (`spec.md` §4.1.1 step 3).
    async fn sum_today_realized_loss(&self, tenant_id: Option<&str>) -> Result<Decimal, StoreError>;

    async fn record_entry(&self, trade: &Trade, events: &[TradeEvent]) -> Result<(), StoreError>;
    async fn record_dca_entry(&self, trade: &Trade, events: &[TradeEvent]) -> Result<(), StoreError>;
    async fn record_close(&self, trade: &Trade, events: &[TradeEvent]) -> Result<(), StoreError>;
    async fn record_partial_close(
        &self,
        trade: &Trade,
        events: &[TradeEvent],
    ) -> Result<(), StoreError>;
    async fn record_move_sl(&self, trade: &Trade, events: &[TradeEvent]) -> Result<(), StoreError>;
    async fn record_cancel(&self, trade: &Trade, events: &[TradeEvent]) -> Result<(), StoreError>;
    async fn record_close_from_stream(
        &self,
        trade: &Trade,
        events: &[TradeEvent],
    ) -> Result<(), StoreError>;
    async fn record_protection_lost(
        &self,
        trade_id: &str,
        event: &TradeEvent,
    ) -> Result<(), StoreError>;
    async fn record_order_event(&self, event: &TradeEvent) -> Result<(), StoreError>;

    /// Fire-and-forget audit trail for every inbound signal (`spec.md` §3.4).
    async fn record_signal_audit(
        &self,
        tenant_id: Option<&str>,
        signal_hash: &str,
        action: &str,
        symbol: &str,
        status: signal_bridge_types::SignalExecutionStatus,
        rejection_reason: Option<&str>,
        trade_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Housekeeping job (`spec.md` §4.6.3): clears out trades left `OPEN`
    /// past a sanity horizon with no matching exchange position, a
    /// defensive measure against a crash between exchange-write and
    /// persistence-write. Returns the number of rows touched.
    async fn cleanup_stale_trades(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Fire-and-forget outbound notifications (`spec.md` §4.7). Failures must
/// never propagate into the caller's control flow — the trait itself has no
/// `Result` return for that reason.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, tenant_id: Option<&str>, title: &str, body: &str, severity: Severity);
}

/// Convenience bundle so engine/reconciler/fanout constructors take one
/// argument instead of four.
pub struct PortBundle {
    pub exchange: std::sync::Arc<dyn ExchangePort>,
    pub user_stream: std::sync::Arc<dyn UserStreamPort>,
    pub store: std::sync::Arc<dyn TradeStore>,
    pub notifier: std::sync::Arc<dyn NotificationSink>,
}
