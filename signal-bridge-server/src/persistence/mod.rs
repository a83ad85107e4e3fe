//! SQLite persistence layer. Mirrors `relay-server::db::Database`'s shape:
//! one `SqlitePool`, schema applied as inline `CREATE TABLE IF NOT EXISTS`
//! DDL at startup rather than through migration files, decimal and JSON
//! values stored as `TEXT` columns and parsed on the way out.

pub mod signals;
pub mod trade_events;
pub mod trades;

use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    trade_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    entry_quantity TEXT NOT NULL,
    entry_time TEXT NOT NULL,
    entry_order_id TEXT,
    stop_loss TEXT NOT NULL,
    take_profits TEXT NOT NULL,
    sl_client_order_id TEXT,
    tp_client_order_ids TEXT NOT NULL DEFAULT '[]',
    leverage INTEGER NOT NULL,
    risk_amount TEXT NOT NULL,
    entry_commission TEXT NOT NULL,
    signal_hash TEXT,
    status TEXT NOT NULL,
    dca_count INTEGER NOT NULL,
    total_closed_quantity TEXT NOT NULL,
    remaining_quantity TEXT,
    exit_price TEXT,
    exit_quantity TEXT,
    exit_time TEXT,
    exit_order_id TEXT,
    exit_reason TEXT,
    gross_profit TEXT,
    commission TEXT,
    net_profit TEXT,
    source_platform TEXT,
    source_channel TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_one_open_per_symbol
    ON trades(tenant_id, symbol)
    WHERE status = 'OPEN';

CREATE INDEX IF NOT EXISTS idx_trades_tenant_status ON trades(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_trades_signal_hash ON trades(signal_hash);
CREATE INDEX IF NOT EXISTS idx_trades_exit_time ON trades(exit_time);

CREATE TABLE IF NOT EXISTS trade_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    exchange_order_id TEXT,
    side TEXT,
    order_type TEXT,
    price TEXT,
    quantity TEXT,
    success INTEGER NOT NULL,
    error_message TEXT,
    detail TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY(trade_id) REFERENCES trades(trade_id)
);

CREATE INDEX IF NOT EXISTS idx_trade_events_trade_id ON trade_events(trade_id);

CREATE TABLE IF NOT EXISTS signal_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT,
    signal_hash TEXT NOT NULL,
    action TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL,
    rejection_reason TEXT,
    trade_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signal_audit_hash_created
    ON signal_audit(signal_hash, created_at);
"#;

/// Thin wrapper around the pool plus schema bootstrap, mirroring
/// `relay-server::db::Database::new`.
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url).await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("database schema ready");
        Ok(())
    }
}

/// `TradeStore` implementation backed by a `Database`. Split across
/// `trades`, `trade_events`, and `signals` submodules the same way
/// `relay-server::db` splits `db/trade_groups.rs` from `db/mod.rs`.
pub struct SqliteTradeStore {
    db: std::sync::Arc<Database>,
}

impl SqliteTradeStore {
    pub fn new(db: std::sync::Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl crate::ports::TradeStore for SqliteTradeStore {
    async fn find_open_trade(
        &self,
        tenant_id: Option<&str>,
        symbol: &str,
    ) -> Result<Option<signal_bridge_types::Trade>, StoreError> {
        trades::find_open_trade(&self.db.pool, tenant_id, symbol).await
    }

    async fn find_all_open_trades(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<signal_bridge_types::Trade>, StoreError> {
        trades::find_all_open_trades(&self.db.pool, tenant_id).await
    }

    async fn find_dca_count_by_symbol(
        &self,
        tenant_id: Option<&str>,
        symbol: &str,
    ) -> Result<i64, StoreError> {
        trades::find_dca_count_by_symbol(&self.db.pool, tenant_id, symbol).await
    }

    async fn find_closed_trades_between(
        &self,
        tenant_id: Option<&str>,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<signal_bridge_types::Trade>, StoreError> {
        trades::find_closed_trades_between(&self.db.pool, tenant_id, from, to).await
    }

    async fn exists_by_signal_hash_and_created_at_after(
        &self,
        signal_hash: &str,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, StoreError> {
        signals::exists_by_signal_hash_and_created_at_after(&self.db.pool, signal_hash, cutoff)
            .await
    }

    async fn sum_today_realized_loss(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<rust_decimal::Decimal, StoreError> {
        trades::sum_today_realized_loss(&self.db.pool, tenant_id).await
    }

    async fn record_entry(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::insert(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_dca_entry(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_close(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_partial_close(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_move_sl(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_cancel(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_close_from_stream(
        &self,
        trade: &signal_bridge_types::Trade,
        events: &[signal_bridge_types::TradeEvent],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trades::update(&mut tx, trade).await?;
        trade_events::insert_all(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_protection_lost(
        &self,
        trade_id: &str,
        event: &signal_bridge_types::TradeEvent,
    ) -> Result<(), StoreError> {
        debug_assert_eq!(trade_id, event.trade_id);
        let mut tx = self.db.pool.begin().await?;
        trade_events::insert_one(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_order_event(
        &self,
        event: &signal_bridge_types::TradeEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        trade_events::insert_one(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_signal_audit(
        &self,
        tenant_id: Option<&str>,
        signal_hash: &str,
        action: &str,
        symbol: &str,
        status: signal_bridge_types::SignalExecutionStatus,
        rejection_reason: Option<&str>,
        trade_id: Option<&str>,
    ) -> Result<(), StoreError> {
        signals::insert(
            &self.db.pool,
            tenant_id,
            signal_hash,
            action,
            symbol,
            status,
            rejection_reason,
            trade_id,
        )
        .await
    }

    async fn cleanup_stale_trades(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError> {
        trades::cleanup_stale(&self.db.pool, older_than).await
    }
}
