use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use signal_bridge_types::{Side, Trade, TradeStatus};

use crate::error::StoreError;

fn decimal_opt(s: Option<String>) -> Result<Option<Decimal>, StoreError> {
    s.map(|s| Decimal::from_str(&s))
        .transpose()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn decimal(s: String) -> Result<Decimal, StoreError> {
    Decimal::from_str(&s).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn row_to_trade(row: sqlx::sqlite::SqliteRow) -> Result<Trade, StoreError> {
    let side_str: String = row.try_get("side")?;
    let status_str: String = row.try_get("status")?;
    let take_profits_json: String = row.try_get("take_profits")?;
    let tp_client_order_ids_json: String = row.try_get("tp_client_order_ids")?;

    Ok(Trade {
        trade_id: row.try_get("trade_id")?,
        tenant_id: row.try_get("tenant_id")?,
        symbol: row.try_get("symbol")?,
        side: if side_str == "LONG" { Side::Long } else { Side::Short },
        entry_price: decimal(row.try_get("entry_price")?)?,
        entry_quantity: decimal(row.try_get("entry_quantity")?)?,
        entry_time: row.try_get::<String, _>("entry_time")?.parse::<DateTime<Utc>>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        entry_order_id: row.try_get("entry_order_id")?,
        stop_loss: decimal(row.try_get("stop_loss")?)?,
        take_profits: serde_json::from_str(&take_profits_json)?,
        sl_client_order_id: row.try_get("sl_client_order_id")?,
        tp_client_order_ids: serde_json::from_str(&tp_client_order_ids_json)?,
        leverage: row.try_get::<i64, _>("leverage")? as u32,
        risk_amount: decimal(row.try_get("risk_amount")?)?,
        entry_commission: decimal(row.try_get("entry_commission")?)?,
        signal_hash: row.try_get("signal_hash")?,
        status: match status_str.as_str() {
            "OPEN" => TradeStatus::Open,
            "CANCELLED" => TradeStatus::Cancelled,
            _ => TradeStatus::Closed,
        },
        dca_count: row.try_get("dca_count")?,
        total_closed_quantity: decimal(row.try_get("total_closed_quantity")?)?,
        remaining_quantity: decimal_opt(row.try_get("remaining_quantity")?)?,
        exit_price: decimal_opt(row.try_get("exit_price")?)?,
        exit_quantity: decimal_opt(row.try_get("exit_quantity")?)?,
        exit_time: row
            .try_get::<Option<String>, _>("exit_time")?
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        exit_order_id: row.try_get("exit_order_id")?,
        exit_reason: row.try_get("exit_reason")?,
        gross_profit: decimal_opt(row.try_get("gross_profit")?)?,
        commission: decimal_opt(row.try_get("commission")?)?,
        net_profit: decimal_opt(row.try_get("net_profit")?)?,
        source_platform: row.try_get("source_platform")?,
        source_channel: row.try_get("source_channel")?,
        created_at: row.try_get::<String, _>("created_at")?.parse::<DateTime<Utc>>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: row.try_get::<String, _>("updated_at")?.parse::<DateTime<Utc>>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

pub async fn find_open_trade(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
    symbol: &str,
) -> Result<Option<Trade>, StoreError> {
    let row = sqlx::query(
        "SELECT * FROM trades WHERE tenant_id = ? AND symbol = ? AND status = 'OPEN' LIMIT 1",
    )
    .bind(tenant_id.unwrap_or("default"))
    .bind(symbol)
    .fetch_optional(pool)
    .await?;
    row.map(row_to_trade).transpose()
}

pub async fn find_all_open_trades(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
) -> Result<Vec<Trade>, StoreError> {
    let rows = sqlx::query("SELECT * FROM trades WHERE tenant_id = ? AND status = 'OPEN'")
        .bind(tenant_id.unwrap_or("default"))
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_trade).collect()
}

pub async fn find_dca_count_by_symbol(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
    symbol: &str,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "SELECT dca_count FROM trades WHERE tenant_id = ? AND symbol = ? AND status = 'OPEN' LIMIT 1",
    )
    .bind(tenant_id.unwrap_or("default"))
    .bind(symbol)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.try_get::<i64, _>("dca_count")).transpose()?.unwrap_or(0))
}

pub async fn find_closed_trades_between(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Trade>, StoreError> {
    let rows = sqlx::query(
        "SELECT * FROM trades WHERE tenant_id = ? AND status = 'CLOSED' AND exit_time >= ? AND exit_time < ?",
    )
    .bind(tenant_id.unwrap_or("default"))
    .bind(from.to_rfc3339())
    .bind(to.to_rfc3339())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(row_to_trade).collect()
}

/// Signed sum of today's realized loss (`spec.md` §4.1.1 step 3): only
/// trades with a negative `net_profit` count, and the result is returned as
/// a positive magnitude so callers compare it directly against
/// `max_daily_loss_usdt`.
pub async fn sum_today_realized_loss(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
) -> Result<Decimal, StoreError> {
    let start_of_day = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc();
    let rows = sqlx::query(
        "SELECT net_profit FROM trades WHERE tenant_id = ? AND status = 'CLOSED' AND exit_time >= ? AND net_profit IS NOT NULL",
    )
    .bind(tenant_id.unwrap_or("default"))
    .bind(start_of_day.to_rfc3339())
    .fetch_all(pool)
    .await?;

    let mut loss = Decimal::ZERO;
    for row in rows {
        let value = decimal(row.try_get("net_profit")?)?;
        if value < Decimal::ZERO {
            loss += -value;
        }
    }
    Ok(loss)
}

pub async fn insert(tx: &mut Transaction<'_, Sqlite>, trade: &Trade) -> Result<(), StoreError> {
    let side_str = match trade.side {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    };
    let status_str = status_str(trade.status);
    let take_profits_json = serde_json::to_string(&trade.take_profits)?;
    let tp_client_order_ids_json = serde_json::to_string(&trade.tp_client_order_ids)?;

    sqlx::query(
        r#"INSERT INTO trades (
            trade_id, tenant_id, symbol, side, entry_price, entry_quantity, entry_time,
            entry_order_id, stop_loss, take_profits, sl_client_order_id, tp_client_order_ids,
            leverage, risk_amount, entry_commission,
            signal_hash, status, dca_count, total_closed_quantity, remaining_quantity,
            exit_price, exit_quantity, exit_time, exit_order_id, exit_reason,
            gross_profit, commission, net_profit, source_platform, source_channel,
            created_at, updated_at
        ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(&trade.trade_id)
    .bind(&trade.tenant_id)
    .bind(&trade.symbol)
    .bind(side_str)
    .bind(trade.entry_price.to_string())
    .bind(trade.entry_quantity.to_string())
    .bind(trade.entry_time.to_rfc3339())
    .bind(&trade.entry_order_id)
    .bind(trade.stop_loss.to_string())
    .bind(&take_profits_json)
    .bind(&trade.sl_client_order_id)
    .bind(&tp_client_order_ids_json)
    .bind(trade.leverage as i64)
    .bind(trade.risk_amount.to_string())
    .bind(trade.entry_commission.to_string())
    .bind(&trade.signal_hash)
    .bind(status_str)
    .bind(trade.dca_count)
    .bind(trade.total_closed_quantity.to_string())
    .bind(trade.remaining_quantity.map(|d| d.to_string()))
    .bind(trade.exit_price.map(|d| d.to_string()))
    .bind(trade.exit_quantity.map(|d| d.to_string()))
    .bind(trade.exit_time.map(|t| t.to_rfc3339()))
    .bind(&trade.exit_order_id)
    .bind(&trade.exit_reason)
    .bind(trade.gross_profit.map(|d| d.to_string()))
    .bind(trade.commission.map(|d| d.to_string()))
    .bind(trade.net_profit.map(|d| d.to_string()))
    .bind(&trade.source_platform)
    .bind(&trade.source_channel)
    .bind(trade.created_at.to_rfc3339())
    .bind(trade.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn status_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Open => "OPEN",
        TradeStatus::Closed => "CLOSED",
        TradeStatus::Cancelled => "CANCELLED",
    }
}

pub async fn update(tx: &mut Transaction<'_, Sqlite>, trade: &Trade) -> Result<(), StoreError> {
    let status_str = status_str(trade.status);
    let take_profits_json = serde_json::to_string(&trade.take_profits)?;
    let tp_client_order_ids_json = serde_json::to_string(&trade.tp_client_order_ids)?;

    sqlx::query(
        r#"UPDATE trades SET
            entry_price = ?, entry_quantity = ?, stop_loss = ?, take_profits = ?,
            sl_client_order_id = ?, tp_client_order_ids = ?,
            risk_amount = ?, entry_commission = ?, status = ?, dca_count = ?,
            total_closed_quantity = ?, remaining_quantity = ?,
            exit_price = ?, exit_quantity = ?, exit_time = ?, exit_order_id = ?, exit_reason = ?,
            gross_profit = ?, commission = ?, net_profit = ?, updated_at = ?
        WHERE trade_id = ?"#,
    )
    .bind(trade.entry_price.to_string())
    .bind(trade.entry_quantity.to_string())
    .bind(trade.stop_loss.to_string())
    .bind(&take_profits_json)
    .bind(&trade.sl_client_order_id)
    .bind(&tp_client_order_ids_json)
    .bind(trade.risk_amount.to_string())
    .bind(trade.entry_commission.to_string())
    .bind(status_str)
    .bind(trade.dca_count)
    .bind(trade.total_closed_quantity.to_string())
    .bind(trade.remaining_quantity.map(|d| d.to_string()))
    .bind(trade.exit_price.map(|d| d.to_string()))
    .bind(trade.exit_quantity.map(|d| d.to_string()))
    .bind(trade.exit_time.map(|t| t.to_rfc3339()))
    .bind(&trade.exit_order_id)
    .bind(&trade.exit_reason)
    .bind(trade.gross_profit.map(|d| d.to_string()))
    .bind(trade.commission.map(|d| d.to_string()))
    .bind(trade.net_profit.map(|d| d.to_string()))
    .bind(trade.updated_at.to_rfc3339())
    .bind(&trade.trade_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Clears `OPEN` trades whose `entry_time` is older than `older_than` and
/// for which the reconciler has not touched a row since — a defensive
/// sweep against a crash between the exchange write and the persistence
/// write leaving an orphaned row (`spec.md` §4.6.3).
pub async fn cleanup_stale(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE trades SET status = 'CANCELLED', exit_reason = 'stale_cleanup', updated_at = ?
         WHERE status = 'OPEN' AND entry_time < ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(older_than.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
