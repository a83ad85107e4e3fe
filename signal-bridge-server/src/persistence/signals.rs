use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use signal_bridge_types::SignalExecutionStatus;

use crate::error::StoreError;

fn status_str(status: SignalExecutionStatus) -> &'static str {
    match status {
        SignalExecutionStatus::Executed => "EXECUTED",
        SignalExecutionStatus::Rejected => "REJECTED",
        SignalExecutionStatus::Ignored => "IGNORED",
        SignalExecutionStatus::Failed => "FAILED",
    }
}

/// Layer-2 dedup backstop (`spec.md` §4.3.4): the in-memory `DedupCache`
/// handles the hot path, this query catches duplicates that arrive after a
/// process restart has emptied the cache.
pub async fn exists_by_signal_hash_and_created_at_after(
    pool: &SqlitePool,
    signal_hash: &str,
    cutoff: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let row = sqlx::query(
        "SELECT 1 FROM signal_audit WHERE signal_hash = ? AND created_at >= ? LIMIT 1",
    )
    .bind(signal_hash)
    .bind(cutoff.to_rfc3339())
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &SqlitePool,
    tenant_id: Option<&str>,
    signal_hash: &str,
    action: &str,
    symbol: &str,
    status: SignalExecutionStatus,
    rejection_reason: Option<&str>,
    trade_id: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO signal_audit (
            tenant_id, signal_hash, action, symbol, status, rejection_reason, trade_id, created_at
        ) VALUES (?,?,?,?,?,?,?,?)"#,
    )
    .bind(tenant_id)
    .bind(signal_hash)
    .bind(action)
    .bind(symbol)
    .bind(status_str(status))
    .bind(rejection_reason)
    .bind(trade_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
