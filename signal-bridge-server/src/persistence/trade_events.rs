use sqlx::{Sqlite, Transaction};

use signal_bridge_types::TradeEvent;

use crate::error::StoreError;

fn event_type_str(event: &TradeEvent) -> &'static str {
    use signal_bridge_types::TradeEventType::*;
    match event.event_type {
        EntryPlaced => "ENTRY_PLACED",
        SlPlaced => "SL_PLACED",
        TpPlaced => "TP_PLACED",
        DcaEntry => "DCA_ENTRY",
        MoveSl => "MOVE_SL",
        PartialClose => "PARTIAL_CLOSE",
        ClosePlaced => "CLOSE_PLACED",
        CancelPlaced => "CANCEL_PLACED",
        StreamClose => "STREAM_CLOSE",
        StreamPartialClose => "STREAM_PARTIAL_CLOSE",
        SlLost => "SL_LOST",
        TpLost => "TP_LOST",
        SlPartialFill => "SL_PARTIAL_FILL",
        TpPartialFill => "TP_PARTIAL_FILL",
        FailSafe => "FAIL_SAFE",
        Cancel => "CANCEL",
    }
}

pub async fn insert_one(
    tx: &mut Transaction<'_, Sqlite>,
    event: &TradeEvent,
) -> Result<(), StoreError> {
    let detail_json = event
        .detail
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"INSERT INTO trade_events (
            trade_id, event_type, exchange_order_id, side, order_type, price, quantity,
            success, error_message, detail, created_at
        ) VALUES (?,?,?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(&event.trade_id)
    .bind(event_type_str(event))
    .bind(&event.exchange_order_id)
    .bind(&event.side)
    .bind(&event.order_type)
    .bind(event.price.map(|d| d.to_string()))
    .bind(event.quantity.map(|d| d.to_string()))
    .bind(event.success)
    .bind(&event.error_message)
    .bind(&detail_json)
    .bind(event.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_all(
    tx: &mut Transaction<'_, Sqlite>,
    events: &[TradeEvent],
) -> Result<(), StoreError> {
    for event in events {
        insert_one(tx, event).await?;
    }
    Ok(())
}
