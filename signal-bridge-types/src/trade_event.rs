use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeEventType {
    EntryPlaced,
    SlPlaced,
    TpPlaced,
    DcaEntry,
    MoveSl,
    PartialClose,
    ClosePlaced,
    CancelPlaced,
    StreamClose,
    StreamPartialClose,
    SlLost,
    TpLost,
    SlPartialFill,
    TpPartialFill,
    FailSafe,
    Cancel,
}

/// An append-only log entry tied to a `Trade`. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: String,
    pub event_type: TradeEventType,
    pub exchange_order_id: Option<String>,
    pub side: Option<String>,
    pub order_type: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub success: bool,
    pub error_message: Option<String>,
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(trade_id: impl Into<String>, event_type: TradeEventType) -> Self {
        Self {
            trade_id: trade_id.into(),
            event_type,
            exchange_order_id: None,
            side: None,
            order_type: None,
            price: None,
            quantity: None,
            success: true,
            error_message: None,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_order(
        mut self,
        exchange_order_id: Option<String>,
        side: impl Into<String>,
        order_type: impl Into<String>,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        self.exchange_order_id = exchange_order_id;
        self.side = Some(side.into());
        self.order_type = Some(order_type.into());
        self.price = Some(price);
        self.quantity = Some(quantity);
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
