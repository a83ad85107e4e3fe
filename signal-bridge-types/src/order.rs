use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The outcome of one attempted exchange write. The execution engine returns
/// an ordered `Vec<OrderResult>`, one per call attempted, so a caller can see
/// exactly how far an operation got before failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_type: String,
    pub side: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub error_message: Option<String>,
}

impl OrderResult {
    pub fn ok(order_type: impl Into<String>, side: impl Into<String>) -> OrderResultBuilder {
        OrderResultBuilder {
            success: true,
            order_type: order_type.into(),
            side: Some(side.into()),
            price: None,
            quantity: None,
            exchange_order_id: None,
            error_message: None,
        }
    }

    pub fn failed(order_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_type: order_type.into(),
            side: None,
            price: None,
            quantity: None,
            exchange_order_id: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Small builder so call sites don't repeat every `OrderResult` field.
pub struct OrderResultBuilder {
    success: bool,
    order_type: String,
    side: Option<String>,
    price: Option<Decimal>,
    quantity: Option<Decimal>,
    exchange_order_id: Option<String>,
    error_message: Option<String>,
}

impl OrderResultBuilder {
    pub fn price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    pub fn build(self) -> OrderResult {
        OrderResult {
            success: self.success,
            order_type: self.order_type,
            side: self.side,
            price: self.price,
            quantity: self.quantity,
            exchange_order_id: self.exchange_order_id,
            error_message: self.error_message,
        }
    }
}
