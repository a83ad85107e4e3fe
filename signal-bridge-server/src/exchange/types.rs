use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// BUY opens/adds to LONG, SELL opens/adds to SHORT.
    pub fn for_entry(side: signal_bridge_types::Side) -> Self {
        match side {
            signal_bridge_types::Side::Long => OrderSide::Buy,
            signal_bridge_types::Side::Short => OrderSide::Sell,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

/// The signed position the venue reports for one symbol: positive for
/// LONG, negative for SHORT, zero for flat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionInfo {
    pub quantity: Decimal,
}

impl PositionInfo {
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn side(&self) -> Option<signal_bridge_types::Side> {
        if self.quantity > Decimal::ZERO {
            Some(signal_bridge_types::Side::Long)
        } else if self.quantity < Decimal::ZERO {
            Some(signal_bridge_types::Side::Short)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub avg_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolInfo {
    pub price_tick: Decimal,
    pub quantity_step: Decimal,
}

impl SymbolInfo {
    /// Round a quantity down to the symbol's step size (exchange tick
    /// rules, `spec.md` §4.1.2).
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.quantity_step.is_zero() {
            return quantity;
        }
        (quantity / self.quantity_step).floor() * self.quantity_step
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.price_tick.is_zero() {
            return price;
        }
        (price / self.price_tick).round() * self.price_tick
    }
}

/// A parsed `ORDER_TRADE_UPDATE` user-data-stream event (`spec.md` §6.3).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTradeUpdate {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub avg_price: Decimal,
    pub filled_quantity: Decimal,
    pub orig_quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub realized_profit: Decimal,
    pub transaction_time: DateTime<Utc>,
}

/// The exchange's top-level user-data-stream event envelope. Only
/// `ORDER_TRADE_UPDATE` carries trade data; `ACCOUNT_UPDATE` is ignored and
/// `listenKeyExpired` triggers a reconnect (`spec.md` §6.3).
#[derive(Debug, Clone, PartialEq)]
pub enum UserStreamEvent {
    OrderTradeUpdate(OrderTradeUpdate),
    AccountUpdate,
    ListenKeyExpired,
    Other,
}
