use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::ExchangeError;
use crate::exchange::types::{OrderStatus, OrderTradeUpdate, UserStreamEvent};
use crate::ports::UserStreamPort;
use crate::tenant::TenantCtx;
use crate::exchange::client::RestExchangeClient;

/// Manages the venue's listen-key lifecycle (create/keepalive/delete) over
/// the same signed REST surface `RestExchangeClient` already speaks
/// (`spec.md` §4.2.1, §6.3). The socket read loop lives in
/// `crate::reconciler`; this type only owns the REST handshake plus the
/// base URL the reconciler dials.
pub struct TungsteniteUserStream {
    rest: std::sync::Arc<RestExchangeClient>,
    ws_base_url: String,
}

impl TungsteniteUserStream {
    pub fn new(rest: std::sync::Arc<RestExchangeClient>, ws_base_url: String) -> Self {
        Self { rest, ws_base_url }
    }
}

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[async_trait]
impl UserStreamPort for TungsteniteUserStream {
    async fn create_listen_key(&self, ctx: &TenantCtx) -> Result<String, ExchangeError> {
        let body: ListenKeyResponse = self
            .rest
            .signed_post(ctx, "/fapi/v1/listenKey", vec![])
            .await?;
        Ok(body.listen_key)
    }

    async fn keepalive_listen_key(
        &self,
        ctx: &TenantCtx,
        key: &str,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .rest
            .signed_put(ctx, "/fapi/v1/listenKey", vec![("listenKey".to_string(), key.to_string())])
            .await?;
        Ok(())
    }

    async fn delete_listen_key(&self, ctx: &TenantCtx, key: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .rest
            .signed_delete(
                ctx,
                "/fapi/v1/listenKey",
                vec![("listenKey".to_string(), key.to_string())],
            )
            .await?;
        Ok(())
    }

    fn ws_base_url(&self) -> String {
        self.ws_base_url.clone()
    }
}

/// Dial the user-data-stream socket at `{ws_base_url}/ws/{listen_key}` and
/// return the connected stream split into a reader the reconciler polls.
pub async fn connect(
    ws_base_url: &str,
    listen_key: &str,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, ExchangeError> {
    let url = format!("{ws_base_url}/{listen_key}");
    debug!(url, "connecting user-data-stream websocket");
    let (stream, _) = connect_async(&url)
        .await
        .map_err(|e| ExchangeError::Stream(e.to_string()))?;
    Ok(stream)
}

/// Parse one raw text frame into a `UserStreamEvent`. Unrecognized envelopes
/// decode to `UserStreamEvent::Other` rather than erroring, since the stream
/// carries event types this bridge has no interest in (`spec.md` §6.3).
pub fn parse_event(raw: &str) -> Result<UserStreamEvent, ExchangeError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)
        .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
    match envelope.event_type.as_str() {
        "ORDER_TRADE_UPDATE" => {
            let order = envelope
                .order
                .ok_or_else(|| ExchangeError::InvalidResponse("missing order payload".into()))?;
            Ok(UserStreamEvent::OrderTradeUpdate(order.try_into()?))
        }
        "ACCOUNT_UPDATE" => Ok(UserStreamEvent::AccountUpdate),
        "listenKeyExpired" => Ok(UserStreamEvent::ListenKeyExpired),
        other => {
            warn!(event_type = other, "ignoring unrecognized user-stream event");
            Ok(UserStreamEvent::Other)
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "o")]
    order: Option<RawOrder>,
}

#[derive(Deserialize)]
struct RawOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "ap")]
    avg_price: String,
    #[serde(rename = "z")]
    filled_quantity: String,
    #[serde(rename = "q")]
    orig_quantity: String,
    #[serde(rename = "n")]
    commission: String,
    #[serde(rename = "N")]
    commission_asset: Option<String>,
    #[serde(rename = "rp")]
    realized_profit: String,
    #[serde(rename = "T")]
    transaction_time: i64,
}

impl TryFrom<RawOrder> for OrderTradeUpdate {
    type Error = ExchangeError;

    fn try_from(raw: RawOrder) -> Result<Self, Self::Error> {
        use rust_decimal::Decimal;
        use std::str::FromStr;
        let decimal = |s: &str| {
            Decimal::from_str(s).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
        };
        Ok(OrderTradeUpdate {
            symbol: raw.symbol,
            order_id: raw.order_id.to_string(),
            client_order_id: raw.client_order_id,
            order_type: match raw.order_type.as_str() {
                "LIMIT" => crate::exchange::types::OrderType::Limit,
                "MARKET" => crate::exchange::types::OrderType::Market,
                "STOP_MARKET" => crate::exchange::types::OrderType::StopMarket,
                _ => crate::exchange::types::OrderType::TakeProfitMarket,
            },
            side: if raw.side == "BUY" {
                crate::exchange::types::OrderSide::Buy
            } else {
                crate::exchange::types::OrderSide::Sell
            },
            status: match raw.status.as_str() {
                "NEW" => OrderStatus::New,
                "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
                "FILLED" => OrderStatus::Filled,
                "CANCELED" => OrderStatus::Canceled,
                "EXPIRED" => OrderStatus::Expired,
                _ => OrderStatus::Rejected,
            },
            avg_price: decimal(&raw.avg_price)?,
            filled_quantity: decimal(&raw.filled_quantity)?,
            orig_quantity: decimal(&raw.orig_quantity)?,
            commission: decimal(&raw.commission)?,
            commission_asset: raw.commission_asset.unwrap_or_default(),
            realized_profit: decimal(&raw.realized_profit)?,
            transaction_time: chrono::DateTime::from_timestamp_millis(raw.transaction_time)
                .unwrap_or_else(chrono::Utc::now),
        })
    }
}

/// Send a websocket ping; the exchange expects the client to answer pong
/// frames within the connection's idle window to stay alive.
pub async fn send_pong(
    socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    payload: Vec<u8>,
) -> Result<(), ExchangeError> {
    socket
        .send(Message::Pong(payload))
        .await
        .map_err(|e| ExchangeError::Stream(e.to_string()))
}

pub async fn next_text_frame(
    socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Option<Result<Message, ExchangeError>> {
    socket
        .next()
        .await
        .map(|r| r.map_err(|e| ExchangeError::Stream(e.to_string())))
}
