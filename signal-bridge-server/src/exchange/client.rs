use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::ExchangeError;
use crate::exchange::signing::{sign_query, timestamp_ms};
use crate::exchange::types::{
    OpenOrder, OrderSide, OrderStatus, OrderType, PlacedOrder, PositionInfo, SymbolInfo,
};
use crate::ports::ExchangePort;
use crate::tenant::TenantCtx;

/// Signed + public REST client for the venue's USDT-margined futures API
/// (`spec.md` §4.5, §6.2). Mirrors `deribit-http::DeribitHttpClient`'s shape:
/// one `reqwest::Client`, one base URL, signing applied per-request rather
/// than baked into a middleware layer.
pub struct RestExchangeClient {
    http: reqwest::Client,
    rest_base_url: String,
    recv_window_ms: u64,
}

impl RestExchangeClient {
    pub fn new(rest_base_url: String, recv_window_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base_url,
            recv_window_ms,
        }
    }

    pub(crate) async fn signed_get<T: for<'de> Deserialize<'de>>(
        &self,
        ctx: &TenantCtx,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let creds = &ctx.credentials;
        params.push(("timestamp".to_string(), timestamp_ms(Utc::now()).to_string()));
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_query(&creds.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.rest_base_url, path, query, signature);
        debug!(path, "sending signed GET");
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub(crate) async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        ctx: &TenantCtx,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let creds = &ctx.credentials;
        params.push(("timestamp".to_string(), timestamp_ms(Utc::now()).to_string()));
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_query(&creds.api_secret, &query)?;
        let url = format!("{}{}", self.rest_base_url, path);
        let body = format!("{}&signature={}", query, signature);
        debug!(path, "sending signed POST");
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub(crate) async fn signed_put<T: for<'de> Deserialize<'de>>(
        &self,
        ctx: &TenantCtx,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let creds = &ctx.credentials;
        params.push(("timestamp".to_string(), timestamp_ms(Utc::now()).to_string()));
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_query(&creds.api_secret, &query)?;
        let url = format!("{}{}", self.rest_base_url, path);
        let body = format!("{}&signature={}", query, signature);
        debug!(path, "sending signed PUT");
        let resp = self
            .http
            .put(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        parse_response(resp).await
    }

    pub(crate) async fn signed_delete<T: for<'de> Deserialize<'de>>(
        &self,
        ctx: &TenantCtx,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, ExchangeError> {
        let creds = &ctx.credentials;
        params.push(("timestamp".to_string(), timestamp_ms(Utc::now()).to_string()));
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_query(&creds.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.rest_base_url, path, query, signature);
        let resp = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
) -> Result<T, ExchangeError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<VenueErrorBody>(&text) {
            return Err(ExchangeError::Venue {
                code: err.code,
                msg: err.msg,
            });
        }
        return Err(ExchangeError::InvalidResponse(text));
    }
    serde_json::from_str(&text).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
}

#[derive(Deserialize)]
struct VenueErrorBody {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
struct BalanceEntry {
    asset: String,
    #[serde(rename = "availableBalance")]
    available_balance: String,
}

#[derive(Deserialize)]
struct PositionEntry {
    #[serde(rename = "positionAmt")]
    position_amt: String,
}

#[derive(Deserialize)]
struct OrderEntry {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    price: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    #[serde(rename = "clientOrderId")]
    client_order_id: Option<String>,
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Deserialize)]
struct OrderAck {
    #[serde(rename = "orderId")]
    order_id: i64,
    #[serde(rename = "clientOrderId")]
    client_order_id: Option<String>,
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
    #[serde(rename = "executedQty")]
    executed_qty: Option<String>,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Deserialize)]
struct ExchangeSymbol {
    symbol: String,
    filters: Vec<ExchangeFilter>,
}

#[derive(Deserialize)]
struct ExchangeFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
}

fn decimal(s: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(s).map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "LIMIT" => OrderType::Limit,
        "MARKET" => OrderType::Market,
        "STOP_MARKET" => OrderType::StopMarket,
        _ => OrderType::TakeProfitMarket,
    }
}

fn parse_order_side(s: &str) -> OrderSide {
    if s == "BUY" {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    }
}

#[async_trait]
impl ExchangePort for RestExchangeClient {
    #[instrument(skip(self, ctx))]
    async fn get_balance(&self, ctx: &TenantCtx) -> Result<Decimal, ExchangeError> {
        let entries: Vec<BalanceEntry> = self.signed_get(ctx, "/fapi/v2/balance", vec![]).await?;
        entries
            .into_iter()
            .find(|e| e.asset == "USDT")
            .map(|e| decimal(&e.available_balance))
            .transpose()?
            .ok_or_else(|| ExchangeError::InvalidResponse("no USDT balance entry".into()))
    }

    async fn get_position(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
    ) -> Result<PositionInfo, ExchangeError> {
        let entries: Vec<PositionEntry> = self
            .signed_get(
                ctx,
                "/fapi/v2/positionRisk",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await?;
        let quantity = entries
            .into_iter()
            .next()
            .map(|e| decimal(&e.position_amt))
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        Ok(PositionInfo { quantity })
    }

    async fn get_open_orders(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
    ) -> Result<Vec<OpenOrder>, ExchangeError> {
        let entries: Vec<OrderEntry> = self
            .signed_get(
                ctx,
                "/fapi/v1/openOrders",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await?;
        entries
            .into_iter()
            .map(|e| {
                Ok(OpenOrder {
                    order_id: e.order_id.to_string(),
                    order_type: parse_order_type(&e.order_type),
                    side: parse_order_side(&e.side),
                    price: decimal(&e.price)?,
                    quantity: decimal(&e.orig_qty)?,
                    client_order_id: e.client_order_id,
                })
            })
            .collect()
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.rest_base_url, symbol
        );
        let resp = self.http.get(&url).send().await?;
        let body: TickerPrice = parse_response(resp).await?;
        decimal(&body.price)
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ExchangeError> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.rest_base_url);
        let resp = self.http.get(&url).send().await?;
        let info: ExchangeInfo = parse_response(resp).await?;
        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("unknown symbol {symbol}")))?;
        let mut price_tick = Decimal::new(1, 2);
        let mut quantity_step = Decimal::new(1, 3);
        for filter in sym.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => {
                    if let Some(tick) = filter.tick_size {
                        price_tick = decimal(&tick)?;
                    }
                }
                "LOT_SIZE" => {
                    if let Some(step) = filter.step_size {
                        quantity_step = decimal(&step)?;
                    }
                }
                _ => {}
            }
        }
        Ok(SymbolInfo {
            price_tick,
            quantity_step,
        })
    }

    async fn cancel_order(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_delete(
                ctx,
                "/fapi/v1/order",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("orderId".to_string(), order_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, ctx: &TenantCtx, symbol: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_delete(
                ctx,
                "/fapi/v1/allOpenOrders",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn place_limit(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<PlacedOrder, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side_str(side).to_string()),
            ("type".to_string(), "LIMIT".to_string()),
            ("timeInForce".to_string(), "GTC".to_string()),
            ("price".to_string(), price.to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        let ack: OrderAck = self.signed_post(ctx, "/fapi/v1/order", params).await?;
        placed_order(ack)
    }

    async fn place_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<PlacedOrder, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side_str(side).to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        let ack: OrderAck = self.signed_post(ctx, "/fapi/v1/order", params).await?;
        placed_order(ack)
    }

    async fn place_stop_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        stop_price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<PlacedOrder, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side_str(side).to_string()),
            ("type".to_string(), "STOP_MARKET".to_string()),
            ("stopPrice".to_string(), stop_price.to_string()),
            ("quantity".to_string(), quantity.to_string()),
            ("reduceOnly".to_string(), "true".to_string()),
            ("newClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let ack: OrderAck = with_retry(|| self.signed_post(ctx, "/fapi/v1/order", params.clone())).await?;
        placed_order(ack)
    }

    async fn place_take_profit_market(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        side: OrderSide,
        trigger_price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<PlacedOrder, ExchangeError> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side_str(side).to_string()),
            ("type".to_string(), "TAKE_PROFIT_MARKET".to_string()),
            ("stopPrice".to_string(), trigger_price.to_string()),
            ("quantity".to_string(), quantity.to_string()),
            ("reduceOnly".to_string(), "true".to_string()),
            ("newClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let ack: OrderAck = with_retry(|| self.signed_post(ctx, "/fapi/v1/order", params.clone())).await?;
        placed_order(ack)
    }

    async fn set_leverage(
        &self,
        ctx: &TenantCtx,
        symbol: &str,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                ctx,
                "/fapi/v1/leverage",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("leverage".to_string(), leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_isolated_margin(&self, ctx: &TenantCtx, symbol: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed_post(
                ctx,
                "/fapi/v1/marginType",
                vec![
                    ("symbol".to_string(), symbol.to_string()),
                    ("marginType".to_string(), "ISOLATED".to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Protective-order placement gets 3 attempts with 1s/3s backoff, but only
/// for network-layer failures (`spec.md` §4.1.6) — a venue rejection is
/// never transient, so retrying it would just resend the same bad request.
async fn with_retry<T, F, Fut>(mut f: F) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    const BACKOFFS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(ExchangeError::Network(e)) if attempt < BACKOFFS.len() => {
                warn!(attempt, error = %e, "network error placing order, retrying");
                tokio::time::sleep(BACKOFFS[attempt]).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn placed_order(ack: OrderAck) -> Result<PlacedOrder, ExchangeError> {
    Ok(PlacedOrder {
        order_id: ack.order_id.to_string(),
        client_order_id: ack.client_order_id,
        avg_price: ack.avg_price.map(|s| decimal(&s)).transpose()?,
        filled_quantity: ack.executed_qty.map(|s| decimal(&s)).transpose()?,
    })
}
