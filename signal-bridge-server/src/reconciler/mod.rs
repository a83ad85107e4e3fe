//! Stream reconciler: keeps one user-data-stream connection alive per
//! tenant and folds `ORDER_TRADE_UPDATE` events back into the Trade store
//! (`spec.md` §4.2). Runs independently of the execution engine — a signal
//! can open a trade the reconciler later closes from a stream fill, and a
//! stream fill can close a trade no signal ever touches again.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::exchange::stream;
use crate::exchange::types::UserStreamEvent;
use crate::locks::SymbolLockRegistry;
use crate::ports::{ExchangePort, NotificationSink, Severity, TradeStore, UserStreamPort};
use crate::tenant::TenantCtx;

/// Listen keys expire after 60 minutes without a keepalive; refresh well
/// inside that window (`spec.md` §4.2.1).
const LISTEN_KEY_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Reconnect backoff: doubles from 1s up to a 60s ceiling.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// After this many consecutive failed reconnect attempts, escalate the
/// notification severity from warning to critical.
const ESCALATION_THRESHOLD: u32 = 5;

/// Per-tenant mutable state the reconciler's read loop owns exclusively.
/// Wrapped in a `tokio::sync::Mutex` (not `RwLock`) since every access is a
/// write from the single task driving this tenant's connection
/// (`spec.md` §5 TenantStreamContext).
pub struct TenantStreamContext {
    pub listen_key: Mutex<Option<String>>,
}

impl Default for TenantStreamContext {
    fn default() -> Self {
        Self {
            listen_key: Mutex::new(None),
        }
    }
}

pub struct StreamReconciler {
    exchange: Arc<dyn ExchangePort>,
    user_stream: Arc<dyn UserStreamPort>,
    store: Arc<dyn TradeStore>,
    notifier: Arc<dyn NotificationSink>,
    locks: SymbolLockRegistry,
}

impl StreamReconciler {
    pub fn new(
        exchange: Arc<dyn ExchangePort>,
        user_stream: Arc<dyn UserStreamPort>,
        store: Arc<dyn TradeStore>,
        notifier: Arc<dyn NotificationSink>,
        locks: SymbolLockRegistry,
    ) -> Self {
        Self {
            exchange,
            user_stream,
            store,
            notifier,
            locks,
        }
    }

    /// Drive one tenant's connection forever: connect, read, reconnect with
    /// exponential backoff on any failure. Intended to be spawned as its
    /// own task per tenant by the bootstrap wiring.
    pub async fn run(&self, ctx: TenantCtx) {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;

        loop {
            match self.run_once(&ctx).await {
                Ok(()) => {
                    info!(tenant = ?ctx.scope(), "user-data-stream session ended cleanly, reconnecting");
                    backoff = INITIAL_BACKOFF;
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    warn!(tenant = ?ctx.scope(), error = %e, attempt, "user-data-stream session failed");
                    let severity = if attempt >= ESCALATION_THRESHOLD {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    self.notifier
                        .notify(
                            ctx.scope(),
                            "Stream reconnect",
                            &format!("attempt {attempt} after: {e}"),
                            severity,
                        )
                        .await;
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn run_once(&self, ctx: &TenantCtx) -> Result<(), crate::error::ExchangeError> {
        let listen_key = self.user_stream.create_listen_key(ctx).await?;
        let mut socket = stream::connect(&self.user_stream.ws_base_url(), &listen_key).await?;
        info!(tenant = ?ctx.scope(), "user-data-stream connected");

        let mut keepalive_due = tokio::time::Instant::now() + LISTEN_KEY_KEEPALIVE_INTERVAL;

        loop {
            let sleep_until_keepalive = tokio::time::sleep_until(keepalive_due);
            tokio::select! {
                _ = sleep_until_keepalive => {
                    if let Err(e) = self.user_stream.keepalive_listen_key(ctx, &listen_key).await {
                        warn!(error = %e, "listen key keepalive failed");
                    }
                    keepalive_due = tokio::time::Instant::now() + LISTEN_KEY_KEEPALIVE_INTERVAL;
                }
                frame = stream::next_text_frame(&mut socket) => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(ctx, &text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            stream::send_pong(&mut socket, payload).await?;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, ctx: &TenantCtx, text: &str) {
        let event = match stream::parse_event(text) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to parse user-data-stream frame");
                return;
            }
        };

        match event {
            UserStreamEvent::OrderTradeUpdate(update) => self.reconcile(ctx, update).await,
            UserStreamEvent::ListenKeyExpired => {
                warn!(tenant = ?ctx.scope(), "listen key expired, forcing reconnect");
            }
            UserStreamEvent::AccountUpdate | UserStreamEvent::Other => {}
        }
    }

    async fn reconcile(&self, ctx: &TenantCtx, update: crate::exchange::types::OrderTradeUpdate) {
        let _guard = self.locks.acquire(&update.symbol).await;

        let trade = match self.store.find_open_trade(ctx.scope(), &update.symbol).await {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to load open trade for reconciliation");
                return;
            }
        };

        let reaction = events::classify(
            &trade,
            &update,
            trade.sl_client_order_id.as_deref(),
            &trade.tp_client_order_ids,
        );

        match reaction {
            events::Reaction::Ignore => {}
            events::Reaction::StreamClose {
                exit_price,
                exit_quantity,
                commission,
                was_stop_loss,
                ..
            } => {
                let mut trade = trade;
                events::apply_stream_close(&mut trade, exit_price, exit_quantity, commission, was_stop_loss);
                let event_type = events::stream_close_event_type();
                let event = signal_bridge_types::TradeEvent::new(&trade.trade_id, event_type).with_order(
                    Some(update.order_id.clone()),
                    format!("{:?}", update.side),
                    format!("{:?}", update.order_type),
                    exit_price,
                    exit_quantity,
                );
                if let Err(e) = self.store.record_close_from_stream(&trade, &[event]).await {
                    error!(error = %e, trade_id = %trade.trade_id, "failed to persist stream close");
                }
                // The opposite protective order (TP if SL filled, or vice
                // versa) is now orphaned on the exchange; cancel it so it
                // can't execute against a position that no longer exists.
                if let Err(e) = self.exchange.cancel_all_orders(ctx, &trade.symbol).await {
                    warn!(error = %e, trade_id = %trade.trade_id, "failed to cancel orphaned protective order after stream close");
                }
            }
            events::Reaction::StreamPartialClose {
                filled_quantity,
                commission,
            } => {
                let mut trade = trade;
                trade.apply_partial_close(filled_quantity, commission);
                trade.updated_at = chrono::Utc::now();
                let event = signal_bridge_types::TradeEvent::new(&trade.trade_id, signal_bridge_types::TradeEventType::StreamPartialClose)
                    .with_order(
                        Some(update.order_id.clone()),
                        format!("{:?}", update.side),
                        format!("{:?}", update.order_type),
                        update.avg_price,
                        filled_quantity,
                    );
                if let Err(e) = self.store.record_close_from_stream(&trade, &[event]).await {
                    error!(error = %e, trade_id = %trade.trade_id, "failed to persist stream partial close");
                }
            }
            events::Reaction::ProtectionLost { was_stop_loss } => {
                let event_type = if was_stop_loss {
                    signal_bridge_types::TradeEventType::SlLost
                } else {
                    signal_bridge_types::TradeEventType::TpLost
                };
                let event = signal_bridge_types::TradeEvent::new(&trade.trade_id, event_type)
                    .failed("protective order cancelled or expired on the exchange");
                if let Err(e) = self.store.record_protection_lost(&trade.trade_id, &event).await {
                    error!(error = %e, trade_id = %trade.trade_id, "failed to persist protection-lost event");
                }
                self.notifier
                    .notify(
                        ctx.scope(),
                        "Protection lost",
                        &format!("{}: {} order is no longer on the exchange", trade.symbol, if was_stop_loss { "stop-loss" } else { "take-profit" }),
                        Severity::Critical,
                    )
                    .await;
            }
        }
    }
}
