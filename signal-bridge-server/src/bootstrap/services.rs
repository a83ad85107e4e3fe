use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::config_resolver::build_tenant_registry;
use crate::dedup::DedupCache;
use crate::engine::ExecutionEngine;
use crate::exchange::{RestExchangeClient, TungsteniteUserStream};
use crate::fanout::FanoutService;
use crate::locks::SymbolLockRegistry;
use crate::notify::LoggingNotificationSink;
use crate::persistence::{Database, SqliteTradeStore};
use crate::ports::{ExchangePort, NotificationSink, TradeStore, UserStreamPort};
use crate::reconciler::StreamReconciler;
use crate::tenant::TenantRegistry;

/// A horizon past which an `OPEN` trade with no corresponding exchange
/// activity is presumed orphaned by a crash between the exchange write and
/// the persistence write (`spec.md` §4.6.3). No cadence is specified by the
/// distillation; a day is generous enough that a slow fill never trips it.
const STALE_TRADE_HORIZON: chrono::Duration = chrono::Duration::hours(24);
const STALE_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Every long-lived service this process holds, wired once at startup and
/// handed to whichever entry point (the `main` binary, or a test harness)
/// drives them. Mirrors `relay-server::bootstrap::services::ServiceRegistry`'s
/// shape: one struct of `Arc`s, built in dependency order.
pub struct ServiceRegistry {
    pub store: Arc<dyn TradeStore>,
    pub tenants: Arc<TenantRegistry>,
    pub engine: Arc<ExecutionEngine>,
    pub fanout: Arc<FanoutService>,
    pub exchange: Arc<dyn ExchangePort>,
    pub user_stream: Arc<dyn UserStreamPort>,
    pub notifier: Arc<dyn NotificationSink>,
    pub dedup: DedupCache,
}

pub async fn setup(config: &Config) -> Result<ServiceRegistry> {
    let database = Database::connect(&config.database.url)
        .await
        .context("connecting to trade database")?;
    info!(url = %config.database.url, "database connected");
    let store: Arc<dyn TradeStore> = Arc::new(SqliteTradeStore::new(Arc::new(database)));

    let tenants = Arc::new(build_tenant_registry(config));
    info!(count = tenants.all().len(), mode = ?config.mode, "tenant registry built");

    let rest_client = Arc::new(RestExchangeClient::new(
        config.exchange.rest_base_url.clone(),
        config.exchange.recv_window_ms,
    ));
    let exchange: Arc<dyn ExchangePort> = rest_client.clone();
    let user_stream: Arc<dyn UserStreamPort> = Arc::new(TungsteniteUserStream::new(
        rest_client,
        config.exchange.ws_base_url.clone(),
    ));

    let notifier: Arc<dyn NotificationSink> = Arc::new(LoggingNotificationSink);
    let locks = SymbolLockRegistry::new();
    let dedup = DedupCache::new();

    let engine = Arc::new(ExecutionEngine::new(
        exchange.clone(),
        store.clone(),
        notifier.clone(),
        locks.clone(),
        dedup.clone(),
    ));

    let fanout = Arc::new(FanoutService::new(engine.clone(), tenants.clone()));

    spawn_reconcilers(&tenants, exchange.clone(), user_stream.clone(), store.clone(), notifier.clone(), locks);
    spawn_stale_cleanup(store.clone());

    Ok(ServiceRegistry {
        store,
        tenants,
        engine,
        fanout,
        exchange,
        user_stream,
        notifier,
        dedup,
    })
}

/// One `StreamReconciler::run` task per eligible tenant (`spec.md` §4.2,
/// §9 design note: one connection per tenant, not a shared one).
fn spawn_reconcilers(
    tenants: &Arc<TenantRegistry>,
    exchange: Arc<dyn ExchangePort>,
    user_stream: Arc<dyn UserStreamPort>,
    store: Arc<dyn TradeStore>,
    notifier: Arc<dyn NotificationSink>,
    locks: SymbolLockRegistry,
) {
    let reconciler = Arc::new(StreamReconciler::new(exchange, user_stream, store, notifier, locks));
    for tenant in tenants.all() {
        let Some(ctx) = tenants.ctx_for(&tenant.tenant_id) else {
            continue;
        };
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.run(ctx).await });
    }
    info!(count = tenants.all().len(), "stream reconcilers spawned");
}

fn spawn_stale_cleanup(store: Arc<dyn TradeStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STALE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - STALE_TRADE_HORIZON;
            match store.cleanup_stale_trades(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "cleared stale open trades"),
                Err(e) => tracing::error!(error = %e, "stale trade cleanup failed"),
            }
        }
    });
}
