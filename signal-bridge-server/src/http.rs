//! Minimal operational HTTP surface (`spec.md` §3.6 expansion): health check
//! and a read-only stats snapshot. Deliberately not the teacher's TLS
//! dashboard server (`bootstrap::server`, `api::create_router`) — just
//! enough for an operator or orchestrator to probe this process.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::dedup::DedupCache;
use crate::ports::TradeStore;
use crate::tenant::TenantRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TradeStore>,
    pub tenants: Arc<TenantRegistry>,
    pub dedup: DedupCache,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct StatsResponse {
    tenants_configured: usize,
    tenants_eligible_for_fanout: usize,
    dedup_cache_entries: usize,
    open_trades: Vec<TenantOpenTrades>,
}

#[derive(Serialize)]
struct TenantOpenTrades {
    tenant_id: String,
    open_trade_count: usize,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let tenants = state.tenants.all();
    let mut open_trades = Vec::with_capacity(tenants.len());
    for tenant in &tenants {
        let count = state
            .store
            .find_all_open_trades(Some(&tenant.tenant_id))
            .await
            .map(|trades| trades.len())
            .unwrap_or(0);
        open_trades.push(TenantOpenTrades {
            tenant_id: tenant.tenant_id.clone(),
            open_trade_count: count,
        });
    }

    Json(StatsResponse {
        tenants_configured: tenants.len(),
        tenants_eligible_for_fanout: state.tenants.eligible().len(),
        dedup_cache_entries: state.dedup.len().await,
        open_trades,
    })
}
