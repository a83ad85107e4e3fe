//! Multi-tenant fan-out (`spec.md` §4.4): broadcast one validated signal to
//! every eligible tenant concurrently, each bound to its own
//! `TenantCtx`, with one tenant's failure never affecting another's.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, warn};

use signal_bridge_types::TradeSignal;

use crate::engine::ExecutionEngine;
use crate::tenant::TenantRegistry;

/// Shared pool sizing (`spec.md` §4.4): `MAX_CONCURRENT_JOBS` bounds how many
/// tenant jobs run at once; a fixed core pool isn't meaningful on tokio's own
/// work-stealing scheduler, so the cap here stands in for "core=10, max=50"
/// as the single concurrency ceiling.
const MAX_CONCURRENT_JOBS: usize = 50;
const JOB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct FanoutSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct FanoutService {
    engine: Arc<ExecutionEngine>,
    tenants: Arc<TenantRegistry>,
    permits: Arc<Semaphore>,
}

impl FanoutService {
    pub fn new(engine: Arc<ExecutionEngine>, tenants: Arc<TenantRegistry>) -> Self {
        Self {
            engine,
            tenants,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_JOBS)),
        }
    }

    /// Deliver `signal` to every eligible tenant. Each job binds its own
    /// `TenantCtx` so downstream code (persistence, exchange client,
    /// notification sink) transparently sees the correct tenant; isolation
    /// between tenants is structural, since `ExecutionEngine::execute`
    /// already never panics and always returns.
    pub async fn broadcast(&self, signal: &TradeSignal) -> FanoutSummary {
        let eligible = self.tenants.eligible();
        let mut handles = Vec::with_capacity(eligible.len());

        for tenant in eligible {
            let engine = self.engine.clone();
            let tenants = self.tenants.clone();
            let permits = self.permits.clone();
            let signal = signal.clone();
            let tenant_id = tenant.tenant_id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore never closed");
                let ctx = match tenants.ctx_for(&tenant_id) {
                    Some(ctx) => ctx,
                    None => {
                        warn!(tenant = %tenant_id, "tenant vanished from registry between eligibility check and job start");
                        return JobOutcome::Failed;
                    }
                };

                match tokio::time::timeout(JOB_TIMEOUT, engine.execute(&ctx, &signal)).await {
                    Ok(results) => {
                        if results.iter().all(|r| r.success) {
                            JobOutcome::Succeeded
                        } else {
                            JobOutcome::Failed
                        }
                    }
                    Err(_) => {
                        warn!(tenant = %tenant_id, "fan-out job exceeded 30s deadline, marking cancelled");
                        JobOutcome::Cancelled
                    }
                }
            }));
        }

        let mut summary = FanoutSummary::default();
        for handle in handles {
            match handle.await {
                Ok(JobOutcome::Succeeded) => summary.succeeded += 1,
                Ok(JobOutcome::Failed) => summary.failed += 1,
                Ok(JobOutcome::Cancelled) => summary.cancelled += 1,
                Err(e) => {
                    error!(error = %e, "fan-out job panicked");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupCache;
    use crate::locks::SymbolLockRegistry;
    use crate::ports::{MockExchangePort, MockNotificationSink, MockTradeStore};
    use crate::tenant::{ExchangeCredentials, Tenant};
    use rust_decimal::Decimal;
    use signal_bridge_types::{EffectiveTradeConfig, SignalAction};

    fn tenant(id: &str) -> Tenant {
        Tenant {
            tenant_id: id.to_string(),
            credentials: ExchangeCredentials {
                api_key: "k".into(),
                api_secret: "s".into(),
            },
            config: EffectiveTradeConfig {
                risk_percent: Decimal::new(2, 2),
                max_position_usdt: Decimal::new(50000, 0),
                max_daily_loss_usdt: Decimal::new(1000, 0),
                max_dca_per_symbol: 3,
                dca_risk_multiplier: Decimal::new(2, 0),
                fixed_leverage: 20,
                allowed_symbols: vec!["BTCUSDT".to_string()],
                dedup_enabled: true,
                default_symbol: None,
            },
            enabled: true,
            auto_trade_enabled: true,
        }
    }

    #[tokio::test]
    async fn one_tenant_failure_does_not_block_others() {
        let mut store = MockTradeStore::new();
        store.expect_record_signal_audit().returning(|_, _, _, _, _, _, _| Ok(()));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(MockExchangePort::new()),
            Arc::new(store),
            Arc::new(MockNotificationSink::new()),
            SymbolLockRegistry::new(),
            DedupCache::new(),
        ));
        let registry = Arc::new(TenantRegistry::new(vec![tenant("a"), tenant("b")]));
        let fanout = FanoutService::new(engine, registry);

        let signal = TradeSignal {
            action: SignalAction::Info,
            symbol: "BTCUSDT".to_string(),
            side: None,
            entry_price_low: None,
            entry_price_high: None,
            stop_loss: None,
            take_profits: vec![],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        };

        let summary = fanout.broadcast(&signal).await;
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);
    }
}
