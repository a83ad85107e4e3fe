use std::collections::HashMap;
use std::sync::Arc;

use signal_bridge_types::EffectiveTradeConfig;

/// Per-tenant credentials for the exchange's signed endpoints. In
/// single-account mode there is exactly one `Tenant`, identified by the
/// literal id `"default"`.
#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct Tenant {
    pub tenant_id: String,
    pub credentials: ExchangeCredentials,
    pub config: EffectiveTradeConfig,
    pub enabled: bool,
    pub auto_trade_enabled: bool,
}

impl Tenant {
    /// `spec.md` §4.4: a tenant is eligible for fan-out when enabled,
    /// auto-trading, and carrying a credential binding.
    pub fn eligible_for_fanout(&self) -> bool {
        self.enabled && self.auto_trade_enabled && !self.credentials.api_key.is_empty()
    }
}

/// The per-call tenant identity, threaded explicitly through every call that
/// touches a tenant-scoped resource (`spec.md` §9 design note: no
/// thread-local context). `tenant_id` is `None` in single-account mode.
#[derive(Debug, Clone)]
pub struct TenantCtx {
    pub tenant_id: Option<String>,
    pub credentials: ExchangeCredentials,
    pub config: EffectiveTradeConfig,
}

impl TenantCtx {
    pub fn scope(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// In-memory registry of configured tenants, populated once at startup from
/// `Config` and never mutated at runtime. Single-account mode holds one
/// entry under the id `"default"`.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: HashMap<String, Arc<Tenant>>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        Self {
            tenants: tenants
                .into_iter()
                .map(|t| (t.tenant_id.clone(), Arc::new(t)))
                .collect(),
        }
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<Tenant>> {
        self.tenants.get(tenant_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Tenant>> {
        self.tenants.values().cloned().collect()
    }

    pub fn eligible(&self) -> Vec<Arc<Tenant>> {
        self.tenants
            .values()
            .filter(|t| t.eligible_for_fanout())
            .cloned()
            .collect()
    }

    pub fn ctx_for(&self, tenant_id: &str) -> Option<TenantCtx> {
        self.get(tenant_id).map(|t| TenantCtx {
            tenant_id: Some(t.tenant_id.clone()),
            credentials: t.credentials.clone(),
            config: t.config.clone(),
        })
    }
}
