use thiserror::Error;

/// Exchange client crate boundary: everything that can go wrong composing,
/// sending, or parsing a REST call to the venue.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("exchange rejected request: code={code} msg={msg}")]
    Venue { code: i64, msg: String },

    #[error("unexpected response shape: {0}")]
    InvalidResponse(String),

    #[error("streaming transport error: {0}")]
    Stream(String),
}

/// Persistence boundary. `spec.md` §7: always logged, never fatal to the
/// caller — the engine and reconciler catch this at the call site.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Composes the error kinds from `spec.md` §7 that the execution engine and
/// reconciler surface to their own callers. Pre-trade rejections and
/// exchange-query failures map to a single failed `OrderResult` at the call
/// site rather than propagating this type outward; this enum exists for the
/// handful of places (fan-out, bootstrap) that need to distinguish them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] signal_bridge_types::RejectionReason),

    #[error(transparent)]
    ExchangeQuery(#[from] ExchangeError),

    #[error("critical: fail-safe compensation itself failed: {0}")]
    Critical(String),
}
