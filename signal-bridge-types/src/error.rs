use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a signal was rejected before any exchange write. Carried on the
/// failed `OrderResult` and, when persistence is reachable, on the signal
/// audit record.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum RejectionReason {
    #[error("signal invalid: {0}")]
    InvalidSignal(&'static str),

    #[error("symbol {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("daily loss limit of {limit} exceeded (today: {today})")]
    DailyLossLimitExceeded {
        limit: rust_decimal::Decimal,
        today: rust_decimal::Decimal,
    },

    #[error("position already open for {0} and signal is not a DCA")]
    PositionAlreadyOpen(String),

    #[error("dca cap reached for {symbol} ({count}/{max})")]
    DcaCapReached {
        symbol: String,
        count: i64,
        max: i64,
    },

    #[error("dca side {signal_side:?} does not match existing position side {position_side:?}")]
    DcaSideMismatch {
        signal_side: Option<crate::signal::Side>,
        position_side: crate::signal::Side,
    },

    #[error("an open limit entry order already exists on {0}")]
    OpenEntryOrderExists(String),

    #[error("duplicate signal")]
    Duplicate,

    #[error("entry price deviates from mark by more than the allowed threshold")]
    PriceDeviation,

    #[error("computed order size below minimum notional")]
    BelowMinimumNotional,

    #[error("no open trade found for {0}")]
    NoOpenTrade(String),

    #[error("ambiguous symbol: {0} open trades for this tenant")]
    AmbiguousSymbol(usize),

    #[error("could not resolve a protective price for this operation")]
    NoProtectivePriceResolved,
}

/// Failure kind for a read against the exchange (balance, positions, mark
/// price, open orders) before any order is written. Always aborts the
/// operation; never substitutes a default.
#[derive(Debug, Clone, Error)]
#[error("exchange query failed: {0}")]
pub struct ExchangeQueryFailed(pub String);

/// The resolved outcome recorded for every inbound signal, fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalExecutionStatus {
    Executed,
    Rejected,
    Ignored,
    Failed,
}
