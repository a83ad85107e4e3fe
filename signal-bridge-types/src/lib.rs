//! Shared domain types for the signal bridge: the normalized trade signal,
//! the persistent trade/event records, the resolved per-trade config, and
//! the error taxonomy. No I/O lives here — only data and pure math, so both
//! the server crate and its tests can depend on a single, small surface.

pub mod calc;
pub mod config;
pub mod error;
pub mod hash;
pub mod order;
pub mod signal;
pub mod trade;
pub mod trade_event;

pub use config::{EffectiveTradeConfig, TradeConfigOverride};
pub use error::{RejectionReason, SignalExecutionStatus};
pub use hash::{cancel_dedup_key, dedup_key_for, signal_hash, tenant_dedup_key};
pub use order::{OrderResult, OrderResultBuilder};
pub use signal::{SignalAction, SignalSource, Side, TradeSignal};
pub use trade::{Trade, TradeStatus};
pub use trade_event::{TradeEvent, TradeEventType};
