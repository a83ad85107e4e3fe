use sha2::{Digest, Sha256};

use crate::signal::{SignalAction, TradeSignal};

/// The signal-level dedup key: SHA-256 over `symbol | side | entryPriceLow |
/// stopLoss`, `side` replaced by the literal `"DCA"` when absent
/// (`spec.md` §4.3.1). Returned as lowercase hex, 64 characters.
pub fn signal_hash(signal: &TradeSignal) -> String {
    let side = signal
        .side
        .map(|s| format!("{:?}", s).to_uppercase())
        .unwrap_or_else(|| "DCA".to_string());
    let entry = signal
        .entry_reference()
        .map(|d| d.to_string())
        .unwrap_or_default();
    let stop_loss = signal
        .stop_loss
        .map(|d| d.to_string())
        .unwrap_or_default();
    let material = format!("{}|{}|{}|{}", signal.symbol, side, entry, stop_loss);
    hex_sha256(material.as_bytes())
}

/// The executor-level dedup key, `SHA256(tenant_id | signal_hash)`
/// (`spec.md` §4.3.2): prevents the same signal hitting the same tenant twice
/// across a multi-tenant fan-out.
pub fn tenant_dedup_key(tenant_id: &str, signal_hash: &str) -> String {
    hex_sha256(format!("{}|{}", tenant_id, signal_hash).as_bytes())
}

/// The CANCEL dedup key, `"CANCEL|<symbol>"` (`spec.md` §4.3.3), keyed
/// directly without hashing since cancels carry no price material to hash.
pub fn cancel_dedup_key(symbol: &str) -> String {
    format!("CANCEL|{}", symbol)
}

/// Which cache key a signal should be checked/inserted under.
pub fn dedup_key_for(signal: &TradeSignal) -> String {
    match signal.action {
        SignalAction::Cancel => cancel_dedup_key(&signal.symbol),
        _ => signal_hash(signal),
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Side;
    use rust_decimal_macros::dec;

    fn signal() -> TradeSignal {
        TradeSignal {
            action: SignalAction::Entry,
            symbol: "BTCUSDT".to_string(),
            side: Some(Side::Long),
            entry_price_low: Some(dec!(95000)),
            entry_price_high: None,
            stop_loss: Some(dec!(94000)),
            take_profits: vec![],
            close_ratio: None,
            new_stop_loss: None,
            new_take_profit: None,
            is_dca: false,
            raw_message: None,
            source: None,
        }
    }

    #[test]
    fn identical_signals_hash_identically() {
        assert_eq!(signal_hash(&signal()), signal_hash(&signal()));
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let h = signal_hash(&signal());
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn side_absent_uses_dca_literal() {
        let mut dca_signal = signal();
        dca_signal.side = None;
        dca_signal.is_dca = true;
        let mut other = signal();
        other.side = Some(Side::Short);
        assert_ne!(signal_hash(&dca_signal), signal_hash(&other));
    }

    #[test]
    fn different_entry_price_changes_hash() {
        let mut changed = signal();
        changed.entry_price_low = Some(dec!(94500));
        assert_ne!(signal_hash(&signal()), signal_hash(&changed));
    }

    #[test]
    fn tenant_dedup_key_differs_per_tenant() {
        let h = signal_hash(&signal());
        assert_ne!(
            tenant_dedup_key("tenant-a", &h),
            tenant_dedup_key("tenant-b", &h)
        );
    }

    #[test]
    fn cancel_key_is_symbol_scoped() {
        assert_eq!(cancel_dedup_key("BTCUSDT"), "CANCEL|BTCUSDT");
    }
}
