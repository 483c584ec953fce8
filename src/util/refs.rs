//! Reference generators for bookings and ledger entries.

use rand::Rng;
use uuid::Uuid;

use crate::core::model::LedgerKind;

/// Customer-facing payment reference: `REF<unix seconds><6 digits>`.
#[must_use]
pub fn payment_reference() -> String {
    let suffix: u32 = rand::rng().random_range(100_000..1_000_000);
    format!("REF{}{suffix}", crate::util::clock::now().timestamp())
}

/// Ledger reference: `<kind>_<uuid>`.
#[must_use]
pub fn ledger_reference(kind: LedgerKind) -> String {
    format!("{}_{}", kind.as_str(), Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_reference_shape() {
        let r = payment_reference();
        assert!(r.starts_with("REF"));
        assert!(r[3..].chars().all(|c| c.is_ascii_digit()));
        assert!(r.len() >= 3 + 10 + 6);
    }

    #[test]
    fn ledger_reference_is_prefixed_and_unique() {
        let a = ledger_reference(LedgerKind::Debit);
        let b = ledger_reference(LedgerKind::Debit);
        assert!(a.starts_with("debit_"));
        assert!(ledger_reference(LedgerKind::Credit).starts_with("credit_"));
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a["debit_".len()..]).is_ok());
    }
}
