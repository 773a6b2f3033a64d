//! Canonical account and transaction model
//!
//! Every provider adapter maps its native payloads into these types before
//! anything else sees them. The canonical sign convention for transaction
//! amounts is **positive = inflow, negative = outflow**; each adapter owns
//! the normalization from its provider-native convention and covers it with
//! its own unit tests.

mod account;
mod provider;
mod transaction;

pub use account::{AccountClass, Balance, CanonicalAccount};
pub use provider::ProviderId;
pub use transaction::CanonicalTransaction;

/// Convert a provider-native major-unit amount (e.g. 19.99) into minor units
/// (1999). All canonical amounts and balances are stored in minor units so
/// arithmetic stays exact.
pub fn minor_units_from_major(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units_rounding() {
        assert_eq!(minor_units_from_major(19.99), 1999);
        assert_eq!(minor_units_from_major(500.0), 50_000);
        assert_eq!(minor_units_from_major(-42.0), -4_200);
        // Float representation of .1/.2 style fractions must round cleanly
        assert_eq!(minor_units_from_major(0.1 + 0.2), 30);
        assert_eq!(minor_units_from_major(-0.005), -1);
    }
}
