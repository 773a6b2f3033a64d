//! Canonical transaction representation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One posted or pending account movement.
///
/// `amount_minor` follows the canonical sign convention: positive is money
/// coming in, negative is money going out. Adapters normalize into this
/// convention before constructing the value; nothing downstream re-interprets
/// provider-native signs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CanonicalTransaction {
    /// Provider-scoped external identifier (sanitized before storage)
    pub id: String,

    /// Canonical id of the owning account
    pub account_id: String,

    /// Signed amount in minor units, canonical sign convention
    pub amount_minor: i64,

    /// Calendar date the movement posted (no time-of-day semantics)
    pub posted_date: NaiveDate,

    /// Provider-supplied description line
    pub description: String,

    /// Cleaned merchant name when the provider supplies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,

    /// Provider-supplied category hint; advisory only, never authoritative
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,

    /// Whether the movement is still pending settlement
    pub pending: bool,

    /// ISO 4217 currency code
    pub currency_code: String,
}

impl CanonicalTransaction {
    /// True if this transaction posted within the given calendar month.
    pub fn posted_in_month(&self, year: i32, month: u32) -> bool {
        use chrono::Datelike;
        self.posted_date.year() == year && self.posted_date.month() == month
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posted_in_month() {
        let txn = CanonicalTransaction {
            id: "t1".into(),
            account_id: "a1".into(),
            amount_minor: -4_200,
            posted_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            description: "Coffee".into(),
            merchant_name: None,
            category_hint: None,
            pending: false,
            currency_code: "USD".into(),
        };
        assert!(txn.posted_in_month(2024, 1));
        assert!(!txn.posted_in_month(2024, 2));
        assert!(!txn.posted_in_month(2023, 1));
    }

    #[test]
    fn test_date_serializes_as_iso_string() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"2024-01-05\"");
    }
}
