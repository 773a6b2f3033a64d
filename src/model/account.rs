//! Canonical account representation

use serde::{Deserialize, Serialize};

use crate::model::ProviderId;

/// Broad account classification used by summary aggregation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountClass {
    /// Checking, savings, cash management
    Depository,
    /// Credit cards and lines of credit
    Credit,
    /// Brokerage, retirement, crypto
    Investment,
    /// Mortgages, student loans, personal loans
    Loan,
    /// Anything the provider could not classify
    #[default]
    Other,
}

impl AccountClass {
    /// Whether balances of this class count against net worth.
    pub fn is_liability(&self) -> bool {
        matches!(self, AccountClass::Credit | AccountClass::Loan)
    }
}

/// Account balance in minor units.
///
/// `current_minor` is always present. `available_minor` and `limit_minor`
/// stay `None` when the provider did not report them; adapters must never
/// fabricate a value for either.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub current_minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_minor: Option<i64>,
}

/// One financial account as seen by the user, provider-agnostic.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CanonicalAccount {
    /// Provider-scoped external identifier (sanitized before storage)
    pub id: String,

    /// Which upstream produced this account
    pub provider_id: ProviderId,

    /// Provider-scoped institution identifier
    pub institution_id: String,

    /// Human-readable institution name
    pub institution_name: String,

    /// Display name shown to the user
    pub display_name: String,

    /// Broad classification
    pub account_class: AccountClass,

    /// Provider-specific subtype, e.g. "checking" or "401k"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Last-4 style masked account number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_number: Option<String>,

    /// ISO 4217 currency code
    pub currency_code: String,

    /// Balance in minor units
    pub balance: Balance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liability_classes() {
        assert!(AccountClass::Credit.is_liability());
        assert!(AccountClass::Loan.is_liability());
        assert!(!AccountClass::Depository.is_liability());
        assert!(!AccountClass::Investment.is_liability());
        assert!(!AccountClass::Other.is_liability());
    }

    #[test]
    fn test_absent_balance_fields_not_serialized() {
        let balance = Balance {
            current_minor: 50_000,
            available_minor: None,
            limit_minor: None,
        };
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["current_minor"], 50_000);
        assert!(json.get("available_minor").is_none());
        assert!(json.get("limit_minor").is_none());
    }
}
