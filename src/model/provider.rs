//! Provider identity tag

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::TellerError;

/// Which upstream system a connection talks to.
///
/// This is a closed set: dispatch happens once at the connection-manager
/// boundary by matching on this enum, never by re-inspecting strings
/// downstream. Adding a provider means adding a variant and an adapter.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    /// Stable partner aggregation API with a link-token handshake.
    #[default]
    Aggregator,
    /// Regional browser-automation scraper for banks without a public API.
    /// Slow, flaky, and the reason the retry policy exists.
    RegionalScraper,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Aggregator => "aggregator",
            ProviderId::RegionalScraper => "regional-scraper",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = TellerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggregator" => Ok(ProviderId::Aggregator),
            "regional-scraper" => Ok(ProviderId::RegionalScraper),
            other => Err(TellerError::Validation(format!(
                "unknown provider '{}' (expected 'aggregator' or 'regional-scraper')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_str_roundtrip() {
        for provider in [ProviderId::Aggregator, ProviderId::RegionalScraper] {
            assert_eq!(provider.as_str().parse::<ProviderId>().unwrap(), provider);
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = "venmo".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, TellerError::Validation(_)));
    }

    #[test]
    fn test_serde_tags() {
        assert_eq!(
            serde_json::to_string(&ProviderId::RegionalScraper).unwrap(),
            "\"regional-scraper\""
        );
        assert_eq!(
            serde_json::from_str::<ProviderId>("\"aggregator\"").unwrap(),
            ProviderId::Aggregator
        );
    }
}
