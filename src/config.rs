//! Configuration for Teller
//!
//! CLI arguments and environment variable handling using clap.
//! Every knob is settable as a flag or an environment variable; `.env`
//! files are loaded by main before parsing.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::providers::RetryPolicy;

/// Teller - bank integration gateway
///
/// Bridges an upstream API gateway to two financial-data providers: a
/// partner aggregator API and a regional scraper microservice.
#[derive(Parser, Debug, Clone)]
#[command(name = "teller")]
#[command(about = "Bank integration gateway for aggregator and scraper providers")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "teller")]
    pub mongodb_db: String,

    /// Credential vault key as base64 (must decode to exactly 32 bytes)
    /// Required: connections cannot be stored without a sealing key
    #[arg(long, env = "VAULT_KEY")]
    pub vault_key: Option<String>,

    /// Aggregator partner API base URL
    #[arg(long, env = "AGGREGATOR_URL", default_value = "https://sandbox.aggregator.example.com")]
    pub aggregator_url: String,

    /// Client id issued by the aggregator partner program
    #[arg(long, env = "AGGREGATOR_CLIENT_ID")]
    pub aggregator_client_id: Option<String>,

    /// Client secret issued by the aggregator partner program
    #[arg(long, env = "AGGREGATOR_SECRET")]
    pub aggregator_secret: Option<String>,

    /// Per-request timeout against the aggregator API, in seconds
    #[arg(long, env = "AGGREGATOR_TIMEOUT_SECS", default_value = "30")]
    pub aggregator_timeout_secs: u64,

    /// Transaction fetch window for aggregator syncs, in days
    #[arg(long, env = "AGGREGATOR_LOOKBACK_DAYS", default_value = "90")]
    pub aggregator_lookback_days: i64,

    /// Scraper microservice base URL
    #[arg(long, env = "SCRAPER_URL", default_value = "http://localhost:3100")]
    pub scraper_url: String,

    /// Run scraper browsers headful (debugging aid, slows every scrape)
    #[arg(long, env = "SCRAPER_SHOW_BROWSER", default_value = "false")]
    pub scraper_show_browser: bool,

    /// Currency assumed when the scraper omits one
    #[arg(long, env = "SCRAPER_DEFAULT_CURRENCY", default_value = "ILS")]
    pub scraper_default_currency: String,

    /// Retries after the first scrape attempt (3 means up to 4 attempts)
    #[arg(long, env = "SCRAPER_MAX_RETRIES", default_value = "3")]
    pub scraper_max_retries: u32,

    /// Base backoff delay between scrape attempts, in seconds
    #[arg(long, env = "SCRAPER_BASE_DELAY_SECS", default_value = "1")]
    pub scraper_base_delay_secs: u64,

    /// Cap on the exponential backoff delay, in seconds
    #[arg(long, env = "SCRAPER_MAX_DELAY_SECS", default_value = "30")]
    pub scraper_max_delay_secs: u64,

    /// Hard timeout for each individual scrape attempt, in seconds.
    /// Browser automation against slow bank sites routinely takes minutes.
    #[arg(long, env = "SCRAPER_ATTEMPT_TIMEOUT_SECS", default_value = "120")]
    pub scraper_attempt_timeout_secs: u64,

    /// Overall deadline for a connect or sync request, in seconds.
    /// Covers the full retry schedule plus persistence.
    #[arg(long, env = "CONNECT_DEADLINE_SECS", default_value = "600")]
    pub connect_deadline_secs: u64,

    /// How long a computed summary stays fresh, in seconds
    #[arg(long, env = "SUMMARY_TTL_SECS", default_value = "300")]
    pub summary_ttl_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Whether aggregator partner credentials are present. Without them the
    /// aggregator endpoints still exist but every upstream call will be
    /// rejected for invalid API keys.
    pub fn aggregator_configured(&self) -> bool {
        self.aggregator_client_id.is_some() && self.aggregator_secret.is_some()
    }

    /// Retry settings for the scraper client, assembled from the flat args.
    pub fn scraper_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.scraper_max_retries,
            base_delay: Duration::from_secs(self.scraper_base_delay_secs),
            max_delay: Duration::from_secs(self.scraper_max_delay_secs),
            attempt_timeout: Duration::from_secs(self.scraper_attempt_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    /// Overall connect/sync deadline as a Duration
    pub fn connect_deadline(&self) -> Duration {
        Duration::from_secs(self.connect_deadline_secs)
    }

    /// Summary freshness window as a Duration
    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.vault_key.is_none() {
            return Err("VAULT_KEY is required (base64, 32 bytes decoded)".to_string());
        }

        if self.scraper_base_delay_secs > self.scraper_max_delay_secs {
            return Err(
                "SCRAPER_BASE_DELAY_SECS must be less than or equal to SCRAPER_MAX_DELAY_SECS"
                    .to_string(),
            );
        }

        if self.aggregator_lookback_days <= 0 {
            return Err("AGGREGATOR_LOOKBACK_DAYS must be positive".to_string());
        }

        if self.connect_deadline_secs < self.scraper_attempt_timeout_secs {
            return Err(
                "CONNECT_DEADLINE_SECS must be at least SCRAPER_ATTEMPT_TIMEOUT_SECS, \
                 otherwise a single attempt can never finish"
                    .to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["teller", "--vault-key", "c2VjcmV0"])
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = base_args();
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_missing_vault_key_rejected() {
        let mut args = base_args();
        args.vault_key = None;
        let err = args.validate().unwrap_err();
        assert!(err.contains("VAULT_KEY"));
    }

    #[test]
    fn test_inverted_backoff_bounds_rejected() {
        let mut args = base_args();
        args.scraper_base_delay_secs = 60;
        args.scraper_max_delay_secs = 10;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_deadline_must_cover_one_attempt() {
        let mut args = base_args();
        args.connect_deadline_secs = 30;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_args() {
        let mut args = base_args();
        args.scraper_max_retries = 5;
        args.scraper_attempt_timeout_secs = 90;
        let policy = args.scraper_retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(90));
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_aggregator_configured_requires_both_keys() {
        let mut args = base_args();
        assert!(!args.aggregator_configured());
        args.aggregator_client_id = Some("client".to_string());
        assert!(!args.aggregator_configured());
        args.aggregator_secret = Some("secret".to_string());
        assert!(args.aggregator_configured());
    }
}
