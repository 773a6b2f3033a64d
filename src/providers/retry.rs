//! Retry policy for the scraper adapter
//!
//! Exponential backoff with jitter, bounded per-attempt and overall:
//!
//! ```text
//! delay(n) = min(max_delay, base_delay * 2^n) + random(0, jitter)
//! ```
//!
//! The jitter spreads retried load when many scrapes fail at once (the
//! scraping service rate-limits aggressively). Every attempt is additionally
//! wrapped in a hard timeout by the adapter, so one wedged browser session
//! cannot hold a request slot indefinitely.

use rand::Rng;
use std::time::Duration;

/// Retry/backoff settings for one scraper client instance.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first (3 means up to 4 attempts total)
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for the exponential component of the delay
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to every delay
    pub jitter: Duration,
    /// Hard timeout applied to each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Deterministic exponential component of the delay after attempt
    /// `attempt` (0-based: attempt 0 is the first failure).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // 2^attempt saturates rather than overflowing for absurd attempt counts
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(factor as u128)
            .min(self.max_delay.as_millis());
        Duration::from_millis(exponential as u64)
    }

    /// Full delay including random jitter. Strictly increasing across
    /// attempts modulo the jitter term, until the cap flattens it.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff_delay(attempt) + jitter
    }
}
