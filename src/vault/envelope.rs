//! Versioned ciphertext envelope format
//!
//! A sealed secret is stored as a single opaque string:
//!
//! ```text
//! $vault$1$chacha20poly1305$<nonce-base64>$<ciphertext-base64>
//! ```
//!
//! The leading `$vault$` prefix is what distinguishes vault output from
//! legacy plaintext secrets. Parsing is strict: a value that starts like an
//! envelope but has a wrong version, unknown algorithm, or undecodable
//! sections is a parse error, not plaintext.

use std::fmt;

/// Leading sentinel for envelope strings
pub const ENVELOPE_PREFIX: &str = "$vault$";

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

/// Algorithm tag recorded in every envelope
pub const ENVELOPE_ALGORITHM: &str = "chacha20poly1305";

/// Parsed envelope sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u32,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            nonce,
            ciphertext,
        }
    }

    /// Parse an envelope string into its sections.
    ///
    /// Returns a human-readable reason on failure. Parse failures are always
    /// hard errors for prefixed values; the legacy-plaintext decision happens
    /// earlier, on the prefix alone.
    pub fn parse(value: &str) -> Result<Self, String> {
        use base64::{engine::general_purpose, Engine as _};

        let rest = value
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| "missing envelope prefix".to_string())?;

        let mut sections = rest.split('$');

        let version: u32 = sections
            .next()
            .ok_or_else(|| "missing version section".to_string())?
            .parse()
            .map_err(|_| "version section is not a number".to_string())?;
        if version != ENVELOPE_VERSION {
            return Err(format!("unsupported envelope version {}", version));
        }

        let algorithm = sections
            .next()
            .ok_or_else(|| "missing algorithm section".to_string())?;
        if algorithm != ENVELOPE_ALGORITHM {
            return Err(format!("unsupported algorithm '{}'", algorithm));
        }

        let nonce_b64 = sections
            .next()
            .ok_or_else(|| "missing nonce section".to_string())?;
        let ciphertext_b64 = sections
            .next()
            .ok_or_else(|| "missing ciphertext section".to_string())?;

        if sections.next().is_some() {
            return Err("trailing envelope sections".to_string());
        }

        let nonce = general_purpose::STANDARD
            .decode(nonce_b64)
            .map_err(|_| "nonce is not valid base64".to_string())?;
        let ciphertext = general_purpose::STANDARD
            .decode(ciphertext_b64)
            .map_err(|_| "ciphertext is not valid base64".to_string())?;

        if nonce.is_empty() || ciphertext.is_empty() {
            return Err("empty nonce or ciphertext".to_string());
        }

        Ok(Self {
            version,
            nonce,
            ciphertext,
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use base64::{engine::general_purpose, Engine as _};

        write!(
            f,
            "{}{}${}${}${}",
            ENVELOPE_PREFIX,
            self.version,
            ENVELOPE_ALGORITHM,
            general_purpose::STANDARD.encode(&self.nonce),
            general_purpose::STANDARD.encode(&self.ciphertext),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let envelope = Envelope::new(vec![1u8; 12], vec![0xAB; 32]);
        let text = envelope.to_string();
        assert!(text.starts_with("$vault$1$chacha20poly1305$"));

        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_plain_strings_do_not_parse() {
        assert!(Envelope::parse("plain-secret-string").is_err());
        assert!(Envelope::parse("").is_err());
        assert!(Envelope::parse("$vault$").is_err());
        assert!(Envelope::parse("$vault$1").is_err());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let text = "$vault$2$chacha20poly1305$AAAA$AAAA";
        let err = Envelope::parse(text).unwrap_err();
        assert!(err.contains("version"));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let text = "$vault$1$rot13$AAAA$AAAA";
        let err = Envelope::parse(text).unwrap_err();
        assert!(err.contains("algorithm"));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let text = "$vault$1$chacha20poly1305$not-base64!$AAAA";
        assert!(Envelope::parse(text).is_err());
    }

    #[test]
    fn test_trailing_sections_rejected() {
        let text = "$vault$1$chacha20poly1305$AAAA$AAAA$extra";
        assert!(Envelope::parse(text).is_err());
    }
}
