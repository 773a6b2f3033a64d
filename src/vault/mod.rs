//! Credential vault
//!
//! Symmetric encryption for provider secrets at rest (aggregator access
//! tokens, scraper bank credentials). Secrets are sealed with
//! ChaCha20-Poly1305 under a process-wide key and stored as a versioned
//! envelope string.
//!
//! ## Legacy plaintext
//!
//! Connections created before encryption shipped hold their secret as a bare
//! string. [`Vault::is_encrypted`] tells the two apart by the `$vault$`
//! prefix, and [`Vault::open`] transparently handles both: prefixed values
//! are decrypted, anything else is returned as-is and logged as a migration
//! signal. A prefixed value that fails to parse or authenticate is a hard
//! [`TellerError::Encryption`] — corrupt ciphertext must never be silently
//! fed downstream as if it were a plaintext secret. The prefix alone decides
//! the routing: real vault output always carries it, and no legacy password
//! starts with it.

mod envelope;

pub use envelope::{Envelope, ENVELOPE_ALGORITHM, ENVELOPE_PREFIX, ENVELOPE_VERSION};

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;
use zeroize::Zeroizing;

use crate::types::{Result, TellerError};

/// Encryption key length for ChaCha20-Poly1305 (32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Generate cryptographically secure random bytes.
fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Process-wide secret vault.
///
/// The key is fixed at construction and read-only afterwards; no runtime
/// rotation is modeled. Construct once at startup and share via `Arc`.
pub struct Vault {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl Vault {
    /// Create a vault from a raw 32-byte key.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Create a vault from a base64-encoded 32-byte key, as supplied via
    /// configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        use base64::{engine::general_purpose, Engine as _};

        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| TellerError::Config(format!("vault key is not valid base64: {}", e)))?;

        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            TellerError::Config(format!("vault key must be {} bytes after decoding", KEY_LEN))
        })?;

        Ok(Self::new(key))
    }

    /// Whether a stored value is vault output (as opposed to legacy
    /// plaintext). Prefix check only: a prefixed value that turns out not to
    /// parse is a corrupt envelope, never plaintext.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENVELOPE_PREFIX)
    }

    /// Seal a plaintext secret into an envelope string.
    ///
    /// A fresh random nonce is drawn per call, so encrypting the same secret
    /// twice yields different envelopes.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| TellerError::Encryption(format!("encryption failed: {}", e)))?;

        Ok(Envelope::new(nonce.to_vec(), ciphertext).to_string())
    }

    /// Open an envelope string and return the plaintext secret.
    ///
    /// Fails with [`TellerError::Encryption`] when the value is not an
    /// envelope, when the auth tag does not verify (tampered or wrong key),
    /// or when the plaintext is not UTF-8.
    pub fn decrypt(&self, value: &str) -> Result<String> {
        let envelope = Envelope::parse(value)
            .map_err(|e| TellerError::Encryption(format!("not a vault envelope: {}", e)))?;

        if envelope.nonce.len() != NONCE_LEN {
            return Err(TellerError::Encryption(format!(
                "invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                envelope.nonce.len()
            )));
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_ref()));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| {
                TellerError::Encryption("decryption failed (tampered ciphertext or wrong key)".into())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| TellerError::Encryption("decrypted secret is not valid UTF-8".into()))
    }

    /// Resolve a stored secret value, whichever generation it belongs to.
    ///
    /// Prefixed values are decrypted; legacy bare strings are returned
    /// unchanged and logged so operators can track how many pre-encryption
    /// connections remain. Corrupt envelopes propagate the decryption error —
    /// they are never mistaken for plaintext.
    pub fn open(&self, stored: &str) -> Result<String> {
        if Self::is_encrypted(stored) {
            self.decrypt(stored)
        } else {
            warn!("stored secret is legacy plaintext; will be re-sealed on next write");
            Ok(stored.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new([7u8; KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = test_vault();

        let sealed = vault.encrypt("plain-secret-string").unwrap();
        assert!(Vault::is_encrypted(&sealed));

        let opened = vault.decrypt(&sealed).unwrap();
        assert_eq!(opened, "plain-secret-string");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let vault = test_vault();

        let first = vault.encrypt("same-secret").unwrap();
        let second = vault.encrypt("same-secret").unwrap();
        assert_ne!(first, second);

        assert_eq!(vault.decrypt(&first).unwrap(), "same-secret");
        assert_eq!(vault.decrypt(&second).unwrap(), "same-secret");
    }

    #[test]
    fn test_legacy_plaintext_detection() {
        assert!(!Vault::is_encrypted("plain-secret-string"));
        assert!(!Vault::is_encrypted(""));
        // Dollar signs in a password must not trip the detector
        assert!(!Vault::is_encrypted("pa$$word$123$abc"));
        // Anything carrying the prefix belongs to the vault, damaged or not
        assert!(Vault::is_encrypted("$vault$"));
        assert!(Vault::is_encrypted("$vault$1$chacha20poly1305$AAAA"));
    }

    #[test]
    fn test_open_passes_legacy_plaintext_through() {
        let vault = test_vault();
        assert_eq!(vault.open("plain-secret-string").unwrap(), "plain-secret-string");
    }

    #[test]
    fn test_open_decrypts_envelopes() {
        let vault = test_vault();
        let sealed = vault.encrypt("s3cret").unwrap();
        assert_eq!(vault.open(&sealed).unwrap(), "s3cret");
    }

    #[test]
    fn test_tampered_envelope_is_error_not_plaintext() {
        let vault = test_vault();
        let sealed = vault.encrypt("s3cret").unwrap();

        // Flip one ciphertext byte, keeping the envelope shape intact
        let mut envelope = Envelope::parse(&sealed).unwrap();
        envelope.ciphertext[0] ^= 0x01;
        let tampered = envelope.to_string();
        assert!(Vault::is_encrypted(&tampered));

        let err = vault.open(&tampered).unwrap_err();
        assert!(matches!(err, TellerError::Encryption(_)));
    }

    #[test]
    fn test_garbled_envelope_is_error_not_plaintext() {
        let vault = test_vault();

        // Prefixed but structurally broken: too few sections to be an
        // envelope. Must surface as an error, never as the "secret".
        let err = vault.open("$vault$1$chacha20poly1305$AAAA").unwrap_err();
        assert!(matches!(err, TellerError::Encryption(_)));

        let err = vault.open("$vault$").unwrap_err();
        assert!(matches!(err, TellerError::Encryption(_)));
    }

    #[test]
    fn test_truncated_envelope_is_error_not_plaintext() {
        let vault = test_vault();
        let sealed = vault.encrypt("s3cret").unwrap();

        // Lose the tail of the ciphertext, as a torn write would
        let truncated = &sealed[..sealed.len() - 5];
        let err = vault.open(truncated).unwrap_err();
        assert!(matches!(err, TellerError::Encryption(_)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let vault = test_vault();
        let other = Vault::new([9u8; KEY_LEN]);

        let sealed = vault.encrypt("s3cret").unwrap();
        let result = other.decrypt(&sealed);
        assert!(matches!(result, Err(TellerError::Encryption(_))));
    }

    #[test]
    fn test_from_base64_rejects_short_keys() {
        use base64::{engine::general_purpose, Engine as _};

        let short = general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            Vault::from_base64(&short),
            Err(TellerError::Config(_))
        ));

        let exact = general_purpose::STANDARD.encode([1u8; KEY_LEN]);
        assert!(Vault::from_base64(&exact).is_ok());
    }

    #[test]
    fn test_unicode_secret_roundtrip() {
        let vault = test_vault();
        let secret = "סיסמה-חזקה-מאוד";
        let sealed = vault.encrypt(secret).unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap(), secret);
    }
}
