//! Credential-at-rest encryption.
//!
//! Secrets are stored as `nonce_hex:ciphertext_hex` envelopes produced by
//! AES-256-GCM under a single operator-held key. The nonce is freshly random
//! on every call, so encrypting the same plaintext twice never yields the
//! same envelope. The GCM tag makes any bit-flip in the stored ciphertext a
//! hard decryption failure rather than silent garbage.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use secrecy::SecretString;

use crate::error::CryptoError;

/// Expected length of the hex-encoded key (32 bytes = AES-256).
pub const KEY_HEX_LEN: usize = 64;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Symmetric cipher for credential envelopes.
///
/// Constructed once at startup from the configured key and shared by
/// reference; encryption and decryption are CPU-bound with no I/O.
pub struct KeyCipher {
    cipher: Aes256Gcm,
}

impl KeyCipher {
    /// Build a cipher from a 64-hex-character key.
    ///
    /// A missing or malformed key is a startup failure, never a silent
    /// fallback to a generated key: an ephemeral key would orphan every
    /// envelope already in the database after the next restart.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let hex_key = hex_key.trim();
        if hex_key.len() != KEY_HEX_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_HEX_LEN,
                got: hex_key.len(),
            });
        }
        let key_bytes = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKeyEncoding)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Ok(Self { cipher })
    }

    /// Encrypt a plaintext secret into a `nonce_hex:ciphertext_hex` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypt an envelope back into the plaintext secret.
    ///
    /// Fails on a missing `:` separator, non-hex content, a wrong-length
    /// nonce, or a ciphertext that does not authenticate (tampered or
    /// truncated, or encrypted under a different key).
    pub fn decrypt(&self, envelope: &str) -> Result<SecretString, CryptoError> {
        let (nonce_hex, ciphertext_hex) = envelope
            .split_once(':')
            .ok_or(CryptoError::MalformedEnvelope("missing ':' separator"))?;

        let nonce_bytes =
            hex::decode(nonce_hex).map_err(|_| CryptoError::MalformedEnvelope("nonce not hex"))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::MalformedEnvelope("bad nonce length"));
        }
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|_| CryptoError::MalformedEnvelope("ciphertext not hex"))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)?;
        Ok(SecretString::from(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn cipher() -> KeyCipher {
        KeyCipher::from_hex(TEST_KEY).expect("valid test key")
    }

    #[test]
    fn round_trips_plaintext() {
        let c = cipher();
        for plaintext in ["sk-test-12345", "", "unicode: émoji 🚀", "sk-admin-xyz"] {
            let envelope = c.encrypt(plaintext).unwrap();
            assert_eq!(c.decrypt(&envelope).unwrap().expose_secret(), plaintext);
        }
    }

    #[test]
    fn envelopes_are_nondeterministic() {
        let c = cipher();
        let a = c.encrypt("sk-same-plaintext").unwrap();
        let b = c.encrypt("sk-same-plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(
            c.decrypt(&a).unwrap().expose_secret(),
            c.decrypt(&b).unwrap().expose_secret()
        );
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let c = cipher();
        let envelope = c.encrypt("sk-tamper-me").unwrap();
        let (nonce_hex, ciphertext_hex) = envelope.split_once(':').unwrap();

        // Flip every hex character of the ciphertext in turn; each mutation
        // must fail authentication rather than decrypt to garbage.
        for i in 0..ciphertext_hex.len() {
            let mut chars: Vec<char> = ciphertext_hex.chars().collect();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            let mutated: String = chars.into_iter().collect();
            if mutated == ciphertext_hex {
                continue;
            }
            let result = c.decrypt(&format!("{nonce_hex}:{mutated}"));
            assert!(matches!(result, Err(CryptoError::DecryptFailed)));
        }
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let c = cipher();
        let envelope = c.encrypt("sk-truncate-me").unwrap();
        let truncated = &envelope[..envelope.len() - 4];
        assert!(c.decrypt(truncated).is_err());
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let c = cipher();
        assert!(matches!(
            c.decrypt("no-separator-here"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            c.decrypt("zzzz:0011"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            c.decrypt("0011:zzzz"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn rejects_bad_key_material() {
        assert!(matches!(
            KeyCipher::from_hex("deadbeef"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
        let not_hex = "g".repeat(KEY_HEX_LEN);
        assert!(matches!(
            KeyCipher::from_hex(&not_hex),
            Err(CryptoError::InvalidKeyEncoding)
        ));
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let envelope = cipher().encrypt("sk-secret").unwrap();
        let other = KeyCipher::from_hex(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        assert!(matches!(
            other.decrypt(&envelope),
            Err(CryptoError::DecryptFailed)
        ));
    }
}
