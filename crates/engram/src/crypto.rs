//! Authenticated encryption for persisted memory
//!
//! Encrypts opaque byte payloads with AES-256-GCM under a key derived from a
//! master passphrase via PBKDF2-HMAC-SHA-512. Every encryption draws a fresh
//! salt and nonce, so the same plaintext never produces the same envelope
//! twice. Decryption verifies the authentication tag and fails closed:
//! tampered or wrong-key input yields [`EngramError::Decryption`], never
//! partial plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::{EngramError, EngramResult};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;
const MIN_MASTER_KEY_LENGTH: usize = 32;

/// An authenticated ciphertext with its key-derivation salt and nonce
///
/// Serializes with each field base64-encoded, matching the on-disk envelope
/// format of the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Key-derivation salt (16 bytes)
    #[serde(with = "b64")]
    pub salt: Vec<u8>,

    /// AES-GCM nonce (12 bytes)
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,

    /// Authentication tag (16 bytes)
    #[serde(with = "b64")]
    pub tag: Vec<u8>,

    /// The encrypted payload
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Whether the component lengths are plausible for this codec
    pub fn is_well_formed(&self) -> bool {
        self.salt.len() == SALT_LENGTH
            && self.nonce.len() == NONCE_LENGTH
            && self.tag.len() == TAG_LENGTH
    }
}

/// Symmetric codec over a master passphrase
pub struct EncryptionCodec {
    master_key: String,
}

impl EncryptionCodec {
    /// Create a codec from a master key
    ///
    /// Fails with a validation error when the key is shorter than 32 bytes;
    /// encryption is never attempted with a short key.
    pub fn new(master_key: impl Into<String>) -> EngramResult<Self> {
        let master_key = master_key.into();
        if master_key.len() < MIN_MASTER_KEY_LENGTH {
            return Err(EngramError::validation(
                "master_key",
                "must be at least 32 bytes",
                format!("{} bytes", master_key.len()),
            ));
        }
        Ok(Self { master_key })
    }

    /// Encrypt a plaintext payload into an envelope
    pub fn encrypt(&self, plaintext: &[u8]) -> EngramResult<EncryptedEnvelope> {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key_bytes = self.derive_key(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; split it out so the
        // envelope carries it as a separate field
        let mut sealed = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| EngramError::decryption("encryption failed"))?;
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

        Ok(EncryptedEnvelope {
            salt: salt.to_vec(),
            nonce: nonce_bytes.to_vec(),
            tag,
            ciphertext: sealed,
        })
    }

    /// Decrypt an envelope back to the original plaintext
    ///
    /// The only outcomes are the exact pre-encryption bytes or a
    /// [`EngramError::Decryption`]; tag verification happens before any
    /// plaintext is released.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> EngramResult<Vec<u8>> {
        if !envelope.is_well_formed() {
            return Err(EngramError::decryption("malformed envelope"));
        }

        let key_bytes = self.derive_key(&envelope.salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(&envelope.nonce);

        let mut sealed = envelope.ciphertext.clone();
        sealed.extend_from_slice(&envelope.tag);

        cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| EngramError::decryption("invalid key or corrupted data"))
    }

    fn derive_key(&self, salt: &[u8]) -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha512>(self.master_key.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        key
    }

    /// Generate a fresh random master key, base64-encoded
    pub fn generate_master_key() -> String {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        BASE64.encode(bytes)
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "an-adequately-long-master-key-for-tests";
    const OTHER_KEY: &str = "a-different-but-equally-long-master-key";

    #[test]
    fn test_round_trip() {
        let codec = EncryptionCodec::new(KEY).unwrap();
        let plaintext = b"the user's favorite color is teal";

        let envelope = codec.encrypt(plaintext).unwrap();
        let decrypted = codec.decrypt(&envelope).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_encryption() {
        let codec = EncryptionCodec::new(KEY).unwrap();

        let a = codec.encrypt(b"same plaintext").unwrap();
        let b = codec.encrypt(b"same plaintext").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let codec = EncryptionCodec::new(KEY).unwrap();
        let other = EncryptionCodec::new(OTHER_KEY).unwrap();

        let envelope = codec.encrypt(b"secret").unwrap();
        let result = other.decrypt(&envelope);

        assert!(matches!(result, Err(EngramError::Decryption { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let codec = EncryptionCodec::new(KEY).unwrap();
        let mut envelope = codec.encrypt(b"payload worth protecting").unwrap();

        envelope.ciphertext[0] ^= 0xff;

        assert!(matches!(
            codec.decrypt(&envelope),
            Err(EngramError::Decryption { .. })
        ));
    }

    #[test]
    fn test_tampered_tag_fails_closed() {
        let codec = EncryptionCodec::new(KEY).unwrap();
        let mut envelope = codec.encrypt(b"payload").unwrap();

        envelope.tag[0] ^= 0x01;

        assert!(matches!(
            codec.decrypt(&envelope),
            Err(EngramError::Decryption { .. })
        ));
    }

    #[test]
    fn test_short_key_rejected_at_construction() {
        let result = EncryptionCodec::new("too short");
        assert!(matches!(result, Err(EngramError::Validation { .. })));
    }

    #[test]
    fn test_envelope_serde_is_base64() {
        let codec = EncryptionCodec::new(KEY).unwrap();
        let envelope = codec.encrypt(b"data").unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["salt"].is_string());
        assert!(json["ciphertext"].is_string());

        let back: EncryptedEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(codec.decrypt(&back).unwrap(), b"data");
    }

    #[test]
    fn test_generated_master_key_is_usable() {
        let key = EncryptionCodec::generate_master_key();
        assert!(EncryptionCodec::new(key).is_ok());
    }
}
