use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-256-GCM with a 128-bit IV.
type FieldAead = AesGcm<Aes256, U16>;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 64;

const ROUND_TRIP_PROBE: &str = "answerbot-encryption-self-test";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption salt is required")]
    MissingSalt,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: authentication tag did not verify")]
    Decrypt,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

/// Per-field authenticated encryption keyed by a record salt and the
/// deployment's instance identifier.
///
/// Stored values have the layout `hex(iv) || hex(ciphertext) || hex(tag)`.
/// The key is SHA-256(salt || instance id), so losing either the salt or the
/// instance id makes previously stored values unrecoverable.
#[derive(Clone)]
pub struct FieldCipher {
    instance_id: SecretString,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").field("instance_id", &"<redacted>").finish()
    }
}

impl FieldCipher {
    pub fn new(instance_id: SecretString) -> Self {
        Self { instance_id }
    }

    pub fn generate_salt() -> String {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        hex::encode(salt)
    }

    pub fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String, CipherError> {
        require_salt(salt)?;
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let aead = self.aead(salt)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        // aes-gcm appends the tag to the ciphertext, which is exactly the stored order.
        let sealed = aead
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut encoded = String::with_capacity((IV_LEN + sealed.len()) * 2);
        encoded.push_str(&hex::encode(iv));
        encoded.push_str(&hex::encode(&sealed));
        Ok(encoded)
    }

    pub fn decrypt(&self, ciphertext: &str, salt: &str) -> Result<String, CipherError> {
        require_salt(salt)?;
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let min_len = (IV_LEN + TAG_LEN) * 2;
        if ciphertext.len() < min_len {
            return Err(CipherError::Malformed(format!(
                "expected at least {min_len} hex characters, found {}",
                ciphertext.len()
            )));
        }

        let raw = hex::decode(ciphertext)
            .map_err(|error| CipherError::Malformed(format!("invalid hex encoding: {error}")))?;
        let (iv, sealed) = raw.split_at(IV_LEN);

        let aead = self.aead(salt)?;
        let plaintext =
            aead.decrypt(Nonce::<U16>::from_slice(iv), sealed).map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::Malformed("plaintext is not valid UTF-8".to_string()))
    }

    /// Encrypts and decrypts a fixed probe under `salt`.
    pub fn test_round_trip(&self, salt: &str) -> bool {
        self.encrypt(ROUND_TRIP_PROBE, salt)
            .and_then(|ciphertext| self.decrypt(&ciphertext, salt))
            .map(|plaintext| plaintext == ROUND_TRIP_PROBE)
            .unwrap_or(false)
    }

    fn aead(&self, salt: &str) -> Result<FieldAead, CipherError> {
        let key = self.derive_key(salt);
        FieldAead::new_from_slice(key.as_slice()).map_err(|_| CipherError::Encrypt)
    }

    fn derive_key(&self, salt: &str) -> Zeroizing<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(self.instance_id.expose_secret().as_bytes());

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&hasher.finalize());
        key
    }
}

fn require_salt(salt: &str) -> Result<(), CipherError> {
    if salt.trim().is_empty() {
        return Err(CipherError::MissingSalt);
    }
    Ok(())
}
