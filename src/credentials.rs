//! Credential Store: AES-256-GCM sealing of connection secrets.
//!
//! Sealed form is `base64(nonce || ciphertext || tag)`. The connection id is
//! used as additional authenticated data, so a sealed blob copied onto another
//! connection record fails to open.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{CoreError, CoreResult};
use crate::models::{ConnectionSecret, SealedCredentials};

pub const KEY_LEN: usize = 32;

pub struct CredentialStore {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl CredentialStore {
    pub fn new(key: &[u8; KEY_LEN]) -> CoreResult<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CoreError::internal("Failed to create encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a base64-encoded 32-byte key, as supplied through configuration.
    pub fn from_base64(encoded: &str) -> CoreResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CoreError::invalid_input("Encryption key is not valid base64"))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::invalid_input(format!("Encryption key must be {} bytes", KEY_LEN))
        })?;
        Self::new(&key)
    }

    /// Generate a random key, base64-encoded.
    pub fn generate_key() -> CoreResult<String> {
        let mut key = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| CoreError::internal("Failed to generate encryption key"))?;
        Ok(STANDARD.encode(key))
    }

    pub fn seal(
        &self,
        connection_id: &str,
        secret: &ConnectionSecret,
    ) -> CoreResult<SealedCredentials> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CoreError::internal("Failed to generate nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut data = serde_json::to_vec(secret)
            .map_err(|e| CoreError::internal(format!("Failed to serialize credentials: {}", e)))?;
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(connection_id.as_bytes()), &mut data)
            .map_err(|_| CoreError::internal("Failed to encrypt credentials"))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(data);
        Ok(SealedCredentials(STANDARD.encode(combined)))
    }

    /// Decrypt the credentials of `connection_id`. Error messages never carry
    /// any part of the plaintext.
    pub fn open(
        &self,
        connection_id: &str,
        sealed: &SealedCredentials,
    ) -> CoreResult<ConnectionSecret> {
        let combined = STANDARD
            .decode(sealed.as_str())
            .map_err(|_| CoreError::internal("Stored credentials are not valid base64"))?;
        if combined.len() < NONCE_LEN {
            return Err(CoreError::internal("Stored credentials are truncated"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| CoreError::internal("Stored credentials have an invalid nonce"))?;

        let mut buf = ciphertext.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::from(connection_id.as_bytes()), &mut buf)
            .map_err(|_| {
                CoreError::internal("Stored credentials could not be decrypted for this connection")
            })?;

        serde_json::from_slice(plain)
            .map_err(|_| CoreError::internal("Stored credentials are malformed"))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
