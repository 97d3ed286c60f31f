//! Field-level encryption for sensitive data.
//!
//! AES-256-GCM authenticated encryption for token and secret values before
//! they are written to the database. Stored form is hex(nonce || ciphertext
//! || tag).

use anyhow::{Context, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Size of the encryption key (32 bytes = 256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce (12 bytes for AES-GCM).
const NONCE_SIZE: usize = 12;

/// Cipher for sensitive field values.
pub struct FieldCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl FieldCipher {
    /// Create a cipher from a 256-bit master key.
    pub fn new(master_key: &[u8; KEY_SIZE]) -> Result<Self> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
            .map_err(|_| anyhow::anyhow!("Failed to create encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a plaintext string into the hex-encoded storage form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a hex-encoded storage value.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let sealed = hex::decode(stored).context("Invalid hex encoding")?;
        if sealed.len() < NONCE_SIZE + AES_256_GCM.tag_len() {
            anyhow::bail!("Ciphertext too short");
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
        let nonce_array: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = encrypted.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| anyhow::anyhow!("Decryption failed - wrong key or corrupted data"))?;

        String::from_utf8(plaintext.to_vec()).context("Decrypted data is not valid UTF-8")
    }

    /// Encrypt an optional value, passing `None` through.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypt an optional value, passing `None` through.
    pub fn decrypt_opt(&self, stored: Option<&str>) -> Result<Option<String>> {
        stored.map(|s| self.decrypt(s)).transpose()
    }
}

/// Generate a random master key.
pub fn generate_master_key() -> Result<[u8; KEY_SIZE]> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_SIZE];
    rng.fill(&mut key)
        .map_err(|_| anyhow::anyhow!("Failed to generate random key"))?;
    Ok(key)
}
