//! Sealed-secret storage for account tokens and proxy passwords
//!
//! Secrets at rest are AES-256-GCM blobs serialized as three base64
//! segments joined by `.`: `iv.tag.ciphertext`, with a fresh 12-byte IV
//! per seal. The 32-byte key is derived once at startup and never changes
//! for the life of the process.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Process-wide sealer/opener for stored secrets.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBox")
    }
}

impl SecretBox {
    /// Build a secret box from the raw configured secret.
    ///
    /// Accepted key material, in order:
    /// 1. 64 hex characters, decoded to 32 bytes
    /// 2. base64 of exactly 32 bytes
    /// 3. anything else: SHA-256 of the raw string (logged as a warning —
    ///    operators should supply a proper 32-byte key)
    pub fn new(raw_secret: &str) -> Result<Self> {
        let key = derive_key(raw_secret);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKey("not 32 bytes after derivation".to_string()))?;
        Ok(Self { cipher })
    }

    /// Seal a plaintext secret into the `iv.tag.ciphertext` form.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // aes-gcm appends the 16-byte tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::SealFailed)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}.{}.{}",
            BASE64.encode(iv),
            BASE64.encode(tag),
            BASE64.encode(sealed)
        ))
    }

    /// Open a sealed secret. Fails on any malformed segment, a wrong key,
    /// or tampered data.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let mut parts = sealed.split('.');
        let (iv_b64, tag_b64, ct_b64) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(iv), Some(tag), Some(ct), None) => (iv, tag, ct),
            _ => {
                return Err(CryptoError::Malformed(
                    "expected iv.tag.ciphertext".to_string(),
                )
                .into())
            }
        };

        let iv = BASE64
            .decode(iv_b64)
            .map_err(|e| CryptoError::Malformed(format!("iv segment: {e}")))?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::Malformed(format!("iv must be {IV_LEN} bytes")).into());
        }
        let tag = BASE64
            .decode(tag_b64)
            .map_err(|e| CryptoError::Malformed(format!("tag segment: {e}")))?;
        if tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed(format!("tag must be {TAG_LEN} bytes")).into());
        }
        let mut ciphertext = BASE64
            .decode(ct_b64)
            .map_err(|e| CryptoError::Malformed(format!("ciphertext segment: {e}")))?;
        ciphertext.extend_from_slice(&tag);

        let nonce = Nonce::from_slice(&iv);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::OpenFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::OpenFailed.into())
    }
}

fn derive_key(raw: &str) -> [u8; KEY_LEN] {
    let trimmed = raw.trim();

    if trimmed.len() == 64 {
        if let Ok(bytes) = hex::decode(trimmed) {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            return key;
        }
    }

    if let Ok(bytes) = BASE64.decode(trimmed) {
        if bytes.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            return key;
        }
    }

    tracing::warn!(
        "encryption key is neither 64 hex chars nor 32 base64 bytes; \
         deriving via SHA-256 — supply a proper 32-byte key in production"
    );
    let digest = Sha256::digest(trimmed.as_bytes());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest);
    key
}
