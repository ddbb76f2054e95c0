//! API key storage and validation

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::types::ApiKey;

/// Environment variable holding the optional hashing pepper
pub const PEPPER_ENV: &str = "HEXAUDIT_AUTH_PEPPER";

/// Error types for authentication operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid API key")]
    InvalidKey,
    #[error("API key has expired")]
    KeyExpired,
}

/// Storage for API keys (in-memory only).
pub struct AuthStore {
    /// Map from key hash to ApiKey
    keys: RwLock<HashMap<String, ApiKey>>,
    /// Optional pepper resolved at store construction time.
    pepper: Option<Vec<u8>>,
}

impl AuthStore {
    /// Create a new empty auth store
    pub fn new() -> Self {
        Self::with_pepper(current_pepper_from_env())
    }

    /// Create a store with an explicit pepper.
    pub fn with_pepper(pepper: Option<Vec<u8>>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            pepper,
        }
    }

    /// Compute a key hash using this store's configured pepper.
    ///
    /// With a pepper this is HMAC-SHA256, otherwise raw SHA-256.
    pub fn hash_key(&self, key: &str) -> String {
        hash_key_with_pepper(key, self.pepper.as_deref())
    }

    pub fn has_pepper(&self) -> bool {
        self.pepper.is_some()
    }

    /// Add a key to the store
    pub async fn add_key(&self, key: ApiKey) {
        let mut keys = self.keys.write().await;
        keys.insert(key.key_hash.clone(), key);
    }

    /// Validate a raw API key token and return the ApiKey if valid
    pub async fn validate_key(&self, token: &str) -> Result<ApiKey, AuthError> {
        let hash = self.hash_key(token);
        let keys = self.keys.read().await;

        let key = keys.get(&hash).cloned().ok_or(AuthError::InvalidKey)?;

        if key.is_expired() {
            return Err(AuthError::KeyExpired);
        }

        Ok(key)
    }

    /// Get number of keys in the store
    pub async fn key_count(&self) -> usize {
        let keys = self.keys.read().await;
        keys.len()
    }
}

fn hash_key_with_pepper(key: &str, pepper: Option<&[u8]>) -> String {
    let digest: [u8; 32] = match pepper {
        Some(pepper) => hmac_sha256(pepper, key.as_bytes()),
        None => Sha256::digest(key.as_bytes()).into(),
    };
    hex::encode(digest)
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // HMAC-SHA256 as defined in RFC 2104.
    const BLOCK_SIZE: usize = 64;

    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let hashed = Sha256::digest(key);
        key_block[..hashed.len()].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let ipad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    let opad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();

    let mut inner = Sha256::new();
    inner.update(&ipad);
    inner.update(message);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(&opad);
    outer.update(inner);
    outer.finalize().into()
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

fn current_pepper_from_env() -> Option<Vec<u8>> {
    std::env::var(PEPPER_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| v.into_bytes())
}
