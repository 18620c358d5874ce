//! Token store for Coffer.
//!
//! Tokens are never stored in plaintext — entries are keyed by
//! `SHA-256(token)` and persisted through the barrier, so the root token
//! issued at initialization leaves no usable trace in storage. Lookup hashes
//! the presented token and compares in constant time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::barrier::Barrier;
use crate::error::TokenError;

/// Storage prefix for token entries.
const TOKEN_PREFIX: &str = "sys/tokens/";

/// A stored token entry (persisted through the barrier).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    /// SHA-256 hash of the token (hex-encoded). This is the storage key.
    pub token_hash: String,
    /// Policies attached to this token.
    pub policies: Vec<String>,
    /// When the token was created.
    pub created_at: DateTime<Utc>,
    /// Display name for audit logs.
    pub display_name: String,
}

/// Manages token creation, lookup, and revocation.
#[derive(Debug)]
pub struct TokenStore {
    barrier: Arc<Barrier>,
}

impl TokenStore {
    /// Create a new token store backed by the given barrier.
    #[must_use]
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }

    /// Generate and persist a new root token.
    ///
    /// Returns the plaintext token — shown once, never stored.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Barrier`] if the barrier is sealed or storage
    /// fails.
    pub async fn root_token(&self) -> Result<String, TokenError> {
        let plaintext = uuid::Uuid::new_v4().to_string();
        let token_hash = hash_token(&plaintext);

        let entry = TokenEntry {
            token_hash: token_hash.clone(),
            policies: vec!["root".to_owned()],
            created_at: Utc::now(),
            display_name: "root".to_owned(),
        };
        self.persist(&entry).await?;

        info!("root token generated");
        Ok(plaintext)
    }

    /// Look up a token by its plaintext value.
    ///
    /// Returns `Ok(None)` for unknown tokens.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Corrupt`] if the stored entry is undecodable,
    /// [`TokenError::Barrier`] on barrier failure.
    pub async fn lookup(&self, token: &str) -> Result<Option<TokenEntry>, TokenError> {
        let token_hash = hash_token(token);
        let Some(bytes) = self
            .barrier
            .get(&format!("{TOKEN_PREFIX}{token_hash}"))
            .await?
        else {
            return Ok(None);
        };

        let entry: TokenEntry =
            serde_json::from_slice(&bytes).map_err(|e| TokenError::Corrupt {
                reason: e.to_string(),
            })?;

        // The storage key already committed to the hash; compare the stored
        // copy in constant time anyway so a corrupted entry cannot alias.
        let matches: bool = entry
            .token_hash
            .as_bytes()
            .ct_eq(token_hash.as_bytes())
            .into();
        if !matches {
            return Err(TokenError::Corrupt {
                reason: "stored token hash does not match entry key".to_owned(),
            });
        }
        Ok(Some(entry))
    }

    /// Revoke a token by its plaintext value. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Barrier`] on barrier failure.
    pub async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        let token_hash = hash_token(token);
        self.barrier
            .delete(&format!("{TOKEN_PREFIX}{token_hash}"))
            .await?;
        Ok(())
    }

    async fn persist(&self, entry: &TokenEntry) -> Result<(), TokenError> {
        let bytes = serde_json::to_vec(entry).map_err(|e| TokenError::Corrupt {
            reason: e.to_string(),
        })?;
        self.barrier
            .put(&format!("{TOKEN_PREFIX}{}", entry.token_hash), &bytes)
            .await?;
        Ok(())
    }
}

/// Hex-encoded SHA-256 of a plaintext token.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
