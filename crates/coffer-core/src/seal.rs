//! Seal abstraction for Coffer.
//!
//! A seal owns the barrier's share configuration and, when the seal type
//! supports it, an external key-wrapping mechanism that can protect a subset
//! of shares ("stored keys") for automatic unseal and an independent recovery
//! key path. Two implementations exist:
//!
//! - [`ShamirSeal`] — human-submitted shares only. No stored keys, no
//!   recovery key.
//! - [`AutoSeal`] — wraps stored keys and the recovery key through a
//!   [`KeyWrapper`], standing in for a remote key-management service.
//!
//! Callers branch only on the two capability flags
//! ([`Seal::recovery_key_supported`], [`Seal::stored_keys_supported`]), never
//! on the concrete type.
//!
//! Seal configurations persist as plaintext JSON directly in storage — they
//! must be readable while the barrier is still sealed.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use coffer_storage::StorageBackend;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, EncryptionKey};
use crate::error::SealError;

/// Storage key for the barrier seal configuration.
const BARRIER_CONFIG_PATH: &str = "core/seal/barrier-config";

/// Storage key for the recovery seal configuration.
const RECOVERY_CONFIG_PATH: &str = "core/seal/recovery-config";

/// Storage key for the wrapped stored-keys bundle.
const STORED_KEYS_PATH: &str = "core/seal/stored-keys";

/// Storage key for the wrapped recovery key.
const RECOVERY_KEY_PATH: &str = "core/seal/recovery-key";

/// Share configuration for a barrier or recovery key.
///
/// Created once at initialize time and immutable afterwards (rekey is out of
/// scope). The same shape covers both the barrier config and, for
/// auto-unseal-capable seals, the independent recovery config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealConfig {
    /// Total number of shares the master key is split into.
    pub secret_shares: u8,
    /// Minimum shares required to reconstruct the master key.
    pub secret_threshold: u8,
    /// How many generated shares the seal persists for automatic unseal.
    #[serde(default)]
    pub stored_shares: u8,
    /// Recipient public keys the shares are individually encrypted to
    /// (age X25519 recipients). Empty, or exactly one per share.
    #[serde(default, alias = "pgp_keys")]
    pub recipients: Vec<String>,
    /// Whether share verification is required before a rekey takes effect.
    /// Carried in the persisted document; rekey itself is out of scope.
    #[serde(default)]
    pub verification_required: bool,
}

impl SealConfig {
    /// A config with `shares` total shares and `threshold` required, no
    /// stored shares and no recipients.
    #[must_use]
    pub fn new(shares: u8, threshold: u8) -> Self {
        Self {
            secret_shares: shares,
            secret_threshold: threshold,
            stored_shares: 0,
            recipients: Vec::new(),
            verification_required: false,
        }
    }

    /// Check the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Validation`] if any invariant is violated:
    /// `1 <= secret_threshold <= secret_shares`,
    /// `stored_shares <= secret_shares`, and `recipients` empty or one per
    /// share.
    pub fn validate(&self) -> Result<(), SealError> {
        if self.secret_shares < 1 {
            return Err(SealError::Validation {
                reason: "secret_shares must be at least 1".to_owned(),
            });
        }
        if self.secret_threshold < 1 {
            return Err(SealError::Validation {
                reason: "secret_threshold must be at least 1".to_owned(),
            });
        }
        if self.secret_threshold > self.secret_shares {
            return Err(SealError::Validation {
                reason: format!(
                    "secret_threshold ({}) cannot exceed secret_shares ({})",
                    self.secret_threshold, self.secret_shares
                ),
            });
        }
        if self.stored_shares > self.secret_shares {
            return Err(SealError::Validation {
                reason: format!(
                    "stored_shares ({}) cannot exceed secret_shares ({})",
                    self.stored_shares, self.secret_shares
                ),
            });
        }
        if !self.recipients.is_empty() && self.recipients.len() != usize::from(self.secret_shares) {
            return Err(SealError::Validation {
                reason: format!(
                    "{} recipient keys supplied for {} shares; need none or one per share",
                    self.recipients.len(),
                    self.secret_shares
                ),
            });
        }
        Ok(())
    }
}

/// The seal protecting the barrier's master key.
///
/// Implementations persist the share configuration and, when supported, the
/// stored keys and recovery key. Unsupported operations return
/// [`SealError::Unsupported`]; callers are expected to branch on the
/// capability flags first.
#[async_trait::async_trait]
pub trait Seal: Send + Sync {
    /// Short name of the seal type, for logs.
    fn seal_type(&self) -> &'static str;

    /// Prepare any external auto-unseal mechanism. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Init`] propagating the underlying transport
    /// failure.
    async fn init(&self) -> Result<(), SealError>;

    /// Read the persisted barrier configuration.
    ///
    /// `Ok(None)` means "not yet initialized", not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Storage`] or [`SealError::Serialization`].
    async fn barrier_config(&self) -> Result<Option<SealConfig>, SealError>;

    /// Validate and persist the barrier configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Validation`] on invariant violation before any
    /// write happens.
    async fn set_barrier_config(&self, config: &SealConfig) -> Result<(), SealError>;

    /// Whether this seal guards an independent recovery key path.
    fn recovery_key_supported(&self) -> bool;

    /// Whether this seal can persist shares for automatic unseal.
    fn stored_keys_supported(&self) -> bool;

    /// Read the persisted recovery configuration, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Unsupported`] when recovery keys are not
    /// supported.
    async fn recovery_config(&self) -> Result<Option<SealConfig>, SealError>;

    /// Validate and persist the recovery configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Unsupported`] when recovery keys are not
    /// supported, [`SealError::Validation`] on invariant violation.
    async fn set_recovery_config(&self, config: &SealConfig) -> Result<(), SealError>;

    /// Persist the subset of shares designated for automatic unseal.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Unsupported`] when stored keys are not
    /// supported, [`SealError::KeyWrap`] if wrapping fails.
    async fn set_stored_keys(&self, keys: &[Vec<u8>]) -> Result<(), SealError>;

    /// Retrieve the stored shares. An empty store yields an empty vec, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Unsupported`] when stored keys are not
    /// supported, [`SealError::KeyWrap`] if unwrapping fails.
    async fn get_stored_keys(&self) -> Result<Vec<Vec<u8>>, SealError>;

    /// Persist the recovery master key.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Unsupported`] when recovery keys are not
    /// supported, [`SealError::KeyWrap`] if wrapping fails.
    async fn set_recovery_key(&self, key: &EncryptionKey) -> Result<(), SealError>;
}

async fn read_config(
    storage: &Arc<dyn StorageBackend>,
    path: &str,
) -> Result<Option<SealConfig>, SealError> {
    match storage.get(path).await? {
        None => Ok(None),
        Some(bytes) => {
            let config =
                serde_json::from_slice(&bytes).map_err(|e| SealError::Serialization {
                    reason: format!("seal config at '{path}' unreadable: {e}"),
                })?;
            Ok(Some(config))
        }
    }
}

async fn write_config(
    storage: &Arc<dyn StorageBackend>,
    path: &str,
    config: &SealConfig,
) -> Result<(), SealError> {
    config.validate()?;
    let bytes = serde_json::to_vec(config).map_err(|e| SealError::Serialization {
        reason: format!("seal config encoding failed: {e}"),
    })?;
    storage.put(path, &bytes).await?;
    Ok(())
}

/// The plain seal: the master key exists only as operator-held shares.
#[derive(Debug)]
pub struct ShamirSeal {
    storage: Arc<dyn StorageBackend>,
}

impl ShamirSeal {
    /// Create a Shamir seal over the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl Seal for ShamirSeal {
    fn seal_type(&self) -> &'static str {
        "shamir"
    }

    async fn init(&self) -> Result<(), SealError> {
        // Nothing external to prepare.
        Ok(())
    }

    async fn barrier_config(&self) -> Result<Option<SealConfig>, SealError> {
        read_config(&self.storage, BARRIER_CONFIG_PATH).await
    }

    async fn set_barrier_config(&self, config: &SealConfig) -> Result<(), SealError> {
        write_config(&self.storage, BARRIER_CONFIG_PATH, config).await
    }

    fn recovery_key_supported(&self) -> bool {
        false
    }

    fn stored_keys_supported(&self) -> bool {
        false
    }

    async fn recovery_config(&self) -> Result<Option<SealConfig>, SealError> {
        Err(SealError::Unsupported {
            operation: "recovery_config",
            seal_type: self.seal_type(),
        })
    }

    async fn set_recovery_config(&self, _config: &SealConfig) -> Result<(), SealError> {
        Err(SealError::Unsupported {
            operation: "set_recovery_config",
            seal_type: self.seal_type(),
        })
    }

    async fn set_stored_keys(&self, _keys: &[Vec<u8>]) -> Result<(), SealError> {
        Err(SealError::Unsupported {
            operation: "set_stored_keys",
            seal_type: self.seal_type(),
        })
    }

    async fn get_stored_keys(&self) -> Result<Vec<Vec<u8>>, SealError> {
        Err(SealError::Unsupported {
            operation: "get_stored_keys",
            seal_type: self.seal_type(),
        })
    }

    async fn set_recovery_key(&self, _key: &EncryptionKey) -> Result<(), SealError> {
        Err(SealError::Unsupported {
            operation: "set_recovery_key",
            seal_type: self.seal_type(),
        })
    }
}

/// An external mechanism that can wrap and unwrap key material without
/// human-submitted shares — the boundary a remote KMS sits behind.
#[async_trait::async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Short name of the wrapper, for logs.
    fn wrapper_type(&self) -> &'static str;

    /// Establish the connection/session to the wrapping service. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Init`] on transport failure.
    async fn init(&self) -> Result<(), SealError>;

    /// Wrap plaintext key material.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::KeyWrap`] on failure.
    async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError>;

    /// Unwrap previously wrapped key material.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::KeyWrap`] on failure.
    async fn unwrap_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SealError>;
}

/// A [`KeyWrapper`] backed by a local AES-256-GCM key.
///
/// Stands in for a remote wrapping service in tests and single-node
/// deployments where the wrapping key is provisioned out of band.
pub struct StaticKeyWrapper {
    key: EncryptionKey,
}

impl StaticKeyWrapper {
    /// Create a wrapper around the given key.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

#[async_trait::async_trait]
impl KeyWrapper for StaticKeyWrapper {
    fn wrapper_type(&self) -> &'static str {
        "static"
    }

    async fn init(&self) -> Result<(), SealError> {
        Ok(())
    }

    async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        crypto::encrypt(&self.key, plaintext).map_err(|e| SealError::KeyWrap {
            reason: e.to_string(),
        })
    }

    async fn unwrap_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
        crypto::decrypt(&self.key, ciphertext).map_err(|e| SealError::KeyWrap {
            reason: e.to_string(),
        })
    }
}

/// Wrapped stored-keys bundle as persisted. Shares are base64 strings so the
/// plaintext JSON (pre-wrap) stays printable in diagnostics tooling.
#[derive(Serialize, Deserialize)]
struct StoredKeysBundle {
    keys: Vec<String>,
}

/// The auto-unseal-capable seal.
///
/// Persists stored shares and the recovery key through its [`KeyWrapper`];
/// both capability flags are true.
pub struct AutoSeal {
    storage: Arc<dyn StorageBackend>,
    wrapper: Arc<dyn KeyWrapper>,
}

impl AutoSeal {
    /// Create an auto seal over the given storage and wrapping mechanism.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, wrapper: Arc<dyn KeyWrapper>) -> Self {
        Self { storage, wrapper }
    }
}

#[async_trait::async_trait]
impl Seal for AutoSeal {
    fn seal_type(&self) -> &'static str {
        "auto"
    }

    async fn init(&self) -> Result<(), SealError> {
        self.wrapper.init().await
    }

    async fn barrier_config(&self) -> Result<Option<SealConfig>, SealError> {
        read_config(&self.storage, BARRIER_CONFIG_PATH).await
    }

    async fn set_barrier_config(&self, config: &SealConfig) -> Result<(), SealError> {
        write_config(&self.storage, BARRIER_CONFIG_PATH, config).await
    }

    fn recovery_key_supported(&self) -> bool {
        true
    }

    fn stored_keys_supported(&self) -> bool {
        true
    }

    async fn recovery_config(&self) -> Result<Option<SealConfig>, SealError> {
        read_config(&self.storage, RECOVERY_CONFIG_PATH).await
    }

    async fn set_recovery_config(&self, config: &SealConfig) -> Result<(), SealError> {
        write_config(&self.storage, RECOVERY_CONFIG_PATH, config).await
    }

    async fn set_stored_keys(&self, keys: &[Vec<u8>]) -> Result<(), SealError> {
        let bundle = StoredKeysBundle {
            keys: keys.iter().map(|k| BASE64.encode(k)).collect(),
        };
        let plaintext = serde_json::to_vec(&bundle).map_err(|e| SealError::Serialization {
            reason: format!("stored-keys bundle encoding failed: {e}"),
        })?;
        let wrapped = self.wrapper.wrap(&plaintext).await?;
        self.storage.put(STORED_KEYS_PATH, &wrapped).await?;
        Ok(())
    }

    async fn get_stored_keys(&self) -> Result<Vec<Vec<u8>>, SealError> {
        let Some(wrapped) = self.storage.get(STORED_KEYS_PATH).await? else {
            return Ok(Vec::new());
        };
        let plaintext = self.wrapper.unwrap_key(&wrapped).await?;
        let bundle: StoredKeysBundle =
            serde_json::from_slice(&plaintext).map_err(|e| SealError::Serialization {
                reason: format!("stored-keys bundle unreadable: {e}"),
            })?;

        bundle
            .keys
            .iter()
            .map(|encoded| {
                BASE64.decode(encoded).map_err(|e| SealError::Serialization {
                    reason: format!("stored key not valid base64: {e}"),
                })
            })
            .collect()
    }

    async fn set_recovery_key(&self, key: &EncryptionKey) -> Result<(), SealError> {
        let wrapped = self.wrapper.wrap(key.as_bytes()).await?;
        self.storage.put(RECOVERY_KEY_PATH, &wrapped).await?;
        Ok(())
    }
}
