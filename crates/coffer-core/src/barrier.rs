//! Encryption barrier for Coffer.
//!
//! The barrier is the security boundary of the whole system: every byte that
//! reaches the storage backend above it passes through AES-256-GCM, so
//! storage only ever sees ciphertext. While unsealed the barrier holds the
//! live master key in memory; sealing drops (and thereby zeroizes) it.
//!
//! Lifecycle: `Uninitialized -> initialize -> Sealed -> unseal -> Unsealed
//! -> seal -> Sealed`. Initialization is terminal-once: the master key's
//! encrypted representation is committed exactly one time, and a second
//! attempt fails with [`BarrierError::AlreadyInitialized`].
//!
//! # Security model
//!
//! - The master key lives only in process memory, never on disk in plaintext.
//! - A known-plaintext init record (random canary, AEAD-encrypted under the
//!   master key) is what verifies candidate unseal keys: a failed decrypt is
//!   [`BarrierError::InvalidKey`], the expected signal during quorum
//!   collection.
//! - Keys (storage paths) stay plaintext to support prefix listing.
//! - Sealing replaces the in-memory key with `None`; `ZeroizeOnDrop` scrubs
//!   the old value.

use std::fmt;
use std::sync::Arc;

use coffer_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::crypto::{self, EncryptionKey};
use crate::error::{BarrierError, CryptoError};

/// Storage key for the barrier init record.
const BARRIER_INIT_PATH: &str = "core/barrier/init";

/// Length of the random canary inside the init record.
const CANARY_LEN: usize = 32;

/// The encrypted init record. Decrypting it successfully is the proof that a
/// candidate master key is correct.
#[derive(Serialize, Deserialize)]
struct BarrierInit {
    version: u32,
    canary: Vec<u8>,
}

/// The encryption barrier wrapping a storage backend.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    key: RwLock<Option<EncryptionKey>>,
}

impl Barrier {
    /// Create a new sealed barrier wrapping the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            key: RwLock::new(None),
        }
    }

    /// Whether a master key has ever been committed to storage.
    ///
    /// Callable before any key material exists.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the backend fails.
    pub async fn initialized(&self) -> Result<bool, BarrierError> {
        Ok(self.storage.exists(BARRIER_INIT_PATH).await?)
    }

    /// Generate a fresh random master key of the barrier's key size.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] with a `RandomSource` kind only on
    /// entropy-source failure.
    pub fn generate_key(&self) -> Result<EncryptionKey, BarrierError> {
        Ok(EncryptionKey::generate()?)
    }

    /// First-and-only commit of the master key's encrypted representation.
    ///
    /// Writes the init record (a random canary encrypted under `key`) so
    /// later [`unseal`](Barrier::unseal) calls can verify candidate keys.
    /// Does not leave the barrier unsealed.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::AlreadyInitialized`] if called twice.
    /// - [`BarrierError::Crypto`] / [`BarrierError::Storage`] on failure
    ///   encrypting or persisting the record.
    pub async fn initialize(&self, key: &EncryptionKey) -> Result<(), BarrierError> {
        if self.initialized().await? {
            return Err(BarrierError::AlreadyInitialized);
        }

        let mut canary = vec![0u8; CANARY_LEN];
        fill_random(&mut canary)?;
        let record = BarrierInit { version: 1, canary };
        let plaintext = serde_json::to_vec(&record).map_err(|e| CryptoError::Encryption {
            reason: format!("init record serialization failed: {e}"),
        })?;

        let sealed_record = crypto::encrypt(key, &plaintext)?;
        self.storage.put(BARRIER_INIT_PATH, &sealed_record).await?;

        info!("security barrier initialized");
        Ok(())
    }

    /// Verify `key` against the stored init record and, on success, load it
    /// into the in-memory unsealed state.
    ///
    /// Idempotent when already unsealed.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::NotInitialized`] if no init record exists.
    /// - [`BarrierError::InvalidKey`] if the key does not decrypt the record
    ///   — the expected outcome for a wrong or incomplete quorum.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn unseal(&self, key: EncryptionKey) -> Result<(), BarrierError> {
        let mut guard = self.key.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let sealed_record = self
            .storage
            .get(BARRIER_INIT_PATH)
            .await?
            .ok_or(BarrierError::NotInitialized)?;

        // AEAD authentication doubles as the key check: any mismatch fails
        // the tag and never yields plaintext.
        let plaintext =
            crypto::decrypt(&key, &sealed_record).map_err(|_| BarrierError::InvalidKey)?;
        let _record: BarrierInit =
            serde_json::from_slice(&plaintext).map_err(|_| BarrierError::InvalidKey)?;

        *guard = Some(key);
        info!("security barrier unsealed");
        Ok(())
    }

    /// Seal the barrier, discarding the in-memory master key.
    ///
    /// Best-effort and infallible: the old key is zeroized when the
    /// `Option<EncryptionKey>` is replaced with `None`.
    pub async fn seal(&self) {
        let mut guard = self.key.write().await;
        if guard.take().is_some() {
            info!("security barrier sealed");
        }
    }

    /// Whether the barrier is currently sealed.
    pub async fn sealed(&self) -> bool {
        self.key.read().await.is_none()
    }

    /// Read a value from storage, decrypting it through the barrier.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the barrier is sealed.
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let master = self.master_key().await?;

        match self.storage.get(key).await? {
            None => Ok(None),
            Some(ciphertext) => Ok(Some(crypto::decrypt(&master, &ciphertext)?)),
        }
    }

    /// Write a value to storage, encrypting it through the barrier.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the barrier is sealed.
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        let master = self.master_key().await?;

        let ciphertext = crypto::encrypt(&master, value)?;
        self.storage.put(key, &ciphertext).await?;
        Ok(())
    }

    /// Delete a key from storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the barrier is sealed.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn delete(&self, key: &str) -> Result<(), BarrierError> {
        let _master = self.master_key().await?;
        self.storage.delete(key).await?;
        Ok(())
    }

    /// List keys with the given prefix. Paths are not encrypted, only values.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the barrier is sealed.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BarrierError> {
        let _master = self.master_key().await?;
        Ok(self.storage.list(prefix).await?)
    }

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the barrier is sealed.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn exists(&self, key: &str) -> Result<bool, BarrierError> {
        let _master = self.master_key().await?;
        Ok(self.storage.exists(key).await?)
    }

    /// Clone the current master key, or fail if sealed.
    async fn master_key(&self) -> Result<EncryptionKey, BarrierError> {
        let guard = self.key.read().await;
        guard.clone().ok_or(BarrierError::Sealed)
    }
}

fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    use rand::RngCore;
    rand::rngs::OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomSource {
            reason: e.to_string(),
        })
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("sealed", &"<check with sealed()>")
            .finish_non_exhaustive()
    }
}
