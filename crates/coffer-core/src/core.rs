//! Core orchestrator for the initialize/unseal/seal lifecycle.
//!
//! [`Core`] coordinates the seal, the barrier, and downstream bring-up
//! (cluster setup, router mounts, root-token issuance) under a single state
//! lock. It is constructed once per process with injected collaborators —
//! there is no global state, and the state lock is an explicit field.
//!
//! The lifecycle protocol:
//!
//! 1. **Initialize**: validate configs, persist them through the seal,
//!    generate the master key, split it into shares (wrapping them for
//!    recipients and peeling off stored shares when configured), commit the
//!    barrier, bring the system up once for bootstrap, issue the root token,
//!    and re-seal on every exit path.
//! 2. **Unseal**: operators submit shares one at a time; progress accumulates
//!    in a lock-protected buffer until the threshold is met, then the codec
//!    reconstructs the master key and the barrier verifies it.
//! 3. **Seal**: pre-seal teardown, then the barrier drops the key.
//! 4. **UnsealWithStoredKeys**: for auto-unseal-capable seals, feed the
//!    persisted shares through the same accumulation path.
//!
//! Unseal progress never persists across restarts — a fresh quorum is always
//! required after a process start.

use std::sync::Arc;

use coffer_storage::{CacheBackend, StorageBackend};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use zeroize::Zeroize;

use crate::barrier::Barrier;
use crate::crypto::EncryptionKey;
use crate::error::{BarrierError, CoreError};
use crate::logical::{LogicalBackend, Request, Response, Router};
use crate::seal::{Seal, SealConfig};
use crate::shamir;
use crate::token::TokenStore;
use crate::wrap;

/// Storage key for the cluster identity record.
const CLUSTER_INFO_PATH: &str = "core/cluster/local";

/// Longest share the accumulator will accept. Wrapped or corrupted inputs
/// larger than this are rejected up front.
const MAX_SHARE_LEN: usize = 512;

/// The one-time output of initialization.
///
/// The caller is solely responsible for distributing the shares and the root
/// token; the system retains no copy.
pub struct InitResult {
    /// Barrier unseal shares returned to the operator (stored shares already
    /// peeled off, recipient-wrapped when configured).
    pub secret_shares: Vec<Vec<u8>>,
    /// Recovery shares, when the seal supports a recovery key path.
    pub recovery_shares: Vec<Vec<u8>>,
    /// The initial root token.
    pub root_token: String,
}

impl std::fmt::Debug for InitResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitResult")
            .field("secret_shares", &self.secret_shares.len())
            .field("recovery_shares", &self.recovery_shares.len())
            .field("root_token", &"[REDACTED]")
            .finish()
    }
}

/// Snapshot of the seal state for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealStatus {
    /// Whether the core has been initialized.
    pub initialized: bool,
    /// Whether the barrier is currently sealed.
    pub sealed: bool,
    /// Threshold of shares required to unseal.
    pub threshold: u8,
    /// Total number of shares.
    pub shares: u8,
    /// Shares accumulated in the current unseal attempt.
    pub progress: u8,
}

/// Persisted cluster identity, written once during the first bring-up.
#[derive(Debug, Serialize, Deserialize)]
struct ClusterInfo {
    name: String,
    id: String,
}

/// The core orchestrator.
pub struct Core {
    barrier: Arc<Barrier>,
    seal: Arc<dyn Seal>,
    cache: Arc<CacheBackend>,
    token_store: TokenStore,
    router: Router,
    /// Serializes the lifecycle operations. Held for the full duration of
    /// initialize; check-then-act for unseal/seal.
    state_lock: Mutex<()>,
    /// Shares accumulated for the current unseal attempt. Own lock so
    /// concurrent submissions from distinct operators serialize cleanly.
    unseal_progress: Mutex<Vec<Vec<u8>>>,
}

impl Core {
    /// Build a core over the given storage backend and seal.
    ///
    /// The backend is wrapped in a read-through cache; the barrier and token
    /// store sit above it. The cache is purged on every post-unseal bring-up.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, seal: Arc<dyn Seal>) -> Self {
        let cache = Arc::new(CacheBackend::new(storage));
        let barrier = Arc::new(Barrier::new(
            Arc::clone(&cache) as Arc<dyn StorageBackend>
        ));
        let token_store = TokenStore::new(Arc::clone(&barrier));
        Self {
            barrier,
            seal,
            cache,
            token_store,
            router: Router::new(),
            state_lock: Mutex::new(()),
            unseal_progress: Mutex::new(Vec::new()),
        }
    }

    /// The token store above this core's barrier.
    #[must_use]
    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    /// Whether the barrier is currently sealed.
    pub async fn sealed(&self) -> bool {
        self.barrier.sealed().await
    }

    /// Whether the core has been initialized.
    ///
    /// Requires both the barrier init record and a persisted seal
    /// configuration — a barrier that claims initialized with no seal config
    /// is reported as an internal error, not silently treated either way.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] on the inconsistent state above, or a
    /// wrapped barrier/seal error on transport failure.
    pub async fn initialized(&self) -> Result<bool, CoreError> {
        let barrier_init = self
            .barrier
            .initialized()
            .await
            .map_err(|e| CoreError::Barrier {
                phase: "barrier init check failed",
                source: e,
            })?;
        if !barrier_init {
            return Ok(false);
        }

        let config = self
            .seal
            .barrier_config()
            .await
            .map_err(|e| CoreError::Seal {
                phase: "reading seal configuration failed",
                source: e,
            })?;
        if config.is_none() {
            return Err(CoreError::Internal {
                reason: "barrier reports initialized but no seal configuration found".to_owned(),
            });
        }
        Ok(true)
    }

    /// Initialize the core with the given barrier and recovery
    /// configurations.
    ///
    /// Runs the full bootstrap protocol under the exclusive state lock and
    /// leaves the system **sealed**: the operator must unseal with the
    /// returned shares (or rely on stored keys).
    ///
    /// If a failure occurs after the barrier commit, the barrier remains
    /// durably initialized: the error is fatal for this call and the process
    /// must be restarted into the normal unseal flow rather than re-running
    /// initialization.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfiguration`] before any mutation if either
    ///   config violates the invariants (or a required recovery config is
    ///   missing).
    /// - [`CoreError::AlreadyInitialized`] if initialization already
    ///   happened.
    /// - Phase-tagged seal/barrier errors for everything downstream;
    ///   failures after the barrier commit arrive wrapped in
    ///   [`CoreError::PostCommitInit`].
    pub async fn initialize(
        &self,
        barrier_config: &SealConfig,
        recovery_config: Option<&SealConfig>,
    ) -> Result<InitResult, CoreError> {
        // Validate everything before any mutation.
        if self.seal.recovery_key_supported() {
            let Some(recovery) = recovery_config else {
                return Err(CoreError::InvalidConfiguration {
                    kind: "recovery",
                    reason: "recovery configuration must be supplied".to_owned(),
                });
            };
            if recovery.secret_shares < 1 {
                return Err(CoreError::InvalidConfiguration {
                    kind: "recovery",
                    reason: "recovery configuration must specify a positive number of shares"
                        .to_owned(),
                });
            }
            recovery
                .validate()
                .map_err(|e| CoreError::InvalidConfiguration {
                    kind: "recovery",
                    reason: e.to_string(),
                })?;
        }
        barrier_config
            .validate()
            .map_err(|e| CoreError::InvalidConfiguration {
                kind: "barrier",
                reason: e.to_string(),
            })?;
        if barrier_config.stored_shares > 0 && !self.seal.stored_keys_supported() {
            return Err(CoreError::InvalidConfiguration {
                kind: "barrier",
                reason: "stored shares require a seal with stored-keys support".to_owned(),
            });
        }

        // Exclusive for the whole multi-step sequence: two initializations
        // racing here would corrupt the master key.
        let _state = self.state_lock.lock().await;

        if self.initialized().await? {
            return Err(CoreError::AlreadyInitialized);
        }

        self.seal.init().await.map_err(|e| {
            error!(error = %e, "failed to initialize seal");
            CoreError::Seal {
                phase: "seal initialization failed",
                source: e,
            }
        })?;

        self.seal
            .set_barrier_config(barrier_config)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to save barrier configuration");
                CoreError::Seal {
                    phase: "barrier configuration saving failed",
                    source: e,
                }
            })?;

        let (master_key, mut unseal_shares) = self.generate_shares(barrier_config)?;

        // Stored shares come off the front; only the remainder goes back to
        // the caller.
        if barrier_config.stored_shares > 0 {
            let stored: Vec<Vec<u8>> = unseal_shares
                .drain(..usize::from(barrier_config.stored_shares))
                .collect();
            self.seal.set_stored_keys(&stored).await.map_err(|e| {
                error!(error = %e, "failed to store keys");
                CoreError::Seal {
                    phase: "storing keys failed",
                    source: e,
                }
            })?;
        }

        self.barrier
            .initialize(&master_key)
            .await
            .map_err(|e| CoreError::Barrier {
                phase: "barrier initialization failed",
                source: e,
            })?;
        info!(
            shares = barrier_config.secret_shares,
            threshold = barrier_config.secret_threshold,
            "security barrier initialized"
        );

        self.barrier
            .unseal(master_key)
            .await
            .map_err(|e| CoreError::Barrier {
                phase: "barrier unseal for bootstrap failed",
                source: e,
            })?;

        // The barrier must be re-sealed on every exit path from here on.
        let bootstrap = self.bootstrap(recovery_config).await;
        self.barrier.seal().await;

        let (root_token, recovery_shares) = bootstrap.map_err(|e| {
            error!(error = %e, "initialization failed after the barrier commit");
            CoreError::PostCommitInit {
                source: Box::new(e),
            }
        })?;

        Ok(InitResult {
            secret_shares: unseal_shares,
            recovery_shares,
            root_token,
        })
    }

    /// Bootstrap steps that run with the barrier transiently unsealed during
    /// initialization. Failures here leave the barrier durably initialized.
    async fn bootstrap(
        &self,
        recovery_config: Option<&SealConfig>,
    ) -> Result<(String, Vec<Vec<u8>>), CoreError> {
        self.setup_cluster().await?;
        self.post_unseal().await?;

        // Recovery keys live behind the barrier's seal mechanism, so this
        // must happen post-unseal.
        let mut recovery_shares = Vec::new();
        if self.seal.recovery_key_supported() {
            let Some(recovery) = recovery_config else {
                return Err(CoreError::Internal {
                    reason: "recovery config vanished between validation and bootstrap".to_owned(),
                });
            };
            self.seal.set_recovery_config(recovery).await.map_err(|e| {
                error!(error = %e, "failed to save recovery configuration");
                CoreError::Seal {
                    phase: "recovery configuration saving failed",
                    source: e,
                }
            })?;

            if recovery.secret_shares > 0 {
                let (recovery_key, shares) = self.generate_shares(recovery)?;
                self.seal
                    .set_recovery_key(&recovery_key)
                    .await
                    .map_err(|e| CoreError::Seal {
                        phase: "recovery key saving failed",
                        source: e,
                    })?;
                recovery_shares = shares;
            }
        }

        let root_token = self.token_store.root_token().await?;

        self.pre_seal().await;
        Ok((root_token, recovery_shares))
    }

    /// Generate a master key and split it per `config`.
    ///
    /// With `secret_shares == 1` the share sequence is just the raw key.
    /// When recipients are configured, each share is hex-encoded and
    /// encrypted to its recipient; the unwrapped shares are not retained.
    fn generate_shares(
        &self,
        config: &SealConfig,
    ) -> Result<(EncryptionKey, Vec<Vec<u8>>), CoreError> {
        let master_key = self
            .barrier
            .generate_key()
            .map_err(|e| CoreError::Barrier {
                phase: "key generation failed",
                source: e,
            })?;

        let mut shares = if config.secret_shares == 1 {
            vec![master_key.as_bytes().to_vec()]
        } else {
            shamir::split(
                master_key.as_bytes(),
                config.secret_shares,
                config.secret_threshold,
            )?
        };

        if !config.recipients.is_empty() {
            let recipients = wrap::parse_recipients(&config.recipients)?;
            let wrapped = wrap::wrap_shares(&shares, &recipients)?;
            for share in &mut shares {
                share.zeroize();
            }
            shares = wrapped;
        }

        Ok((master_key, shares))
    }

    /// Submit one unseal share.
    ///
    /// Returns `Ok(false)` while below threshold (the expected
    /// keep-submitting state) and `Ok(true)` once the barrier unseals. Exact
    /// duplicates within one attempt are a no-op. A failed combination or a
    /// wrong reconstructed key clears all accumulated progress — partial
    /// shares are never silently retried.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotInitialized`] before initialization.
    /// - [`CoreError::InvalidShare`] for empty or oversized input.
    /// - [`CoreError::Barrier`] carrying `InvalidKey` when the quorum
    ///   reconstructs the wrong key.
    pub async fn unseal(&self, share: &[u8]) -> Result<bool, CoreError> {
        if share.is_empty() {
            return Err(CoreError::InvalidShare {
                reason: "share is empty".to_owned(),
            });
        }
        if share.len() > MAX_SHARE_LEN {
            return Err(CoreError::InvalidShare {
                reason: format!("share exceeds {MAX_SHARE_LEN} bytes"),
            });
        }

        let _state = self.state_lock.lock().await;

        if !self.barrier.sealed().await {
            return Ok(true);
        }

        let config = self
            .seal
            .barrier_config()
            .await
            .map_err(|e| CoreError::Seal {
                phase: "reading seal configuration failed",
                source: e,
            })?
            .ok_or(CoreError::NotInitialized)?;

        let mut quorum = {
            let mut progress = self.unseal_progress.lock().await;
            if progress.iter().any(|existing| existing == share) {
                // Same operator resubmitting the same share is not an error;
                // it just doesn't advance progress.
                debug!("duplicate unseal share ignored");
                return Ok(false);
            }
            progress.push(share.to_vec());

            if progress.len() < usize::from(config.secret_threshold) {
                debug!(
                    progress = progress.len(),
                    threshold = config.secret_threshold,
                    "unseal share accepted, below threshold"
                );
                return Ok(false);
            }

            // Threshold met: take the quorum out, leaving progress empty for
            // whatever happens next.
            std::mem::take(&mut *progress)
        };

        let combined = if config.secret_shares == 1 {
            quorum.first().cloned().ok_or(CoreError::Internal {
                reason: "empty quorum at threshold".to_owned(),
            })
        } else {
            shamir::combine(&quorum, config.secret_threshold).map_err(CoreError::from)
        };
        for share in &mut quorum {
            share.zeroize();
        }
        let mut combined = combined?;

        let key = EncryptionKey::try_from_slice(&combined);
        combined.zeroize();
        // A wrong-length reconstruction means a polluted quorum, the same
        // expected failure as a wrong key.
        let key = match key {
            Ok(key) => key,
            Err(_) => {
                warn!("unseal quorum reconstructed a key of the wrong size");
                return Err(CoreError::Barrier {
                    phase: "barrier unseal failed",
                    source: BarrierError::InvalidKey,
                });
            }
        };

        match self.barrier.unseal(key).await {
            Ok(()) => {}
            Err(BarrierError::InvalidKey) => {
                warn!("unseal attempt with invalid key");
                return Err(CoreError::Barrier {
                    phase: "barrier unseal failed",
                    source: BarrierError::InvalidKey,
                });
            }
            Err(e) => {
                return Err(CoreError::Barrier {
                    phase: "barrier unseal failed",
                    source: e,
                });
            }
        }

        if let Err(e) = self.post_unseal().await {
            // Bring-up failed: do not stay half-unsealed.
            error!(error = %e, "post-unseal setup failed");
            self.barrier.seal().await;
            return Err(e);
        }

        info!("core unsealed");
        Ok(true)
    }

    /// Seal the core: pre-seal teardown, then the barrier drops the master
    /// key. Idempotent. Authorization is the caller's concern.
    pub async fn seal(&self) {
        let _state = self.state_lock.lock().await;

        self.unseal_progress.lock().await.clear();
        if self.barrier.sealed().await {
            return;
        }

        self.pre_seal().await;
        self.barrier.seal().await;
        info!("core sealed");
    }

    /// Attempt to unseal using the seal's stored shares.
    ///
    /// A no-op success when the seal has no stored-keys support or the
    /// barrier is already unsealed. Finding no stored shares logs a warning
    /// and succeeds without unsealing. Running out of stored shares below
    /// threshold also succeeds — callers are expected to notice via
    /// [`Core::sealed`] and alert.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NonFatal`] when fetching or applying the stored
    /// shares fails for transport reasons, so callers can decide whether to
    /// retry.
    pub async fn unseal_with_stored_keys(&self) -> Result<(), CoreError> {
        if !self.seal.stored_keys_supported() {
            return Ok(());
        }
        if !self.barrier.sealed().await {
            return Ok(());
        }

        info!("stored unseal keys supported, attempting fetch");
        // Fetched outside the state lock: a stuck external unwrap must not
        // block interactive unseal.
        let keys = self.seal.get_stored_keys().await.map_err(|e| {
            error!(error = %e, "fetching stored unseal keys failed");
            CoreError::NonFatal {
                reason: format!("fetching stored unseal keys failed: {e}"),
            }
        })?;

        if keys.is_empty() {
            warn!("stored unseal key(s) supported but none found");
            return Ok(());
        }

        let mut unsealed = false;
        let mut keys_used = 0u32;
        for key in &keys {
            unsealed = self.unseal(key).await.map_err(|e| {
                error!(error = %e, "unseal with stored unseal key failed");
                CoreError::NonFatal {
                    reason: format!("unseal with stored key failed: {e}"),
                }
            })?;
            keys_used += 1;
            if unsealed {
                break;
            }
        }

        if unsealed {
            info!(stored_keys_used = keys_used, "successfully unsealed with stored key(s)");
        } else {
            warn!(
                stored_keys_used = keys_used,
                "stored unseal key(s) used but core not unsealed yet"
            );
        }
        Ok(())
    }

    /// Current seal status snapshot.
    ///
    /// # Errors
    ///
    /// Returns a wrapped seal/barrier error on transport failure.
    pub async fn seal_status(&self) -> Result<SealStatus, CoreError> {
        let initialized = self.initialized().await?;
        let sealed = self.barrier.sealed().await;

        let (threshold, shares, progress) = if initialized {
            let config = self
                .seal
                .barrier_config()
                .await
                .map_err(|e| CoreError::Seal {
                    phase: "reading seal configuration failed",
                    source: e,
                })?
                .ok_or(CoreError::NotInitialized)?;
            let progress = self.unseal_progress.lock().await;
            let submitted = u8::try_from(progress.len()).unwrap_or(u8::MAX);
            (config.secret_threshold, config.secret_shares, submitted)
        } else {
            (0, 0, 0)
        };

        Ok(SealStatus {
            initialized,
            sealed,
            threshold,
            shares,
            progress,
        })
    }

    /// Mount a logical backend at the given prefix.
    pub async fn mount(&self, prefix: &str, backend: Arc<dyn LogicalBackend>) {
        self.router
            .mount(Arc::clone(&self.barrier), prefix, backend)
            .await;
    }

    /// Route a request to its mounted backend. Fails with a barrier `Sealed`
    /// error (through the backend's view) while sealed.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub async fn route(&self, request: &Request) -> Result<Response, crate::error::LogicalError> {
        self.router.route(request).await
    }

    /// One-time cluster identity setup; a no-op when the record exists.
    async fn setup_cluster(&self) -> Result<(), CoreError> {
        let existing = self
            .barrier
            .get(CLUSTER_INFO_PATH)
            .await
            .map_err(|e| CoreError::Barrier {
                phase: "cluster setup failed",
                source: e,
            })?;
        if existing.is_some() {
            return Ok(());
        }

        let id = uuid::Uuid::new_v4().to_string();
        let info = ClusterInfo {
            name: format!("coffer-cluster-{}", &id[..8]),
            id,
        };
        let bytes = serde_json::to_vec(&info).map_err(|e| CoreError::Internal {
            reason: format!("cluster info encoding failed: {e}"),
        })?;
        self.barrier
            .put(CLUSTER_INFO_PATH, &bytes)
            .await
            .map_err(|e| CoreError::Barrier {
                phase: "cluster setup failed",
                source: e,
            })?;
        info!(cluster = %info.name, "cluster identity created");
        Ok(())
    }

    /// Bring-up after the barrier unseals: drop every cached storage entry
    /// from before this node held the key.
    async fn post_unseal(&self) -> Result<(), CoreError> {
        self.cache.purge().await;
        debug!("post-unseal setup complete");
        Ok(())
    }

    /// Teardown before the barrier seals.
    async fn pre_seal(&self) {
        self.cache.purge().await;
        debug!("pre-seal teardown complete");
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("seal_type", &self.seal.seal_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use coffer_storage::MemoryBackend;

    use super::*;
    use crate::error::SealError;
    use crate::seal::{AutoSeal, KeyWrapper, ShamirSeal, StaticKeyWrapper};

    fn shamir_core() -> Core {
        let storage = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        let seal = Arc::new(ShamirSeal::new(Arc::clone(&storage)));
        Core::new(storage, seal)
    }

    fn auto_core() -> Core {
        let storage = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        let wrapper = StaticKeyWrapper::new(EncryptionKey::generate().unwrap());
        let seal = Arc::new(AutoSeal::new(Arc::clone(&storage), Arc::new(wrapper)));
        Core::new(storage, seal)
    }

    async fn unseal_all(core: &Core, shares: &[Vec<u8>], threshold: usize) {
        for (i, share) in shares.iter().take(threshold).enumerate() {
            let unsealed = core.unseal(share).await.unwrap();
            assert_eq!(unsealed, i + 1 == threshold);
        }
    }

    // ── initialize ───────────────────────────────────────────────────

    #[tokio::test]
    async fn initialize_returns_shares_and_token_and_stays_sealed() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(5, 3), None)
            .await
            .unwrap();

        assert_eq!(result.secret_shares.len(), 5);
        assert!(result.recovery_shares.is_empty());
        assert!(!result.root_token.is_empty());
        assert!(core.sealed().await);
        assert!(core.initialized().await.unwrap());
    }

    #[tokio::test]
    async fn initialize_twice_is_rejected_and_first_token_survives() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap();

        let err = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyInitialized));

        // The first root token still resolves once unsealed.
        unseal_all(&core, &result.secret_shares, 2).await;
        let entry = core
            .token_store()
            .lookup(&result.root_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.policies, vec!["root".to_owned()]);
    }

    #[tokio::test]
    async fn initialize_rejects_invalid_config_without_mutation() {
        let core = shamir_core();
        let err = core
            .initialize(&SealConfig::new(2, 3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { kind: "barrier", .. }));
        assert!(!core.initialized().await.unwrap());
    }

    #[tokio::test]
    async fn stored_shares_without_capability_rejected_up_front() {
        let core = shamir_core();
        let mut config = SealConfig::new(5, 3);
        config.stored_shares = 2;

        let err = core.initialize(&config, None).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { kind: "barrier", .. }));
        // Rejected before any mutation, not mid-protocol.
        assert!(!core.initialized().await.unwrap());
    }

    #[tokio::test]
    async fn recovery_seal_requires_recovery_config() {
        let core = auto_core();
        let err = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { kind: "recovery", .. }));
    }

    #[tokio::test]
    async fn single_share_config_returns_raw_key() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(1, 1), None)
            .await
            .unwrap();
        assert_eq!(result.secret_shares.len(), 1);
        // The degenerate share is the raw 32-byte master key.
        assert_eq!(result.secret_shares[0].len(), 32);

        assert!(core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(!core.sealed().await);
    }

    #[tokio::test]
    async fn recipient_wrapped_shares_unwrap_and_unseal() {
        let identities: Vec<age::x25519::Identity> =
            (0..3).map(|_| age::x25519::Identity::generate()).collect();

        let mut config = SealConfig::new(3, 2);
        config.recipients = identities
            .iter()
            .map(|id| id.to_public().to_string())
            .collect();

        let core = shamir_core();
        let result = core.initialize(&config, None).await.unwrap();
        assert_eq!(result.secret_shares.len(), 3);

        // Each operator decrypts their own share out of band, hex-decodes
        // it, and submits the plain share bytes.
        for (i, identity) in identities.iter().take(2).enumerate() {
            let hex_share = age::decrypt(identity, &result.secret_shares[i]).unwrap();
            let share = hex::decode(hex_share).unwrap();
            let unsealed = core.unseal(&share).await.unwrap();
            assert_eq!(unsealed, i == 1);
        }
        assert!(!core.sealed().await);
    }

    #[tokio::test]
    async fn recovery_shares_generated_for_auto_seal() {
        let core = auto_core();
        let result = core
            .initialize(&SealConfig::new(1, 1), Some(&SealConfig::new(5, 3)))
            .await
            .unwrap();
        assert_eq!(result.recovery_shares.len(), 5);
    }

    /// A wrapper whose wrap path is down, so bootstrap fails at the recovery
    /// key step, after the barrier has already been committed.
    struct DownWrapper;

    #[async_trait::async_trait]
    impl KeyWrapper for DownWrapper {
        fn wrapper_type(&self) -> &'static str {
            "down"
        }

        async fn init(&self) -> Result<(), SealError> {
            Ok(())
        }

        async fn wrap(&self, _plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
            Err(SealError::KeyWrap {
                reason: "wrapping service unavailable".to_owned(),
            })
        }

        async fn unwrap_key(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
            Err(SealError::KeyWrap {
                reason: "wrapping service unavailable".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn bootstrap_failure_reports_durable_initialization() {
        let storage = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        let seal = Arc::new(AutoSeal::new(Arc::clone(&storage), Arc::new(DownWrapper)));
        let core = Core::new(storage, seal);

        let err = core
            .initialize(&SealConfig::new(1, 1), Some(&SealConfig::new(1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PostCommitInit { .. }));
        assert!(err.to_string().contains("durably initialized"));

        // The barrier commit is not rolled back: the core is initialized,
        // sealed, and refuses a second initialization.
        assert!(core.sealed().await);
        assert!(core.initialized().await.unwrap());
        let err = core
            .initialize(&SealConfig::new(1, 1), Some(&SealConfig::new(1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyInitialized));
    }

    // ── concurrency ──────────────────────────────────────────────────

    #[tokio::test]
    async fn racing_initializations_admit_exactly_one() {
        let core = Arc::new(shamir_core());

        let first = tokio::spawn({
            let core = Arc::clone(&core);
            async move { core.initialize(&SealConfig::new(3, 2), None).await }
        });
        let second = tokio::spawn({
            let core = Arc::clone(&core);
            async move { core.initialize(&SealConfig::new(3, 2), None).await }
        });
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert_eq!(
            usize::from(first.is_ok()) + usize::from(second.is_ok()),
            1
        );
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(loser.unwrap_err(), CoreError::AlreadyInitialized));
        assert!(core.initialized().await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_share_submissions_serialize() {
        let core = Arc::new(shamir_core());
        let result = core
            .initialize(&SealConfig::new(5, 3), None)
            .await
            .unwrap();

        let handles: Vec<_> = result
            .secret_shares
            .iter()
            .cloned()
            .map(|share| {
                let core = Arc::clone(&core);
                tokio::spawn(async move { core.unseal(&share).await })
            })
            .collect();

        let mut reported_unsealed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                reported_unsealed += 1;
            }
        }

        // Submissions serialize through the accumulator in some order: two
        // land below threshold, the third unseals, and the last two arrive
        // with the barrier already unsealed.
        assert_eq!(reported_unsealed, 3);
        assert!(!core.sealed().await);
        assert_eq!(core.seal_status().await.unwrap().progress, 0);
    }

    // ── unseal ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn below_threshold_stays_sealed_without_error() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(5, 3), None)
            .await
            .unwrap();

        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(!core.unseal(&result.secret_shares[1]).await.unwrap());
        assert!(core.sealed().await);

        assert!(core.unseal(&result.secret_shares[2]).await.unwrap());
        assert!(!core.sealed().await);
    }

    #[tokio::test]
    async fn duplicate_share_is_noop_not_progress() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap();

        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        // Same share again: no error, no progress.
        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        assert_eq!(core.seal_status().await.unwrap().progress, 1);

        assert!(core.unseal(&result.secret_shares[1]).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_share_clears_progress() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(5, 3), None)
            .await
            .unwrap();

        // A structurally valid share from an unrelated split.
        let foreign = shamir::split(&[7u8; 32], 5, 3).unwrap();

        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(!core.unseal(&result.secret_shares[1]).await.unwrap());
        let err = core.unseal(&foreign[4]).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Barrier {
                source: BarrierError::InvalidKey,
                ..
            }
        ));
        assert!(core.sealed().await);
        assert_eq!(core.seal_status().await.unwrap().progress, 0);

        // The two previously-correct shares alone must not unseal now.
        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(!core.unseal(&result.secret_shares[1]).await.unwrap());
        assert!(core.sealed().await);
        assert!(core.unseal(&result.secret_shares[2]).await.unwrap());
    }

    #[tokio::test]
    async fn unseal_before_initialize_fails() {
        let core = shamir_core();
        let err = core.unseal(&[1u8, 2, 3]).await.unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized));
    }

    #[tokio::test]
    async fn empty_share_rejected() {
        let core = shamir_core();
        let err = core.unseal(&[]).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidShare { .. }));
    }

    #[tokio::test]
    async fn unseal_when_already_unsealed_reports_true() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(1, 1), None)
            .await
            .unwrap();
        assert!(core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(core.unseal(&result.secret_shares[0]).await.unwrap());
    }

    // ── seal ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn seal_cycle_and_fresh_quorum() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap();

        unseal_all(&core, &result.secret_shares, 2).await;
        core.seal().await;
        assert!(core.sealed().await);

        // A different share combination works for the next quorum.
        assert!(!core.unseal(&result.secret_shares[2]).await.unwrap());
        assert!(core.unseal(&result.secret_shares[1]).await.unwrap());
    }

    #[tokio::test]
    async fn seal_discards_partial_progress() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap();

        assert!(!core.unseal(&result.secret_shares[0]).await.unwrap());
        core.seal().await;
        assert_eq!(core.seal_status().await.unwrap().progress, 0);
    }

    // ── unseal_with_stored_keys ──────────────────────────────────────

    #[tokio::test]
    async fn stored_keys_noop_without_support() {
        let core = shamir_core();
        core.initialize(&SealConfig::new(3, 2), None).await.unwrap();

        core.unseal_with_stored_keys().await.unwrap();
        assert!(core.sealed().await);
    }

    #[tokio::test]
    async fn stored_keys_noop_when_none_stored() {
        let core = auto_core();
        core.initialize(&SealConfig::new(3, 2), Some(&SealConfig::new(1, 1)))
            .await
            .unwrap();

        // stored_shares = 0: feature supported, nothing stored yet.
        core.unseal_with_stored_keys().await.unwrap();
        assert!(core.sealed().await);
    }

    #[tokio::test]
    async fn stored_keys_meet_threshold_and_auto_unseal() {
        let core = auto_core();
        let mut config = SealConfig::new(5, 2);
        config.stored_shares = 2;
        let result = core
            .initialize(&config, Some(&SealConfig::new(1, 1)))
            .await
            .unwrap();

        // Two of five shares were peeled off for the seal.
        assert_eq!(result.secret_shares.len(), 3);

        core.unseal_with_stored_keys().await.unwrap();
        assert!(!core.sealed().await);
    }

    #[tokio::test]
    async fn stored_keys_below_threshold_succeed_but_stay_sealed() {
        let core = auto_core();
        let mut config = SealConfig::new(5, 3);
        config.stored_shares = 2;
        let result = core
            .initialize(&config, Some(&SealConfig::new(1, 1)))
            .await
            .unwrap();
        assert_eq!(result.secret_shares.len(), 3);

        core.unseal_with_stored_keys().await.unwrap();
        assert!(core.sealed().await);

        // One manual share on top of the two stored ones reaches threshold.
        assert!(core.unseal(&result.secret_shares[0]).await.unwrap());
        assert!(!core.sealed().await);
    }

    // ── status ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn status_reflects_lifecycle() {
        let core = shamir_core();

        let status = core.seal_status().await.unwrap();
        assert!(!status.initialized);
        assert!(status.sealed);
        assert_eq!(status.threshold, 0);

        let result = core
            .initialize(&SealConfig::new(5, 3), None)
            .await
            .unwrap();
        let status = core.seal_status().await.unwrap();
        assert!(status.initialized);
        assert!(status.sealed);
        assert_eq!(status.threshold, 3);
        assert_eq!(status.shares, 5);
        assert_eq!(status.progress, 0);

        core.unseal(&result.secret_shares[0]).await.unwrap();
        assert_eq!(core.seal_status().await.unwrap().progress, 1);

        unseal_all(&core, &result.secret_shares[1..], 2).await;
        let status = core.seal_status().await.unwrap();
        assert!(!status.sealed);
        assert_eq!(status.progress, 0);
    }

    // ── barrier data across the lifecycle ────────────────────────────

    #[tokio::test]
    async fn token_lookup_works_after_interactive_unseal() {
        let core = shamir_core();
        let result = core
            .initialize(&SealConfig::new(3, 2), None)
            .await
            .unwrap();

        unseal_all(&core, &result.secret_shares, 2).await;

        let entry = core
            .token_store()
            .lookup(&result.root_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.display_name, "root");
    }
}
