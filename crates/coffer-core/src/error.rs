//! Error types for `coffer-core`.
//!
//! Each subsystem reports precise, narrow error kinds; the core orchestrator
//! wraps them with operation context (which phase of initialize/unseal failed)
//! without swallowing the underlying kind. Crypto errors never include key
//! material — only operation descriptions.

use coffer_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The OS entropy source failed while generating key material.
    #[error("random source failure: {reason}")]
    RandomSource { reason: String },

    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or
    /// tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors from the secret-sharing codec.
#[derive(Debug, thiserror::Error)]
pub enum ShamirError {
    /// The threshold is zero or exceeds the share count.
    #[error(
        "invalid threshold: need 1 <= threshold <= shares, got threshold {threshold} of {shares} shares"
    )]
    InvalidThreshold { threshold: u8, shares: u8 },

    /// The secret to split is empty.
    #[error("cannot split an empty secret")]
    EmptySecret,

    /// Fewer shares were supplied than the threshold requires.
    #[error("insufficient shares: {got} provided, {needed} required")]
    InvalidShareCount { got: usize, needed: usize },

    /// A share could not be parsed or the combination produced garbage.
    #[error("corrupt share material: {reason}")]
    Corrupt { reason: String },
}

/// Errors from recipient wrapping of unseal shares.
#[derive(Debug, thiserror::Error)]
pub enum WrapError {
    /// A configured recipient key could not be parsed.
    #[error("invalid recipient key at index {index}: {reason}")]
    InvalidRecipient { index: usize, reason: String },

    /// Encrypting a share to a recipient failed.
    #[error("share encryption failed: {reason}")]
    Encrypt { reason: String },
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The barrier is sealed — no operations are possible until unseal.
    #[error("barrier is sealed")]
    Sealed,

    /// The barrier already holds a committed master key.
    #[error("barrier is already initialized")]
    AlreadyInitialized,

    /// No master key has ever been committed.
    #[error("barrier is not initialized")]
    NotInitialized,

    /// The supplied unseal key does not decrypt the barrier's init record.
    ///
    /// This is the expected, non-fatal outcome while a quorum is still being
    /// collected or when one submitted share was wrong — not a sign of
    /// corruption.
    #[error("the provided unseal key is invalid")]
    InvalidKey,

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from seal implementations.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// The configuration violates the `SealConfig` invariants.
    #[error("invalid seal configuration: {reason}")]
    Validation { reason: String },

    /// Preparing the external auto-unseal mechanism failed.
    #[error("seal initialization failed: {reason}")]
    Init { reason: String },

    /// The operation is not supported by this seal type.
    #[error("seal operation '{operation}' not supported by {seal_type} seal")]
    Unsupported {
        operation: &'static str,
        seal_type: &'static str,
    },

    /// The external key-wrapping mechanism failed to wrap or unwrap.
    #[error("key wrapping failed: {reason}")]
    KeyWrap { reason: String },

    /// A persisted seal document could not be encoded or decoded.
    #[error("seal serialization failed: {reason}")]
    Serialization { reason: String },

    /// A cryptographic operation failed.
    #[error("seal crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("seal storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token was not found in storage.
    #[error("token not found")]
    NotFound,

    /// A stored token entry could not be decoded.
    #[error("token entry corrupt: {reason}")]
    Corrupt { reason: String },

    /// The barrier returned an error.
    #[error("token barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from logical (auth/secret) backends.
#[derive(Debug, thiserror::Error)]
pub enum LogicalError {
    /// The request was rejected by the backend — non-fatal, surfaced to the
    /// caller as a failed request rather than an internal failure.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    /// No backend is mounted at a prefix of the request path.
    #[error("no handler for path '{path}'")]
    NoHandler { path: String },

    /// The operation is not supported on the requested path.
    #[error("unsupported operation on path '{path}'")]
    UnsupportedOperation { path: String },

    /// A hard backend failure — surfaced as an internal failure.
    #[error("backend internal error: {reason}")]
    Internal { reason: String },

    /// The barrier returned an error.
    #[error("logical barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from the core orchestrator.
///
/// Variants preserve the narrow subsystem error while naming the phase of the
/// lifecycle operation that failed.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A supplied configuration violates the `SealConfig` invariants. Never
    /// mutates state.
    #[error("invalid {kind} configuration: {reason}")]
    InvalidConfiguration { kind: &'static str, reason: String },

    /// The core has already been initialized.
    #[error("core is already initialized")]
    AlreadyInitialized,

    /// The core has not been initialized yet.
    #[error("core is not initialized")]
    NotInitialized,

    /// A submitted unseal share is structurally unusable (empty, oversized).
    #[error("invalid unseal share: {reason}")]
    InvalidShare { reason: String },

    /// A seal operation failed during the named lifecycle phase.
    #[error("{phase}: {source}")]
    Seal {
        phase: &'static str,
        #[source]
        source: SealError,
    },

    /// A barrier operation failed during the named lifecycle phase.
    ///
    /// Carries [`BarrierError::InvalidKey`] undisturbed so callers can treat
    /// a wrong quorum as the expected, retryable outcome it is.
    #[error("{phase}: {source}")]
    Barrier {
        phase: &'static str,
        #[source]
        source: BarrierError,
    },

    /// The secret-sharing codec failed.
    #[error("secret sharing failed: {0}")]
    Shamir(#[from] ShamirError),

    /// Recipient wrapping of shares failed.
    #[error("share wrapping failed: {0}")]
    Wrap(#[from] WrapError),

    /// Root token issuance failed.
    #[error("root token generation failed: {0}")]
    Token(#[from] TokenError),

    /// Initialization failed after the master key was durably committed.
    ///
    /// The barrier cannot be rolled back: the process must restart into the
    /// normal unseal flow rather than re-run initialization.
    #[error("{source} (the barrier is durably initialized; restart into the normal unseal flow)")]
    PostCommitInit {
        #[source]
        source: Box<CoreError>,
    },

    /// An external seal or storage transport failed in a way the caller may
    /// retry — the process should not crash over it.
    #[error("non-fatal error: {reason}")]
    NonFatal { reason: String },

    /// Anything unexpected. The in-flight operation is aborted and the
    /// barrier stays sealed when this occurs before the final teardown step.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl CoreError {
    /// True when the failure is an expected transport problem the caller can
    /// retry rather than an unseal-logic failure.
    #[must_use]
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, Self::NonFatal { .. })
    }
}
