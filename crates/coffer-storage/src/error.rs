//! Error types for `coffer-storage`.

/// Errors from a storage backend.
///
/// Variants carry the failing key (or prefix) so callers can log actionable
/// messages without reaching into the backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A read operation failed.
    #[error("storage read failed for key '{key}': {reason}")]
    Read { key: String, reason: String },

    /// A write operation failed.
    #[error("storage write failed for key '{key}': {reason}")]
    Write { key: String, reason: String },

    /// A delete operation failed.
    #[error("storage delete failed for key '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// A prefix listing failed.
    #[error("storage list failed for prefix '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// The key is not a valid storage path.
    #[error("invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}
