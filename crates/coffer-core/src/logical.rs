//! Logical backend boundary.
//!
//! Authentication and secret backends plug in behind this interface: each
//! backend registers under a mount prefix, receives [`Request`] objects
//! (operation, path, submitted fields) together with a [`BarrierView`] —
//! a handle to barrier storage scoped to its own namespace — and returns
//! either a [`Response`], a rejected-request error
//! ([`LogicalError::Rejected`], surfaced to the caller), or a hard error
//! ([`LogicalError::Internal`], surfaced as an internal failure).
//!
//! The core routes by longest mount-prefix match and defines no behavior for
//! any individual backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::barrier::Barrier;
use crate::error::LogicalError;

/// The operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Update,
    Delete,
    List,
}

/// A request dispatched to a logical backend.
#[derive(Debug, Clone)]
pub struct Request {
    /// The operation to perform.
    pub operation: Operation,
    /// Path relative to the backend's mount point.
    pub path: String,
    /// Submitted fields.
    pub data: HashMap<String, Value>,
}

impl Request {
    /// A request with no fields.
    #[must_use]
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            data: HashMap::new(),
        }
    }
}

/// A successful backend response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Response payload.
    pub data: HashMap<String, Value>,
    /// Non-fatal warnings to surface alongside the payload.
    pub warnings: Vec<String>,
}

/// Barrier storage scoped to a backend's namespace.
///
/// Every key a backend touches is transparently prefixed, so one backend can
/// never read or clobber another's entries.
#[derive(Debug, Clone)]
pub struct BarrierView {
    barrier: Arc<Barrier>,
    prefix: String,
}

impl BarrierView {
    /// Create a view under `prefix` (must end with `/`).
    #[must_use]
    pub fn new(barrier: Arc<Barrier>, prefix: impl Into<String>) -> Self {
        Self {
            barrier,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Read a value within the view.
    ///
    /// # Errors
    ///
    /// Propagates barrier errors, including `Sealed`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LogicalError> {
        Ok(self.barrier.get(&self.full_key(key)).await?)
    }

    /// Write a value within the view.
    ///
    /// # Errors
    ///
    /// Propagates barrier errors, including `Sealed`.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), LogicalError> {
        Ok(self.barrier.put(&self.full_key(key), value).await?)
    }

    /// Delete a key within the view.
    ///
    /// # Errors
    ///
    /// Propagates barrier errors, including `Sealed`.
    pub async fn delete(&self, key: &str) -> Result<(), LogicalError> {
        Ok(self.barrier.delete(&self.full_key(key)).await?)
    }

    /// List keys within the view, returned relative to the view prefix.
    ///
    /// # Errors
    ///
    /// Propagates barrier errors, including `Sealed`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, LogicalError> {
        let keys = self.barrier.list(&self.full_key(prefix)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_owned))
            .collect())
    }
}

/// A pluggable logical backend.
#[async_trait::async_trait]
pub trait LogicalBackend: Send + Sync {
    /// Handle a request against this backend's namespace.
    ///
    /// # Errors
    ///
    /// [`LogicalError::Rejected`] for caller-fault failures,
    /// [`LogicalError::Internal`] for backend faults,
    /// [`LogicalError::UnsupportedOperation`] when the path doesn't support
    /// the requested operation.
    async fn handle_request(
        &self,
        request: &Request,
        view: &BarrierView,
    ) -> Result<Response, LogicalError>;
}

struct Mount {
    backend: Arc<dyn LogicalBackend>,
    view: BarrierView,
}

/// Routes requests to mounted backends by longest prefix match.
#[derive(Default)]
pub struct Router {
    mounts: RwLock<HashMap<String, Mount>>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a backend at `prefix` (normalized to end with `/`). The backend
    /// receives a [`BarrierView`] under `logical/<prefix>`.
    pub async fn mount(
        &self,
        barrier: Arc<Barrier>,
        prefix: &str,
        backend: Arc<dyn LogicalBackend>,
    ) {
        let prefix = normalize_prefix(prefix);
        let view = BarrierView::new(barrier, format!("logical/{prefix}"));
        let mut mounts = self.mounts.write().await;
        mounts.insert(prefix, Mount { backend, view });
    }

    /// Route a request to the backend with the longest matching mount
    /// prefix, rewriting the path relative to the mount.
    ///
    /// # Errors
    ///
    /// [`LogicalError::NoHandler`] when nothing is mounted at any prefix of
    /// the path; backend errors propagate as-is.
    pub async fn route(&self, request: &Request) -> Result<Response, LogicalError> {
        let mounts = self.mounts.read().await;
        let Some((prefix, mount)) = mounts
            .iter()
            .filter(|(prefix, _)| request.path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
        else {
            return Err(LogicalError::NoHandler {
                path: request.path.clone(),
            });
        };

        let mut scoped = request.clone();
        scoped.path = request
            .path
            .strip_prefix(prefix)
            .unwrap_or(&request.path)
            .to_owned();
        mount.backend.handle_request(&scoped, &mount.view).await
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    format!("{trimmed}/")
}
