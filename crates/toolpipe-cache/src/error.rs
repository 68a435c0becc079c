//! Error types for cache operations.

use toolpipe_core::ContextError;

/// Error returned by a [`Cache`](crate::Cache) operation.
///
/// [`Miss`](Self::Miss) is the expected outcome of a lookup for an absent
/// or expired key. It is not a failure and is never logged as one.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The key is absent or expired.
    #[error("cache miss")]
    Miss,

    /// A key or value could not be encoded.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The remote store failed. Distinct from a miss.
    #[error("remote store error: {0}")]
    Remote(#[from] KvError),

    /// The request context finished before the operation did.
    #[error("cache operation abandoned: {0}")]
    Cancelled(ContextError),

    /// The backend cannot perform the operation.
    #[error("unsupported cache operation: {0}")]
    Unsupported(String),
}

impl CacheError {
    /// Whether this is an ordinary miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Error returned by a [`KvClient`](crate::KvClient).
///
/// Cloneable so test clients can queue failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KvError {
    /// No connection to the store could be obtained.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("command failed: {0}")]
    Command(String),

    /// The client does not implement the named operation.
    #[error("operation '{0}' is not supported by this client")]
    Unsupported(&'static str),
}
