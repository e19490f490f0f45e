//! Error types for the synchronization layer.

/// Errors returned by document stores and subscription primitives.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A document or collection path is malformed.
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),

    /// The target document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Documents and field updates must be JSON objects.
    #[error("document data must be a JSON object")]
    NotAnObject,

    /// JSON serialization or deserialization failed.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
}
