//! Document engine errors

use bytes::Bytes;

use crate::object::DocPath;
use crate::storage::StoreError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the document engine.
///
/// Every variant except `Io` and `Store` describes a caller mistake and
/// carries enough context to retry correctly.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Ambiguous(String),

    #[error("{0}")]
    InvalidRevision(String),

    #[error("{0}")]
    BadParameter(String),

    #[error("{path} already exists and is a directory")]
    Conflict { path: DocPath },

    #[error("{0} is read-only")]
    MethodNotAllowed(DocPath),

    /// Content that would break out of the rendering wrapper
    #[error("content of {path} must not contain {marker}")]
    UnsafeContent {
        path: DocPath,
        marker: &'static str,
        content: Bytes,
    },

    #[error("Invalid path: {0}")]
    BadPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } | StoreError::ForeignRevision { .. } => {
                EngineError::NotFound(e.to_string())
            }
            StoreError::Ambiguous { .. } => EngineError::Ambiguous(e.to_string()),
            StoreError::InvalidRevision(_) => EngineError::InvalidRevision(e.to_string()),
            StoreError::Io(io) => EngineError::Io(io),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Whether the failure lies with the server rather than the request
    pub fn is_server_fault(&self) -> bool {
        matches!(self, EngineError::Io(_) | EngineError::Store(_))
    }
}
