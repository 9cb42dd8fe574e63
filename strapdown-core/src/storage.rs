//! Version store abstraction
//!
//! The document engine never touches the commit graph directly. It needs four
//! operations from whatever content-addressed history backs it: commit a new
//! snapshot of one document, list the revisions of a document, resolve an
//! abbreviated revision id, and read a document as of a revision.

use async_trait::async_trait;
use bytes::Bytes;

use crate::object::{CommitMeta, DocPath, RevisionEntry, RevisionId, RevisionPrefix};

/// Result type for version store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during version store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Can not find {doc} of version {revision}")]
    NotFound { doc: DocPath, revision: String },

    #[error("Version {prefix} is ambiguous for {doc}, it matches {candidates} revisions")]
    Ambiguous {
        doc: DocPath,
        prefix: String,
        candidates: usize,
    },

    #[error("Invalid version {0:?}, expected 7 to 40 lowercase hex characters")]
    InvalidRevision(String),

    #[error("Version {revision} does not contain {doc}")]
    ForeignRevision { doc: DocPath, revision: RevisionId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Content-addressed, append-only history of documents.
///
/// Implementations must make every revision immutable once `commit` returns,
/// and must let readers observe either the history before or after a
/// concurrent commit, never a partial one.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Record `content` as the new state of `doc`.
    ///
    /// Committing bytes identical to the document's latest revision returns
    /// that revision instead of creating a new one.
    async fn commit(&self, doc: &DocPath, content: Bytes, meta: CommitMeta) -> Result<RevisionId>;

    /// Revisions in which `doc` changed, newest first, at most `limit`
    /// entries when given. Empty when the document was never committed.
    async fn history(&self, doc: &DocPath, limit: Option<usize>) -> Result<Vec<RevisionEntry>>;

    /// Resolve an abbreviated id to exactly one revision of `doc`.
    async fn resolve(&self, doc: &DocPath, prefix: &RevisionPrefix) -> Result<RevisionId>;

    /// Content of `doc` as of revision `id`.
    async fn read(&self, doc: &DocPath, id: RevisionId) -> Result<Bytes>;

    /// Latest committed content of `doc`, if any.
    async fn head_content(&self, doc: &DocPath) -> Result<Option<(RevisionId, Bytes)>> {
        match self.history(doc, Some(1)).await?.into_iter().next() {
            Some(entry) => Ok(Some((entry.id, self.read(doc, entry.id).await?))),
            None => Ok(None),
        }
    }
}

/// Pick the single revision whose id starts with `prefix`.
///
/// Shared by the backends: `history` is the full newest-first history of
/// `doc`.
pub(crate) fn select_by_prefix(
    doc: &DocPath,
    prefix: &RevisionPrefix,
    history: &[RevisionEntry],
) -> Result<RevisionId> {
    let matches: Vec<RevisionId> = history
        .iter()
        .map(|e| e.id)
        .filter(|id| id.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(StoreError::NotFound {
            doc: doc.clone(),
            revision: prefix.to_string(),
        }),
        many => Err(StoreError::Ambiguous {
            doc: doc.clone(),
            prefix: prefix.to_string(),
            candidates: many.len(),
        }),
    }
}
