//! Edit coordination
//!
//! An edit validates its input, writes the live file and records a revision
//! while holding the document's lock. When the commit fails the previous file
//! contents are put back so the live tree never runs ahead of history.

use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::locks::DocumentLocks;
use crate::object::{CommitMeta, DocPath, RevisionId};
use crate::options::{DocumentOptions, OptionStore};
use crate::resolver::{is_hidden, is_system};
use crate::storage::{StoreError, VersionStore};

/// Sequence that would terminate the markdown wrapper of a rendered page
pub const WRAPPER_END: &str = "</xmp>";

/// Result of a successful edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub revision: RevisionId,
    /// The document did not exist before this edit
    pub created: bool,
}

/// Live file compared with its latest committed revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingState {
    /// Live bytes equal the latest revision
    Clean(RevisionId),
    /// Changed on disk since the latest revision
    Modified(RevisionId),
    /// Present on disk, never committed
    Untracked,
    /// Not on disk; history may still exist
    Missing(Option<RevisionId>),
}

impl WorkingState {
    /// Latest committed revision, if any
    pub fn latest(&self) -> Option<RevisionId> {
        match self {
            WorkingState::Clean(id) | WorkingState::Modified(id) => Some(*id),
            WorkingState::Missing(id) => *id,
            WorkingState::Untracked => None,
        }
    }

    pub fn is_uncommitted(&self) -> bool {
        matches!(self, WorkingState::Modified(_) | WorkingState::Untracked)
    }
}

/// Serializes mutations of documents under a served root
pub struct EditCoordinator {
    root: PathBuf,
    store: Arc<dyn VersionStore>,
    options: OptionStore,
    locks: DocumentLocks,
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl EditCoordinator {
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn VersionStore>) -> Self {
        let root = root.into();
        Self {
            options: OptionStore::new(root.clone()),
            root,
            store,
            locks: DocumentLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    fn check_writable(doc: &DocPath) -> Result<()> {
        if is_system(doc) {
            return Err(EngineError::MethodNotAllowed(doc.clone()));
        }
        if doc.is_root() || is_hidden(doc) {
            return Err(EngineError::BadPath(format!("{} is not writable", doc.url_path())));
        }
        Ok(())
    }

    /// Replace the content of `doc` and record it as a new revision
    pub async fn edit(&self, doc: &DocPath, content: Bytes, author: &str) -> Result<EditOutcome> {
        Self::check_writable(doc)?;
        if doc.is_markdown() && content.windows(WRAPPER_END.len()).any(|w| w == WRAPPER_END.as_bytes()) {
            warn!("rejected edit of {}: content contains {}", doc, WRAPPER_END);
            return Err(EngineError::UnsafeContent {
                path: doc.clone(),
                marker: WRAPPER_END,
                content,
            });
        }

        let guard = self.locks.lock(doc).await;

        // The write and the commit run detached so that a dropped request
        // cannot stop between them; the task owns the document lock.
        let job = EditJob {
            root: self.root.clone(),
            store: self.store.clone(),
            doc: doc.clone(),
            content,
            author: author.to_string(),
        };
        tokio::spawn(async move {
            let outcome = job.run().await;
            drop(guard);
            outcome
        })
        .await
        .map_err(|e| EngineError::Store(StoreError::Backend(format!("edit task failed: {}", e))))?
    }

    /// Validate and store the options sidecar of `doc`
    pub async fn set_options(&self, doc: &DocPath, payload: &[u8]) -> Result<DocumentOptions> {
        Self::check_writable(doc)?;
        let _guard = self.locks.lock(&OptionStore::sidecar(doc)).await;
        self.options.set(doc, payload).await
    }

    /// Compare the live file of `doc` with its latest revision
    pub async fn working_state(&self, doc: &DocPath) -> Result<WorkingState> {
        let live = read_optional(&doc.to_fs_path(&self.root)).await?;
        let head = self.store.head_content(doc).await?;
        Ok(match (live, head) {
            (None, head) => WorkingState::Missing(head.map(|(id, _)| id)),
            (Some(_), None) => WorkingState::Untracked,
            (Some(live), Some((id, committed))) if live == committed => WorkingState::Clean(id),
            (Some(_), Some((id, _))) => WorkingState::Modified(id),
        })
    }
}

/// Write-then-commit of one edit, run while the document lock is held
struct EditJob {
    root: PathBuf,
    store: Arc<dyn VersionStore>,
    doc: DocPath,
    content: Bytes,
    author: String,
}

impl EditJob {
    /// Directories between the root and `doc` that do not exist yet,
    /// deepest first
    async fn missing_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut current = self.doc.parent();
        while let Some(dir) = current.filter(|d| !d.is_root()) {
            match tokio::fs::metadata(dir.to_fs_path(&self.root)).await {
                Ok(meta) if meta.is_dir() => break,
                Ok(_) => return Err(EngineError::BadPath(format!("{} is not a directory", dir.url_path()))),
                Err(_) => missing.push(dir.to_fs_path(&self.root)),
            }
            current = dir.parent();
        }
        Ok(missing)
    }

    async fn run(self) -> Result<EditOutcome> {
        let doc = &self.doc;
        let path = doc.to_fs_path(&self.root);

        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(EngineError::Conflict { path: doc.clone() });
        }
        let created_dirs = self.missing_dirs().await?;
        if let Some(deepest) = created_dirs.first() {
            tokio::fs::create_dir_all(deepest).await?;
        }

        let previous = read_optional(&path).await?;
        let created = previous.is_none();
        let message = if created {
            format!("upload to {}", doc)
        } else {
            format!("update {}", doc)
        };

        debug!("writing {} bytes to {:?}", self.content.len(), path);
        if let Err(e) = tokio::fs::write(&path, &self.content).await {
            remove_dirs(&created_dirs).await;
            return Err(e.into());
        }

        match self.store.commit(doc, self.content.clone(), CommitMeta::new(self.author.as_str(), message)).await {
            Ok(revision) => {
                info!("{} is now at {}", doc, revision);
                Ok(EditOutcome { revision, created })
            }
            Err(e) => {
                warn!("commit of {} failed, restoring previous content: {}", doc, e);
                let restored = match previous {
                    Some(data) => tokio::fs::write(&path, data).await,
                    None => tokio::fs::remove_file(&path).await,
                };
                if let Err(re) = restored {
                    warn!("failed to restore {:?}: {}", path, re);
                }
                remove_dirs(&created_dirs).await;
                Err(e.into())
            }
        }
    }
}

/// Remove directories created for a failed edit, deepest first
async fn remove_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = tokio::fs::remove_dir(dir).await {
            debug!("leaving {:?} in place: {}", dir, e);
            break;
        }
    }
}
