//! Git-backed version store
//!
//! The served root is a plain git working tree. Every edit becomes a commit on
//! `HEAD` that changes exactly one path, so documents share one linear history
//! and revision ids are ordinary 40-hex commit ids.
//!
//! libgit2 handles are not `Sync`, so each operation opens the repository on
//! a blocking thread. Commits are serialized by a store-wide lock because they
//! all advance the same `HEAD`; reads never take it since they only touch
//! immutable objects reachable from a `HEAD` snapshot.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use git2::build::TreeUpdateBuilder;
use git2::{Commit, ErrorCode, FileMode, ObjectType, Oid, Repository, Signature, Sort};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::object::{CommitMeta, DocPath, RevisionEntry, RevisionId, RevisionPrefix};
use crate::storage::{select_by_prefix, Result, StoreError, VersionStore};

const COMMITTER_EMAIL: &str = "strapdown@localhost";

impl From<git2::Error> for StoreError {
    fn from(e: git2::Error) -> Self {
        StoreError::Backend(e.message().to_string())
    }
}

/// Version store over a git repository rooted at the served directory
pub struct GitStore {
    root: PathBuf,
    commit_lock: Arc<Mutex<()>>,
}

impl GitStore {
    /// Open an existing repository whose working tree is `root`
    pub fn open(root: &Path) -> Result<Self> {
        Repository::open(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open the repository at `root`, creating it first when absent
    pub fn open_or_init(root: &Path) -> Result<Self> {
        match Repository::open(root) {
            Ok(_) => info!("git repository already found at {:?}, skip init", root),
            Err(e) if e.code() == ErrorCode::NotFound => {
                Repository::init(root)?;
                info!("git init finished at {:?}", root);
            }
            Err(e) => return Err(e.into()),
        }
        Self::open(root)
    }

    /// Working tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `f` against a freshly opened repository on the blocking pool
    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&root)?;
            f(&repo)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("git task failed: {}", e)))?
    }
}

#[async_trait]
impl VersionStore for GitStore {
    async fn commit(&self, doc: &DocPath, content: Bytes, meta: CommitMeta) -> Result<RevisionId> {
        let doc = doc.clone();
        let lock = self.commit_lock.clone();
        self.with_repo(move |repo| {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            commit_sync(repo, &doc, &content, &meta)
        })
        .await
    }

    async fn history(&self, doc: &DocPath, limit: Option<usize>) -> Result<Vec<RevisionEntry>> {
        let doc = doc.clone();
        self.with_repo(move |repo| history_sync(repo, &doc, limit)).await
    }

    async fn resolve(&self, doc: &DocPath, prefix: &RevisionPrefix) -> Result<RevisionId> {
        let doc = doc.clone();
        let prefix = prefix.clone();
        self.with_repo(move |repo| resolve_sync(repo, &doc, &prefix)).await
    }

    async fn read(&self, doc: &DocPath, id: RevisionId) -> Result<Bytes> {
        let doc = doc.clone();
        self.with_repo(move |repo| read_sync(repo, &doc, id)).await
    }
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Blob id of `doc` in `commit`, `None` when the commit does not carry it
fn entry_blob(commit: &Commit<'_>, doc: &DocPath) -> Result<Option<Oid>> {
    if doc.is_root() {
        return Ok(None);
    }
    let tree = commit.tree()?;
    match tree.get_path(Path::new(doc.as_str())) {
        Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn to_entry(commit: &Commit<'_>) -> RevisionEntry {
    RevisionEntry {
        id: commit.id().into(),
        author: commit.author().name().unwrap_or("unknown").to_string(),
        message: commit.message().unwrap_or("").trim_end().to_string(),
        timestamp: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
    }
}

fn commit_sync(repo: &Repository, doc: &DocPath, content: &[u8], meta: &CommitMeta) -> Result<RevisionId> {
    if doc.is_root() {
        return Err(StoreError::Backend("cannot commit the root directory".to_string()));
    }
    let parent = head_commit(repo)?;
    let blob = repo.blob(content)?;

    if let Some(tip) = &parent {
        if entry_blob(tip, doc)? == Some(blob) {
            if let Some(current) = history_sync(repo, doc, Some(1))?.into_iter().next() {
                debug!("{} unchanged, keeping revision {}", doc, current.id);
                return Ok(current.id);
            }
        }
    }

    let baseline = match &parent {
        Some(tip) => tip.tree()?,
        None => {
            let empty = repo.treebuilder(None)?.write()?;
            repo.find_tree(empty)?
        }
    };
    let tree_id = TreeUpdateBuilder::new()
        .upsert(doc.as_str(), blob, FileMode::Blob)
        .create_updated(repo, &baseline)?;
    let tree = repo.find_tree(tree_id)?;

    let author: String = meta.author.chars().filter(|c| *c != '<' && *c != '>').collect();
    let sig = Signature::now(&author, COMMITTER_EMAIL)?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &sig, &sig, &meta.message, &tree, &parents)?;

    sync_index(repo, doc);
    info!("Committed {} as {}", doc, oid);
    Ok(oid.into())
}

/// Keep the index in step with `HEAD` so `git status` in the served tree
/// stays clean; failures here never affect the committed revision.
fn sync_index(repo: &Repository, doc: &DocPath) {
    let result = repo.index().and_then(|mut index| {
        index.add_path(Path::new(doc.as_str()))?;
        index.write()
    });
    if let Err(e) = result {
        warn!("Failed to update index for {}: {}", doc, e.message());
    }
}

fn history_sync(repo: &Repository, doc: &DocPath, limit: Option<usize>) -> Result<Vec<RevisionEntry>> {
    if head_commit(repo)?.is_none() {
        return Ok(Vec::new());
    }
    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

    let mut entries = Vec::new();
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let Some(blob) = entry_blob(&commit, doc)? else {
            continue;
        };
        let changed = if commit.parent_count() == 0 {
            true
        } else {
            entry_blob(&commit.parent(0)?, doc)? != Some(blob)
        };
        if changed {
            entries.push(to_entry(&commit));
            if limit.is_some_and(|l| entries.len() >= l) {
                break;
            }
        }
    }
    Ok(entries)
}

fn resolve_sync(repo: &Repository, doc: &DocPath, prefix: &RevisionPrefix) -> Result<RevisionId> {
    let history = history_sync(repo, doc, None)?;
    match select_by_prefix(doc, prefix, &history) {
        Err(StoreError::NotFound { .. }) => {}
        other => return other,
    }

    // Commits that carry the document without changing it are still valid
    // snapshots of it, they are just not listed in its history.
    let not_found = || StoreError::NotFound {
        doc: doc.clone(),
        revision: prefix.to_string(),
    };
    let commit = match repo.revparse_single(prefix.as_str()).and_then(|o| o.peel_to_commit()) {
        Ok(commit) => commit,
        Err(e) => {
            debug!("revparse {} failed: {}", prefix, e.message());
            return Err(not_found());
        }
    };
    if entry_blob(&commit, doc)?.is_some() {
        Ok(commit.id().into())
    } else {
        Err(StoreError::ForeignRevision {
            doc: doc.clone(),
            revision: commit.id().into(),
        })
    }
}

fn read_sync(repo: &Repository, doc: &DocPath, id: RevisionId) -> Result<Bytes> {
    let commit = match repo.find_commit(Oid::try_from(id)?) {
        Ok(commit) => commit,
        Err(e) => {
            debug!("lookup of {} failed: {}", id, e.message());
            return Err(StoreError::NotFound {
                doc: doc.clone(),
                revision: id.to_hex(),
            });
        }
    };
    match entry_blob(&commit, doc)? {
        Some(blob) => Ok(Bytes::copy_from_slice(repo.find_blob(blob)?.content())),
        None => Err(StoreError::ForeignRevision {
            doc: doc.clone(),
            revision: id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    fn meta(msg: &str) -> CommitMeta {
        CommitMeta::new("anonymous@127.0.0.1", msg)
    }

    #[tokio::test]
    async fn test_open_requires_repository() {
        let tmp = tempdir().unwrap();
        assert!(GitStore::open(tmp.path()).is_err());
        assert!(GitStore::open_or_init(tmp.path()).is_ok());
        assert!(GitStore::open(tmp.path()).is_ok());
    }

    #[tokio::test]
    async fn test_empty_history() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        assert!(store.history(&doc("test.md"), None).await.unwrap().is_empty());
        assert!(store.head_content(&doc("test.md")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_and_read() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        let d = doc("notes/a.md");

        let first = store.commit(&d, Bytes::from_static(b"one"), meta("upload to notes/a.md")).await.unwrap();
        let second = store.commit(&d, Bytes::from_static(b"two"), meta("update notes/a.md")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first.to_hex().len(), 40);

        assert_eq!(store.read(&d, first).await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(store.read(&d, second).await.unwrap(), Bytes::from_static(b"two"));

        let history = store.history(&d, None).await.unwrap();
        assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(history[0].message, "update notes/a.md");
        assert_eq!(history[0].author, "anonymous@127.0.0.1");
    }

    #[tokio::test]
    async fn test_unchanged_commit_is_elided() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        let d = doc("a.md");

        let first = store.commit(&d, Bytes::from_static(b"same"), meta("m")).await.unwrap();
        let again = store.commit(&d, Bytes::from_static(b"same"), meta("m")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.history(&d, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_only_lists_changes_of_the_document() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        let a = doc("a.md");
        let b = doc("b.md");

        let a1 = store.commit(&a, Bytes::from_static(b"a1"), meta("a1")).await.unwrap();
        let b1 = store.commit(&b, Bytes::from_static(b"b1"), meta("b1")).await.unwrap();
        let a2 = store.commit(&a, Bytes::from_static(b"a2"), meta("a2")).await.unwrap();

        let ids: Vec<_> = store.history(&a, None).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a2, a1]);
        let ids: Vec<_> = store.history(&b, None).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b1]);

        // b1 carries a.md unchanged, so it still reads as a1's content
        assert_eq!(store.read(&a, b1).await.unwrap(), Bytes::from_static(b"a1"));
        assert_eq!(store.history(&a, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_prefix() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        let a = doc("a.md");
        let b = doc("b.md");

        let a1 = store.commit(&a, Bytes::from_static(b"a1"), meta("a1")).await.unwrap();
        let b1 = store.commit(&b, Bytes::from_static(b"b1"), meta("b1")).await.unwrap();

        let hex_str = a1.to_hex();
        for len in [7, 13, 40] {
            let prefix = RevisionPrefix::parse(&hex_str[..len]).unwrap();
            assert_eq!(store.resolve(&a, &prefix).await.unwrap(), a1);
        }

        // b1 is not in a.md's history but still carries it
        let prefix = RevisionPrefix::parse(&b1.to_hex()).unwrap();
        assert_eq!(store.resolve(&a, &prefix).await.unwrap(), b1);

        // a1 predates b.md entirely
        let prefix = RevisionPrefix::parse(&a1.to_hex()).unwrap();
        assert!(matches!(
            store.resolve(&b, &prefix).await,
            Err(StoreError::ForeignRevision { .. })
        ));

        let unknown = RevisionPrefix::parse("0000000000000").unwrap();
        assert!(matches!(store.resolve(&a, &unknown).await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_read_unknown_revision() {
        let tmp = tempdir().unwrap();
        let store = GitStore::open_or_init(tmp.path()).unwrap();
        let a = doc("a.md");
        store.commit(&a, Bytes::from_static(b"a1"), meta("a1")).await.unwrap();

        let bogus = RevisionId::new([0xab; 20]);
        assert!(matches!(store.read(&a, bogus).await, Err(StoreError::NotFound { .. })));
    }
}
