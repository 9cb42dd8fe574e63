//! In-memory version store
//!
//! Keeps a linear chain of whole-tree snapshots. Revision ids are SHA-1
//! digests over the parent id and the change, so they look and abbreviate
//! exactly like the git backend's ids. Used by tests and by embedders that
//! do not want history on disk.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::object::{CommitMeta, DocPath, RevisionEntry, RevisionId, RevisionPrefix};
use crate::storage::{select_by_prefix, Result, StoreError, VersionStore};

struct Snapshot {
    entry: RevisionEntry,
    /// Document that changed in this revision
    changed: DocPath,
    files: BTreeMap<DocPath, Bytes>,
}

/// In-memory version store
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Oldest first
    chain: Arc<RwLock<Vec<Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revisions recorded across all documents
    pub async fn len(&self) -> usize {
        self.chain.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chain.read().await.is_empty()
    }
}

fn revision_id(parent: Option<RevisionId>, doc: &DocPath, content: &[u8], meta: &CommitMeta, seq: usize) -> RevisionId {
    let mut hasher = Sha1::new();
    if let Some(parent) = parent {
        hasher.update(parent.as_bytes());
    }
    hasher.update(seq.to_le_bytes());
    hasher.update(doc.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(meta.author.as_bytes());
    hasher.update([0]);
    hasher.update(meta.message.as_bytes());
    hasher.update([0]);
    hasher.update(content);
    RevisionId::new(hasher.finalize().into())
}

fn doc_history(chain: &[Snapshot], doc: &DocPath, limit: Option<usize>) -> Vec<RevisionEntry> {
    chain
        .iter()
        .rev()
        .filter(|s| &s.changed == doc)
        .take(limit.unwrap_or(usize::MAX))
        .map(|s| s.entry.clone())
        .collect()
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn commit(&self, doc: &DocPath, content: Bytes, meta: CommitMeta) -> Result<RevisionId> {
        let mut chain = self.chain.write().await;

        let tip = chain.last();
        if let Some(tip) = tip {
            if tip.files.get(doc) == Some(&content) {
                if let Some(current) = doc_history(&chain, doc, Some(1)).into_iter().next() {
                    return Ok(current.id);
                }
            }
        }

        let mut files = tip.map(|s| s.files.clone()).unwrap_or_default();
        let id = revision_id(tip.map(|s| s.entry.id), doc, &content, &meta, chain.len());
        files.insert(doc.clone(), content);
        chain.push(Snapshot {
            entry: RevisionEntry {
                id,
                author: meta.author,
                message: meta.message,
                timestamp: Utc::now(),
            },
            changed: doc.clone(),
            files,
        });
        Ok(id)
    }

    async fn history(&self, doc: &DocPath, limit: Option<usize>) -> Result<Vec<RevisionEntry>> {
        let chain = self.chain.read().await;
        Ok(doc_history(&chain, doc, limit))
    }

    async fn resolve(&self, doc: &DocPath, prefix: &RevisionPrefix) -> Result<RevisionId> {
        let chain = self.chain.read().await;
        match select_by_prefix(doc, prefix, &doc_history(&chain, doc, None)) {
            Err(StoreError::NotFound { .. }) => {}
            other => return other,
        }
        // Any snapshot still carrying the document is a valid revision of it
        let mut hits = chain.iter().filter(|s| s.entry.id.starts_with(prefix));
        match (hits.next(), hits.next()) {
            (Some(s), None) if s.files.contains_key(doc) => Ok(s.entry.id),
            (Some(s), None) => Err(StoreError::ForeignRevision {
                doc: doc.clone(),
                revision: s.entry.id,
            }),
            _ => Err(StoreError::NotFound {
                doc: doc.clone(),
                revision: prefix.to_string(),
            }),
        }
    }

    async fn read(&self, doc: &DocPath, id: RevisionId) -> Result<Bytes> {
        let chain = self.chain.read().await;
        let snapshot = chain
            .iter()
            .find(|s| s.entry.id == id)
            .ok_or_else(|| StoreError::NotFound {
                doc: doc.clone(),
                revision: id.to_hex(),
            })?;
        snapshot
            .files
            .get(doc)
            .cloned()
            .ok_or_else(|| StoreError::ForeignRevision {
                doc: doc.clone(),
                revision: id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_commit_history_read() {
        let store = MemoryStore::new();
        let d = doc("a.md");
        let r1 = store.commit(&d, Bytes::from_static(b"B1"), CommitMeta::new("t", "m1")).await.unwrap();
        let r2 = store.commit(&d, Bytes::from_static(b"B2"), CommitMeta::new("t", "m2")).await.unwrap();

        let history = store.history(&d, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, r2);
        assert_eq!(history[1].id, r1);
        assert_eq!(store.read(&d, r2).await.unwrap(), Bytes::from_static(b"B2"));
        assert_eq!(store.read(&d, r1).await.unwrap(), Bytes::from_static(b"B1"));
        assert_eq!(store.head_content(&d).await.unwrap(), Some((r2, Bytes::from_static(b"B2"))));
    }

    #[tokio::test]
    async fn test_noop_commit_keeps_revision() {
        let store = MemoryStore::new();
        let d = doc("a.md");
        let r1 = store.commit(&d, Bytes::new(), CommitMeta::new("t", "m")).await.unwrap();
        let r2 = store.commit(&d, Bytes::new(), CommitMeta::new("t", "m")).await.unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_and_foreign() {
        let store = MemoryStore::new();
        let a = doc("a.md");
        let b = doc("b.md");
        let ra = store.commit(&a, Bytes::from_static(b"a"), CommitMeta::new("t", "a")).await.unwrap();
        let rb = store.commit(&b, Bytes::from_static(b"b"), CommitMeta::new("t", "b")).await.unwrap();

        let short = RevisionPrefix::parse(&ra.to_hex()[..7]).unwrap();
        assert_eq!(store.resolve(&a, &short).await.unwrap(), ra);

        let full_a = RevisionPrefix::parse(&ra.to_hex()).unwrap();
        assert!(matches!(
            store.resolve(&b, &full_a).await,
            Err(StoreError::ForeignRevision { .. })
        ));
        assert!(matches!(store.read(&b, ra).await, Err(StoreError::ForeignRevision { .. })));

        // rb still carries a.md
        assert_eq!(store.read(&a, rb).await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_shared_short_prefix_is_ambiguous() {
        let store = MemoryStore::new();
        let d = doc("a.md");

        // ids are deterministic, so a 7-digit clash turns up after a few
        // thousand commits
        let mut seen = std::collections::HashMap::new();
        let mut clash = None;
        for i in 0..300_000 {
            let id = store.commit(&d, Bytes::from(format!("v{}", i)), CommitMeta::new("t", "m")).await.unwrap();
            let short = id.to_hex()[..7].to_string();
            if let Some(first) = seen.insert(short.clone(), id) {
                clash = Some((short, first, id));
                break;
            }
        }
        let (short, first, second) = clash.unwrap();
        assert_ne!(first, second);

        let prefix = RevisionPrefix::parse(&short).unwrap();
        match store.resolve(&d, &prefix).await {
            Err(StoreError::Ambiguous { candidates, .. }) => assert_eq!(candidates, 2),
            other => panic!("unexpected {:?}", other),
        }
        let full = RevisionPrefix::parse(&first.to_hex()).unwrap();
        assert_eq!(store.resolve(&d, &full).await.unwrap(), first);
    }
}
