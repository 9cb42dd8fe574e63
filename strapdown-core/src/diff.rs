//! Diff between two revisions of one document
//!
//! Both identifiers are resolved against the document's history first, then
//! the two snapshots are compared line by line with `similar` (Myers) and
//! grouped into hunks with three lines of context.

use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::object::{DocPath, RevisionId, RevisionPrefix};
use crate::storage::{StoreError, VersionStore};

const CONTEXT_LINES: usize = 3;

/// Message for any diff request that does not name two distinct revisions
pub const TWO_VERSIONS: &str = "Bad params for diff, please select exactly TWO versions!";

/// A single line in a diff hunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
}

/// A contiguous region of changes, line numbers 1-based
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// Outcome of comparing two revisions of a document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffResult {
    pub doc: DocPath,
    /// Identifiers exactly as the caller supplied them
    pub from: String,
    pub to: String,
    pub from_id: RevisionId,
    pub to_id: RevisionId,
    pub hunks: Vec<DiffHunk>,
}

impl DiffResult {
    pub fn title(&self) -> String {
        format!("Diff for file from {} to {}", self.from, self.to)
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn additions(&self) -> usize {
        self.count(|l| matches!(l, DiffLine::Added(_)))
    }

    pub fn deletions(&self) -> usize {
        self.count(|l| matches!(l, DiffLine::Removed(_)))
    }

    fn count(&self, pred: impl Fn(&DiffLine) -> bool) -> usize {
        self.hunks.iter().flat_map(|h| &h.lines).filter(|l| pred(l)).count()
    }

    /// Unified-style text: hunk headers followed by `+`, `-` and ` ` lines
    pub fn unified(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            let _ = writeln!(out, "{}", hunk.header());
            for line in &hunk.lines {
                let _ = match line {
                    DiffLine::Context(text) => writeln!(out, " {}", text),
                    DiffLine::Added(text) => writeln!(out, "+{}", text),
                    DiffLine::Removed(text) => writeln!(out, "-{}", text),
                };
            }
        }
        out
    }
}

/// Split a `diff=<a>,<b>` parameter into two validated prefixes
pub fn parse_pair(raw: &str) -> Result<(RevisionPrefix, RevisionPrefix)> {
    let parts: Vec<&str> = raw.split(',').filter(|p| !p.is_empty()).collect();
    let [a, b] = parts.as_slice() else {
        return Err(EngineError::BadParameter(TWO_VERSIONS.to_string()));
    };
    let parse = |p: &str| {
        RevisionPrefix::parse(p).ok_or_else(|| {
            EngineError::InvalidRevision(StoreError::InvalidRevision(p.to_string()).to_string())
        })
    };
    Ok((parse(a)?, parse(b)?))
}

/// Compares historical snapshots through a version store
#[derive(Clone)]
pub struct DiffEngine {
    store: Arc<dyn VersionStore>,
}

impl DiffEngine {
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self { store }
    }

    /// Diff `doc` between revisions `a` (old) and `b` (new)
    pub async fn diff(&self, doc: &DocPath, a: &RevisionPrefix, b: &RevisionPrefix) -> Result<DiffResult> {
        let from_id = self.resolve(doc, a).await?;
        let to_id = self.resolve(doc, b).await?;
        if from_id == to_id {
            debug!("{} and {} both resolve to {}", a, b, from_id);
            return Err(EngineError::BadParameter(TWO_VERSIONS.to_string()));
        }

        let old = self.store.read(doc, from_id).await?;
        let new = self.store.read(doc, to_id).await?;

        Ok(DiffResult {
            doc: doc.clone(),
            from: a.to_string(),
            to: b.to_string(),
            from_id,
            to_id,
            hunks: diff_blobs(&old, &new),
        })
    }

    async fn resolve(&self, doc: &DocPath, prefix: &RevisionPrefix) -> Result<RevisionId> {
        match self.store.resolve(doc, prefix).await {
            Ok(id) => Ok(id),
            Err(StoreError::ForeignRevision { revision, .. }) => {
                debug!("{} does not contain {}", revision, doc);
                Err(EngineError::BadParameter(TWO_VERSIONS.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Line diff of two byte strings. Non UTF-8 content yields one synthetic
/// hunk noting the sizes.
pub fn diff_blobs(old: &[u8], new: &[u8]) -> Vec<DiffHunk> {
    let (Ok(old_str), Ok(new_str)) = (std::str::from_utf8(old), std::str::from_utf8(new)) else {
        return binary_hunk(old, new);
    };
    if old_str == new_str {
        return Vec::new();
    }

    let text_diff = TextDiff::from_lines(old_str, new_str);
    let mut hunks = Vec::new();

    for group in text_diff.grouped_ops(CONTEXT_LINES) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;

        let mut lines = Vec::new();
        for op in &group {
            for change in text_diff.iter_changes(op) {
                let text = change.value().trim_end_matches('\n').to_string();
                lines.push(match change.tag() {
                    ChangeTag::Equal => DiffLine::Context(text),
                    ChangeTag::Delete => DiffLine::Removed(text),
                    ChangeTag::Insert => DiffLine::Added(text),
                });
            }
        }

        hunks.push(DiffHunk {
            old_start: old_range.start + 1,
            old_count: old_range.len(),
            new_start: new_range.start + 1,
            new_count: new_range.len(),
            lines,
        });
    }
    hunks
}

fn binary_hunk(old: &[u8], new: &[u8]) -> Vec<DiffHunk> {
    if old == new {
        return Vec::new();
    }
    let mut lines = Vec::new();
    if !old.is_empty() {
        lines.push(DiffLine::Removed(format!("(binary content, {} bytes)", old.len())));
    }
    if !new.is_empty() {
        lines.push(DiffLine::Added(format!("(binary content, {} bytes)", new.len())));
    }
    vec![DiffHunk {
        old_start: 1,
        old_count: usize::from(!old.is_empty()),
        new_start: 1,
        new_count: usize::from(!new.is_empty()),
        lines,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::object::CommitMeta;
    use bytes::Bytes;

    #[test]
    fn test_diff_blobs_added_line() {
        let hunks = diff_blobs(b"# test diff\n\n", b"# test diff\n\nadd an newline here \n");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].header(), "@@ -1,2 +1,3 @@");
        assert_eq!(hunks[0].lines.last(), Some(&DiffLine::Added("add an newline here ".to_string())));
    }

    #[test]
    fn test_diff_blobs_identical_and_binary() {
        assert!(diff_blobs(b"same\n", b"same\n").is_empty());
        let hunks = diff_blobs(b"\xff\x00", b"\xfe");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].lines.len(), 2);
    }

    #[test]
    fn test_parse_pair() {
        assert!(parse_pair("abcdef0,1234567").is_ok());
        assert!(matches!(parse_pair(""), Err(EngineError::BadParameter(_))));
        assert!(matches!(parse_pair("abcdef0"), Err(EngineError::BadParameter(_))));
        assert!(matches!(parse_pair("abcdef0,1234567,7654321"), Err(EngineError::BadParameter(_))));
        assert!(matches!(parse_pair("abcdef0yyyy,xxxx1234567"), Err(EngineError::InvalidRevision(_))));
    }

    #[tokio::test]
    async fn test_diff_engine() {
        let store = Arc::new(MemoryStore::new());
        let doc = DocPath::parse("test_diff.md").unwrap();
        let other = DocPath::parse("other.md").unwrap();
        let r1 = store
            .commit(&doc, Bytes::from_static(b"# test diff\n\n"), CommitMeta::new("t", "1"))
            .await
            .unwrap();
        let r2 = store
            .commit(&doc, Bytes::from_static(b"# test diff\n\nmore\n"), CommitMeta::new("t", "2"))
            .await
            .unwrap();
        let r3 = store
            .commit(&other, Bytes::from_static(b"x"), CommitMeta::new("t", "3"))
            .await
            .unwrap();
        let engine = DiffEngine::new(store);

        let a = RevisionPrefix::parse(&r2.to_hex()[..13]).unwrap();
        let b = RevisionPrefix::parse(&r1.to_hex()[..13]).unwrap();
        let result = engine.diff(&doc, &a, &b).await.unwrap();
        assert_eq!(result.title(), format!("Diff for file from {} to {}", &r2.to_hex()[..13], &r1.to_hex()[..13]));
        assert_eq!((result.from_id, result.to_id), (r2, r1));
        assert_eq!(result.deletions(), 1);
        assert!(result.unified().contains("-more\n"));

        assert!(matches!(engine.diff(&doc, &a, &a).await, Err(EngineError::BadParameter(_))));

        let foreign = RevisionPrefix::parse(&r1.to_hex()).unwrap();
        let r3_prefix = RevisionPrefix::parse(&r3.to_hex()).unwrap();
        assert!(matches!(engine.diff(&other, &foreign, &r3_prefix).await, Err(EngineError::BadParameter(_))));
    }
}
