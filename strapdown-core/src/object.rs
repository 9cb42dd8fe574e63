//! Identity types for documents and revisions
//!
//! Documents are addressed by a canonical path relative to the served root.
//! Revisions are addressed by the 20-byte commit id of the backing history,
//! written as 40 lowercase hex characters and abbreviable to a left-prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Shortest prefix accepted when resolving an abbreviated revision id.
pub const MIN_PREFIX_LEN: usize = 7;

/// Length of a full revision id in hex characters.
pub const FULL_HEX_LEN: usize = 40;

/// Canonical path of a document relative to the served root.
///
/// Always `/`-separated, without a leading slash, without `.` or `..`
/// segments. The empty path denotes the root directory itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath(String);

impl DocPath {
    /// Normalise a request path into a document path.
    ///
    /// Returns `None` when the path escapes the root or contains a NUL byte.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.contains('\0') {
            return None;
        }
        let mut parts: Vec<&str> = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    parts.pop()?;
                }
                s => parts.push(s),
            }
        }
        Some(Self(parts.join("/")))
    }

    /// The root directory.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last path segment (empty for the root).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Extension of the last segment, without the dot.
    ///
    /// A leading dot does not start an extension except for the implicit
    /// index `.md`, whose extension is `md`.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        let idx = name.rfind('.')?;
        if idx == 0 && name != ".md" {
            return None;
        }
        Some(&name[idx + 1..])
    }

    pub fn is_markdown(&self) -> bool {
        self.extension() == Some("md")
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<DocPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a child segment.
    pub fn join(&self, name: &str) -> DocPath {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    /// Append a literal suffix to the last segment (`foo` + `.md`).
    pub fn with_suffix(&self, suffix: &str) -> DocPath {
        Self(format!("{}{}", self.0, suffix))
    }

    /// Markdown document backing this path: `foo` → `foo.md`, root → `.md`,
    /// already-markdown paths are returned unchanged.
    pub fn markdown(&self) -> DocPath {
        if self.is_markdown() {
            self.clone()
        } else if self.is_root() {
            Self(".md".to_string())
        } else {
            self.with_suffix(".md")
        }
    }

    /// Implicit index document of this directory (`dir/.md`).
    pub fn index_document(&self) -> DocPath {
        self.join(".md")
    }

    /// Backing filesystem location under `root`.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut p = root.to_path_buf();
        for seg in self.0.split('/').filter(|s| !s.is_empty()) {
            p.push(seg);
        }
        p
    }

    /// Absolute URL path for links (`/` + path).
    pub fn url_path(&self) -> String {
        format!("/{}", self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an immutable revision in the backing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId([u8; 20]);

impl RevisionId {
    /// Create a new RevisionId from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a full 40-character lowercase hex id
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        if let Some((index, c)) = hex_str.char_indices().find(|(_, c)| c.is_ascii_uppercase()) {
            return Err(hex::FromHexError::InvalidHexCharacter { c, index });
        }
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Abbreviated form shown in listings.
    pub fn short(&self) -> String {
        self.to_hex()[..11].to_string()
    }

    pub fn starts_with(&self, prefix: &RevisionPrefix) -> bool {
        self.to_hex().starts_with(prefix.as_str())
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for RevisionId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for RevisionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RevisionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl From<git2::Oid> for RevisionId {
    fn from(oid: git2::Oid) -> Self {
        let mut arr = [0u8; 20];
        arr.copy_from_slice(oid.as_bytes());
        Self(arr)
    }
}

impl TryFrom<RevisionId> for git2::Oid {
    type Error = git2::Error;

    fn try_from(id: RevisionId) -> Result<Self, Self::Error> {
        git2::Oid::from_bytes(&id.0)
    }
}

/// A validated left-prefix of a revision id, as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionPrefix(String);

impl RevisionPrefix {
    /// Validate a caller-supplied prefix: 7 to 40 lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() < MIN_PREFIX_LEN || raw.len() > FULL_HEX_LEN || !is_lower_hex(raw) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full-length prefixes name exactly one id.
    pub fn as_full(&self) -> Option<RevisionId> {
        if self.0.len() == FULL_HEX_LEN {
            RevisionId::from_hex(&self.0).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for RevisionPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// One entry of a document's history, newest first in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub id: RevisionId,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Metadata recorded with a new revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub author: String,
    pub message: String,
}

impl CommitMeta {
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            message: message.into(),
        }
    }
}
