//! Request path resolution
//!
//! A request path is classified exactly once against the live filesystem and
//! the resulting [`Resolution`] is handed to the handlers. `foo` is shorthand
//! for the markdown document `foo.md`; a directory renders its implicit index
//! `dir/.md` when present and a listing otherwise.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::object::DocPath;

/// Reserved prefix for assets served by the engine itself
pub const SYSTEM_PREFIX: &str = "_static";

/// Read-only assets under [`SYSTEM_PREFIX`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAsset {
    /// Server version string
    Version,
}

impl SystemAsset {
    fn lookup(doc: &DocPath) -> Option<SystemAsset> {
        match doc.as_str().strip_prefix(SYSTEM_PREFIX)? {
            "/version" => Some(SystemAsset::Version),
            _ => None,
        }
    }
}

/// Whether `doc` lies under the reserved system prefix
pub fn is_system(doc: &DocPath) -> bool {
    let path = doc.as_str();
    path == SYSTEM_PREFIX || path.starts_with(&format!("{}/", SYSTEM_PREFIX))
}

/// Whether `doc` exposes version-control internals
pub fn is_hidden(doc: &DocPath) -> bool {
    let path = doc.as_str();
    path == ".git" || path.starts_with(".git/") || path == ".gitignore" || path == ".gitmodules"
}

/// What a request path refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Path under the reserved system prefix; `None` when no such asset exists
    System { path: DocPath, asset: Option<SystemAsset> },
    /// Version-control internals, never served
    Hidden(DocPath),
    /// Directory requested without its trailing slash
    Redirect { dir: DocPath },
    /// Directory without an index document
    Directory { dir: DocPath },
    /// Directory rendered through `dir/.md`. Only the root may lack one, in
    /// which case the editor is offered.
    IndexDocument { dir: DocPath, doc: DocPath, exists: bool },
    /// Markdown document addressed through its shorthand
    Document { doc: DocPath, exists: bool },
    /// Existing file served verbatim
    RawAsset { path: DocPath, explicit_markdown: bool },
    /// The markdown document the shorthand points at is a directory
    Conflict { path: DocPath },
}

impl Resolution {
    /// Markdown document this resolution renders, if any
    pub fn document(&self) -> Option<&DocPath> {
        match self {
            Resolution::IndexDocument { doc, .. } | Resolution::Document { doc, .. } => Some(doc),
            _ => None,
        }
    }
}

/// Classifies request paths under a served root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

async fn stat(path: &Path) -> Result<Option<Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse a percent-decoded request path into a document path
    pub fn parse(raw: &str) -> Result<DocPath> {
        DocPath::parse(raw).ok_or_else(|| EngineError::BadPath(raw.to_string()))
    }

    /// Classify a percent-decoded request path
    pub async fn resolve(&self, raw: &str) -> Result<Resolution> {
        let path = Self::parse(raw)?;

        if is_hidden(&path) {
            return Ok(Resolution::Hidden(path));
        }
        if is_system(&path) {
            let asset = SystemAsset::lookup(&path);
            return Ok(Resolution::System { path, asset });
        }

        let resolution = self.classify(path, raw.ends_with('/')).await?;
        debug!("resolved {:?} to {:?}", raw, resolution);
        Ok(resolution)
    }

    async fn classify(&self, path: DocPath, trailing_slash: bool) -> Result<Resolution> {
        if let Some(meta) = stat(&path.to_fs_path(&self.root)).await? {
            if !meta.is_dir() {
                let explicit_markdown = path.is_markdown();
                return Ok(Resolution::RawAsset { path, explicit_markdown });
            }
            if !trailing_slash && !path.is_root() {
                return Ok(Resolution::Redirect { dir: path });
            }
            let index = path.index_document();
            let exists = stat(&index.to_fs_path(&self.root)).await?.is_some_and(|m| !m.is_dir());
            if exists || path.is_root() {
                return Ok(Resolution::IndexDocument { dir: path, doc: index, exists });
            }
            return Ok(Resolution::Directory { dir: path });
        }

        let doc = path.markdown();
        match stat(&doc.to_fs_path(&self.root)).await? {
            Some(meta) if meta.is_dir() => Ok(Resolution::Conflict { path: doc }),
            Some(_) => Ok(Resolution::Document { doc, exists: true }),
            None => Ok(Resolution::Document { doc, exists: false }),
        }
    }

    /// Entries of `dir` for a listing: `..` first (except at the root), then
    /// the children sorted by name. Version-control internals are skipped.
    pub async fn list_directory(&self, dir: &DocPath) -> Result<Vec<DirEntry>> {
        let fs_dir = dir.to_fs_path(&self.root);
        let mut entries = Vec::new();

        if let Some(parent) = dir.parent() {
            let meta = tokio::fs::metadata(&fs_dir).await?;
            entries.push(DirEntry::from_meta("..".to_string(), parent.url_path(), &meta));
        }

        let mut children = Vec::new();
        let mut reader = tokio::fs::read_dir(&fs_dir).await?;
        while let Some(item) = reader.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let child = dir.join(&name);
            if is_hidden(&child) {
                continue;
            }
            let meta = match item.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("skipping {} in listing: {}", child, e);
                    continue;
                }
            };
            let url = child.url_path();
            let url = url.strip_suffix(".md").map(str::to_string).unwrap_or(url);
            children.push(DirEntry::from_meta(name, url, &meta));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(children);
        Ok(entries)
    }
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Link target, without the `.md` suffix for markdown documents
    pub url: String,
}

impl DirEntry {
    fn from_meta(name: String, url: String, meta: &Metadata) -> Self {
        Self {
            name,
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            url,
        }
    }

    /// Size with binary (KiB based) units, one decimal
    pub fn readable_size(&self) -> String {
        readable_size(self.size)
    }
}

pub fn readable_size(size: u64) -> String {
    const UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    let mut num = size as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if num < 1024.0 {
            return format!("{:.1} {}", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1} {}", num, UNITS[UNITS.len() - 1])
}
