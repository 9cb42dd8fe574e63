//! Per-document rendering options
//!
//! Options live in a JSON sidecar next to the markdown document
//! (`<doc>.md.option.json`). The on-disk record always has the five fields
//! `Title`, `Toc`, `HeadingNumber`, `Theme`, `Host`, all strings. Sidecars
//! may also be written raw by clients, so reads are lenient while writes go
//! through [`validate`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::object::DocPath;

/// Suffix appended to a markdown document path to name its sidecar
pub const SIDECAR_SUFFIX: &str = ".option.json";

/// Deepest heading level a stored heading-number pattern may describe
pub const MAX_HEADING_DEPTH: usize = 4;

/// Stored options of one document.
///
/// Empty strings and an absent `toc` mean "not set": they never override
/// the server defaults when rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOptions {
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Toc", default, with = "toc_flag")]
    pub toc: Option<bool>,
    #[serde(rename = "HeadingNumber", default)]
    pub heading_number: String,
    #[serde(rename = "Theme", default)]
    pub theme: String,
    #[serde(rename = "Host", default)]
    pub host: String,
}

/// `Toc` is persisted as the string `"true"`/`"false"`; `""` means unset.
/// Raw sidecars written with a JSON boolean are accepted as well.
mod toc_flag {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Text(String),
    }

    pub fn serialize<S: Serializer>(toc: &Option<bool>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match toc {
            Some(true) => serializer.serialize_str("true"),
            Some(false) => serializer.serialize_str("false"),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<bool>, D::Error> {
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Flag(b)) => Some(b),
            Some(Raw::Text(s)) => parse_toc(&s),
            None => None,
        })
    }
}

fn parse_toc(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Body of an option-update request, before validation
#[derive(Debug, Default, Deserialize)]
pub struct OptionsPayload {
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Toc")]
    pub toc: Option<String>,
    #[serde(rename = "HeadingNumber")]
    pub heading_number: Option<String>,
    #[serde(rename = "Theme")]
    pub theme: Option<String>,
    #[serde(rename = "Host")]
    pub host: Option<String>,
}

/// Check a heading-number pattern: `LEVEL("."LEVEL)*` with `LEVEL` one of
/// `i` or `a`, at most [`MAX_HEADING_DEPTH`] levels. Empty is accepted.
pub fn validate_heading_number(pattern: &str) -> bool {
    pattern.is_empty() || (is_heading_pattern(pattern) && pattern.split('.').count() <= MAX_HEADING_DEPTH)
}

/// Same grammar as [`validate_heading_number`] without the depth bound
fn is_heading_pattern(pattern: &str) -> bool {
    pattern.split('.').all(|level| level == "i" || level == "a")
}

/// Validate an option-update payload into the record to persist
pub fn validate(payload: OptionsPayload) -> Result<DocumentOptions> {
    let title = payload.title.unwrap_or_default();
    if title.is_empty() {
        return Err(EngineError::Validation("Title is required".to_string()));
    }
    let toc = match payload.toc.as_deref() {
        None => false,
        Some(raw) => parse_toc(raw).ok_or_else(|| {
            EngineError::Validation(format!("Toc must be `true` or `false`, got {:?}", raw))
        })?,
    };
    let heading_number = payload.heading_number.unwrap_or_default();
    if !validate_heading_number(&heading_number) {
        return Err(EngineError::Validation(format!(
            "HeadingNumber must look like `i.a.a.i` with at most {} levels, got {:?}",
            MAX_HEADING_DEPTH, heading_number
        )));
    }
    Ok(DocumentOptions {
        title,
        toc: Some(toc),
        heading_number,
        theme: payload.theme.unwrap_or_default(),
        host: payload.host.unwrap_or_default(),
    })
}

/// Options actually used to render one response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub title: String,
    pub toc: bool,
    pub heading_number: String,
    pub theme: String,
    pub host: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "Wiki".to_string(),
            toc: false,
            heading_number: "false".to_string(),
            theme: "cerulean".to_string(),
            host: "cdn.ztx.io".to_string(),
        }
    }
}

impl RenderOptions {
    /// Layer the set fields of a stored record over these options
    pub fn merged_with(&self, stored: &DocumentOptions) -> RenderOptions {
        fn pick(stored: &str, fallback: &str) -> String {
            let chosen = if stored.is_empty() { fallback } else { stored };
            chosen.to_string()
        }
        RenderOptions {
            title: pick(&stored.title, &self.title),
            toc: stored.toc.unwrap_or(self.toc),
            heading_number: pick(&stored.heading_number, &self.heading_number),
            theme: pick(&stored.theme, &self.theme),
            host: pick(&stored.host, &self.host),
        }
    }

    /// Apply a request-time heading-number override.
    ///
    /// `false` turns numbering off; anything that is not a heading pattern is
    /// ignored.
    pub fn with_heading_number(mut self, pattern: Option<&str>) -> RenderOptions {
        match pattern {
            Some(p) if p == "false" || (!p.is_empty() && is_heading_pattern(p)) => {
                self.heading_number = p.to_string();
            }
            Some(p) => debug!("ignoring heading number override {:?}", p),
            None => {}
        }
        self
    }
}

/// Reads and writes option sidecars under the served root
#[derive(Debug, Clone)]
pub struct OptionStore {
    root: PathBuf,
}

impl OptionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sidecar document for `doc` (the markdown document it renders)
    pub fn sidecar(doc: &DocPath) -> DocPath {
        doc.markdown().with_suffix(SIDECAR_SUFFIX)
    }

    /// Whether `doc` names a sidecar file itself
    pub fn is_sidecar(doc: &DocPath) -> bool {
        doc.file_name().ends_with(SIDECAR_SUFFIX)
    }

    /// Stored options of `doc`, empty when the sidecar is absent or unreadable
    pub async fn get(&self, doc: &DocPath) -> Result<DocumentOptions> {
        let path = Self::sidecar(doc).to_fs_path(&self.root);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DocumentOptions::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(options) => Ok(options),
            Err(e) => {
                warn!("ignoring malformed sidecar {:?}: {}", path, e);
                Ok(DocumentOptions::default())
            }
        }
    }

    /// Validate `payload` and overwrite the sidecar of `doc` with it
    pub async fn set(&self, doc: &DocPath, payload: &[u8]) -> Result<DocumentOptions> {
        let payload: OptionsPayload = serde_json::from_slice(payload)
            .map_err(|e| EngineError::Validation(format!("Invalid option payload: {}", e)))?;
        let options = validate(payload)?;

        let sidecar = Self::sidecar(doc);
        let parent = sidecar.parent().unwrap_or_else(DocPath::root).to_fs_path(&self.root);
        if !tokio::fs::metadata(&parent).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(EngineError::Validation(format!(
                "Directory {} does not exist",
                sidecar.parent().unwrap_or_else(DocPath::root).url_path()
            )));
        }

        let content = serde_json::to_vec(&options)
            .map_err(|e| EngineError::Validation(format!("Invalid option payload: {}", e)))?;
        let path = sidecar.to_fs_path(&self.root);
        let staging = path.with_file_name(format!("{}.tmp", sidecar.file_name()));
        tokio::fs::write(&staging, &content).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!("saved options of {} to {:?}", doc, path);
        Ok(options)
    }

    /// Effective options for rendering `doc`: `defaults`, then the stored
    /// sidecar, then the request-time heading-number override.
    pub async fn effective(
        &self,
        doc: &DocPath,
        defaults: &RenderOptions,
        heading_number: Option<&str>,
    ) -> RenderOptions {
        let stored = match self.get(doc).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("failed to read options of {}: {}", doc, e);
                DocumentOptions::default()
            }
        };
        defaults.merged_with(&stored).with_heading_number(heading_number)
    }
}
