//! Query-string modifiers
//!
//! A document URL selects its mode through bare or valued query keys:
//! `?edit`, `?edit=raw`, `?history=10`, `?version=<id>`, `?diff=<a>,<b>`,
//! `?option`, `?upload` and `?heading_number=<pattern>`.

use url::form_urlencoded;

/// Editor flavour requested through `?edit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Edit the markdown document behind a shorthand path
    Document,
    /// Edit the literal file named by the path
    Raw,
}

/// Parsed request modifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub edit: Option<EditMode>,
    pub history: bool,
    /// `?history=N`, `None` when absent or not a number
    pub history_limit: Option<usize>,
    /// Non-empty `?version=`
    pub version: Option<String>,
    /// `?diff=` as supplied, possibly empty
    pub diff: Option<String>,
    pub option: bool,
    pub upload: bool,
    pub heading_number: Option<String>,
}

impl Modifiers {
    pub fn parse(query: Option<&str>) -> Self {
        let mut m = Modifiers::default();
        let Some(query) = query else {
            return m;
        };
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "edit" => {
                    m.edit = Some(if value == "raw" { EditMode::Raw } else { EditMode::Document });
                }
                "history" => {
                    m.history = true;
                    m.history_limit = value.parse().ok();
                }
                "version" if !value.is_empty() => m.version = Some(value.into_owned()),
                "diff" => m.diff = Some(value.into_owned()),
                "option" => m.option = true,
                "upload" => m.upload = true,
                "heading_number" => m.heading_number = Some(value.into_owned()),
                _ => {}
            }
        }
        m
    }
}
