//! Content type classification by extension
//!
//! The table is fixed; file contents are never inspected.

use crate::object::DocPath;

/// Fallback for unknown or missing extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

pub const MARKDOWN: &str = "text/markdown; charset=utf-8";
pub const HTML: &str = "text/html; charset=utf-8";
pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";
pub const JSON: &str = "application/json";

const TABLE: &[(&str, &str)] = &[
    ("md", MARKDOWN),
    ("markdown", MARKDOWN),
    ("html", HTML),
    ("htm", HTML),
    ("txt", PLAIN_TEXT),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("json", JSON),
    ("xml", "text/xml; charset=utf-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("wasm", "application/wasm"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

/// MIME type for an extension (without the dot), case-insensitive
pub fn for_extension(ext: &str) -> &'static str {
    TABLE
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

/// MIME type for a document path
pub fn classify(doc: &DocPath) -> &'static str {
    doc.extension().map(for_extension).unwrap_or(OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_str(p: &str) -> &'static str {
        classify(&DocPath::parse(p).unwrap())
    }

    #[test]
    fn test_known_extensions() {
        assert_eq!(classify_str("a/movie.mp4"), "video/mp4");
        assert_eq!(classify_str("song.MP3"), "audio/mpeg");
        assert_eq!(classify_str("www.css"), "text/css; charset=utf-8");
        assert_eq!(classify_str("app.js"), "text/javascript; charset=utf-8");
        assert_eq!(classify_str("doc.md"), MARKDOWN);
        assert_eq!(classify_str(".md"), MARKDOWN);
    }

    #[test]
    fn test_unknown_falls_back() {
        assert_eq!(classify_str("blob"), OCTET_STREAM);
        assert_eq!(classify_str("archive.xyz"), OCTET_STREAM);
        assert_eq!(classify_str(".gitignore"), OCTET_STREAM);
    }
}
