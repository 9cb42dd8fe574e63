//! Page rendering
//!
//! The engine hands finished inputs (bytes, effective options, mode) to a
//! [`PageRenderer`]. Markdown is never converted on the server: the view
//! page wraps the source in an `<xmp>` element that the strapdown script
//! renders in the browser, and the edit page loads the editor bundle.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;
use std::fmt::Write as _;

use strapdown_core::resolver::readable_size;
use strapdown_core::{DiffResult, DirEntry, DocPath, RenderOptions, RevisionEntry, RevisionId};

/// Characters escaped when a document path becomes a link
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode a URL path for use in links and redirects
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Markdown source as placed inside an `<xmp>` wrapper. Content committed
/// through the server never holds a closing tag, but files changed on disk
/// may.
fn xmp_body(content: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(content);
    if text.contains("</xmp") {
        Cow::Owned(text.replace("</xmp", "&lt;/xmp"))
    } else {
        text
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Which bundle a document page loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Rendered markdown
    View,
    /// Editor for the markdown document
    Edit,
    /// Editor for the literal file, saved back through `?edit=raw`
    Raw,
}

/// Inputs for a document page
#[derive(Debug, Clone)]
pub struct Page<'a> {
    pub doc: &'a DocPath,
    pub content: &'a [u8],
    pub options: &'a RenderOptions,
    pub mode: RenderMode,
    /// Revision shown, or the latest one for live content
    pub version: Option<RevisionId>,
    /// Live content differs from the latest revision
    pub uncommitted: bool,
}

/// Produces HTML pages from engine results
pub trait PageRenderer: Send + Sync {
    fn document(&self, page: &Page<'_>) -> String;
    fn listing(&self, dir: &DocPath, entries: &[DirEntry], options: &RenderOptions) -> String;
    fn history(&self, doc: &DocPath, entries: &[RevisionEntry], options: &RenderOptions) -> String;
    fn diff(&self, diff: &DiffResult, options: &RenderOptions) -> String;
    fn upload(&self, target: &DocPath, options: &RenderOptions) -> String;
}

/// Default renderer producing strapdown pages
#[derive(Debug, Clone, Copy, Default)]
pub struct StrapdownRenderer;

impl StrapdownRenderer {
    fn head(title: &str, host: &str, theme: &str, style: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"UTF-8\">\n  <title>{title}</title>\n  \
             <link rel=\"stylesheet\" href=\"http://{host}/strapdown/themes/{theme}.min.css\" />\n  \
             <link rel=\"stylesheet\" href=\"http://{host}/strapdown/themes/bootstrap-responsive.min.css\" />\n  \
             <style type=\"text/css\" media=\"screen\">{style}</style>\n</head>\n",
            title = escape_html(title),
            host = escape_html(host),
            theme = escape_html(theme),
            style = style,
        )
    }

    fn navbar(headline: &str) -> String {
        format!(
            "<div class=\"navbar navbar-fixed-top\"><div class=\"navbar-inner\"><div class=\"container\">\
             <div id=\"headline\" class=\"brand\"> {} </div></div></div></div>\n",
            escape_html(headline)
        )
    }

    fn view(page: &Page<'_>) -> String {
        let o = page.options;
        let mut attrs = format!(
            "theme=\"{}\" toc=\"{}\" heading_number=\"{}\"",
            escape_html(&o.theme),
            o.toc,
            escape_html(&o.heading_number)
        );
        if let Some(version) = page.version {
            let _ = write!(attrs, " version=\"{}\"", version);
        }
        if page.uncommitted {
            attrs.push_str(" uncommitted=\"true\"");
        }
        format!(
            "<!DOCTYPE html> <html> <title>{title}</title> <meta charset=\"utf-8\"> <xmp {attrs} style=\"display:none;\">\n{content}\n</xmp> \
             <script src=\"http://{host}/strapdown/strapdown.min.js\"></script> </html>\n",
            title = escape_html(&o.title),
            attrs = attrs,
            content = xmp_body(page.content),
            host = escape_html(&o.host),
        )
    }

    fn editor(page: &Page<'_>) -> String {
        let o = page.options;
        let action = match page.mode {
            RenderMode::Raw => "?edit=raw",
            _ => "?edit",
        };
        let mut out = Self::head(
            &o.title,
            &o.host,
            "cerulean",
            "html, body {height: 100%;overflow: hidden;margin: 0;padding: 0;}\
             #editor {margin: 0;position: absolute;top: 51px;bottom: 0;left: 0;right: 0;}",
        );
        let _ = write!(
            out,
            "<body><div class=\"navbar navbar-fixed-top\"><div class=\"navbar-inner\"><div style=\"padding:0 20px\">\
             <div id=\"headline\" class=\"brand\"> {title} </div>\
             <div class=\"nav-collapse collapse navbar-responsive-collapse pull-right\">\
             <form class=\"nav\" method=\"POST\" action=\"{action}\" name=\"body\">\
             <input id=\"savValue\" type=\"hidden\" name=\"body\" value=\"\" />\
             <button class=\"btn btn-default btn-sm\" type=\"submit\">Save</button></form></div></div></div></div>\
             <xmp id=\"editor\" data-path=\"{path}\">{content}</xmp>\
             <script src=\"http://{host}/ace/ace.js\" type=\"text/javascript\" charset=\"utf-8\"></script>\
             <script src=\"http://{host}/strapdown/edit.min.js\" type=\"text/javascript\" charset=\"utf-8\"></script>\
             </body></html>\n",
            title = escape_html(&o.title),
            action = action,
            path = escape_html(&page.doc.url_path()),
            content = xmp_body(page.content),
            host = escape_html(&o.host),
        );
        out
    }
}

const LIST_STYLE: &str = "#list {margin: 51px auto;box-sizing: border-box;}\
     #list table {max-width: 100%;border-collapse: collapse;word-wrap: break-word;word-break: break-all;}";

impl PageRenderer for StrapdownRenderer {
    fn document(&self, page: &Page<'_>) -> String {
        match page.mode {
            RenderMode::View => Self::view(page),
            RenderMode::Edit | RenderMode::Raw => Self::editor(page),
        }
    }

    fn listing(&self, dir: &DocPath, entries: &[DirEntry], options: &RenderOptions) -> String {
        let mut out = Self::head(&options.title, &options.host, &options.theme, LIST_STYLE);
        out.push_str("<body>\n");
        out.push_str(&Self::navbar(&format!("Directory Listing of {}", dir.url_path())));
        out.push_str(
            "<div id=\"list\" class=\"container\">\n<hr />\n<table class=\"table table-hover\">\n\
             <thead><tr><th>Filename</th><th>Size</th><th>Datetime</th></tr></thead>\n<tbody>\n",
        );
        for entry in entries {
            let href = escape_html(&encode_path(&entry.url));
            let slash = if entry.is_dir { " <span class=\"endslash\">/</span>" } else { "" };
            let modified = entry.modified.as_ref().map(format_time).unwrap_or_default();
            let _ = writeln!(
                out,
                "<tr><td><a href=\"{href}\">{name}{slash}</a></td>\
                 <td><a href=\"{href}\" title=\"{size}B\">{readable}</a></td>\
                 <td><a href=\"{href}\">{modified}</a></td></tr>",
                href = href,
                name = escape_html(&entry.name),
                slash = slash,
                size = entry.size,
                readable = readable_size(entry.size),
                modified = modified,
            );
        }
        out.push_str("</tbody>\n</table>\n<hr />\n</div>\n</body>\n</html>\n");
        out
    }

    fn history(&self, doc: &DocPath, entries: &[RevisionEntry], options: &RenderOptions) -> String {
        let mut out = Self::head(&options.title, &options.host, &options.theme, LIST_STYLE);
        out.push_str("<body>\n");
        out.push_str(&Self::navbar(&format!("History of {}", doc.url_path())));
        out.push_str(
            "<div id=\"list\" class=\"container\">\n<hr />\n\
             <button class=\"btn btn-default btn-sm\" onclick=\"var v=[].map.call(document.querySelectorAll('input[name=diff]:checked'),function(e){return e.value});location.search='?diff='+v.join(',')\">Diff selected</button>\n\
             <table class=\"table table-hover\">\n\
             <thead><tr><th>Version</th><th>Message</th><th>Datetime</th><th>Author</th></tr></thead>\n<tbody>\n",
        );
        for entry in entries {
            let _ = writeln!(
                out,
                "<tr><td><input type=\"checkbox\" name=\"diff\" value=\"{id}\" /><a href=\"?version={id}\">{short}</a></td>\
                 <td><span>{message}</span></td><td>{time}</td><td>{author}</td></tr>",
                id = entry.id,
                short = entry.id.short(),
                message = escape_html(&entry.message),
                time = format_time(&entry.timestamp),
                author = escape_html(&entry.author),
            );
        }
        out.push_str("</tbody>\n</table>\n<hr />\n</div>\n</body>\n</html>\n");
        out
    }

    fn diff(&self, diff: &DiffResult, options: &RenderOptions) -> String {
        let title = diff.title();
        let mut out = Self::head(&title, &options.host, &options.theme, "#diff {margin: 56px auto;box-sizing: border-box;}");
        out.push_str("<body>\n");
        out.push_str(&Self::navbar(&title));
        let _ = write!(
            out,
            "<div id=\"diff\" class=\"container\">\n<p>{doc}: <code>{from}</code> &rarr; <code>{to}</code>, \
             {add} additions, {del} deletions</p>\n<div><pre>{body}</pre></div>\n</div>\n</body>\n</html>\n",
            doc = escape_html(&diff.doc.url_path()),
            from = diff.from_id,
            to = diff.to_id,
            add = diff.additions(),
            del = diff.deletions(),
            body = escape_html(&diff.unified()),
        );
        out
    }

    fn upload(&self, target: &DocPath, options: &RenderOptions) -> String {
        let mut out = Self::head(&options.title, &options.host, &options.theme, LIST_STYLE);
        out.push_str("<body>\n");
        out.push_str(&Self::navbar(&format!("Upload to {}", target.url_path())));
        out.push_str(
            "<div id=\"list\" class=\"container\">\n\
             <form method=\"POST\" action=\"?upload\" enctype=\"multipart/form-data\">\
             <input type=\"file\" name=\"body\" /> <button class=\"btn btn-default btn-sm\" type=\"submit\">Upload</button>\
             </form>\n</div>\n</body>\n</html>\n",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_page() {
        let doc = DocPath::parse(".md").unwrap();
        let options = RenderOptions::default();
        let id = RevisionId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        let html = StrapdownRenderer.document(&Page {
            doc: &doc,
            content: b"This is a test",
            options: &options,
            mode: RenderMode::View,
            version: Some(id),
            uncommitted: false,
        });
        assert!(html.contains("<title>Wiki</title>"));
        assert!(html.contains("This is a test"));
        assert!(html.contains("theme=\"cerulean\""));
        assert!(html.contains("version=\"0123456789abcdef0123456789abcdef01234567\""));
        assert!(html.contains("strapdown.min.js"));
        assert!(!html.contains("uncommitted"));
    }

    #[test]
    fn test_edit_page_neutralizes_wrapper_end() {
        let doc = DocPath::parse("x.html").unwrap();
        let options = RenderOptions::default();
        let html = StrapdownRenderer.document(&Page {
            doc: &doc,
            content: b"a</xmp>b",
            options: &options,
            mode: RenderMode::Raw,
            version: None,
            uncommitted: true,
        });
        assert!(html.contains("edit.min.js"));
        assert!(html.contains("action=\"?edit=raw\""));
        assert!(html.contains("a&lt;/xmp>b"));
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("/a b/c#d.md"), "/a%20b/c%23d.md");
        assert_eq!(encode_path("/中文"), "/%E4%B8%AD%E6%96%87");
    }
}
