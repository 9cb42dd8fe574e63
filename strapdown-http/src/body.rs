//! Request body extraction
//!
//! Edits arrive either as a form (`application/x-www-form-urlencoded` or
//! `multipart/form-data`) whose `body` field holds the new content, or as the
//! literal content itself.

use bytes::Bytes;
use url::form_urlencoded;

use crate::HttpError;

/// Form field carrying the document content
pub const CONTENT_FIELD: &str = "body";

/// How a request body encodes the submitted content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Form,
    Multipart { boundary: String },
    Raw,
}

impl BodyKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return BodyKind::Raw;
        };
        let mut params = ct.split(';').map(str::trim);
        let mime = params.next().unwrap_or("").to_ascii_lowercase();
        match mime.as_str() {
            "application/x-www-form-urlencoded" => BodyKind::Form,
            "multipart/form-data" => params
                .find_map(|p| p.strip_prefix("boundary="))
                .map(|b| BodyKind::Multipart {
                    boundary: b.trim_matches('"').to_string(),
                })
                .unwrap_or(BodyKind::Raw),
            _ => BodyKind::Raw,
        }
    }
}

/// Content submitted by a write request
pub fn extract_content(content_type: Option<&str>, body: Bytes) -> Result<Bytes, HttpError> {
    match BodyKind::from_content_type(content_type) {
        BodyKind::Raw => Ok(body),
        BodyKind::Form => {
            let field = form_urlencoded::parse(&body)
                .find(|(k, _)| k == CONTENT_FIELD)
                .map(|(_, v)| Bytes::from(v.into_owned()));
            // `curl -d @file` posts the file as a form without fields
            Ok(field.unwrap_or(body))
        }
        BodyKind::Multipart { boundary } => multipart_field(&body, &boundary, CONTENT_FIELD).ok_or_else(|| {
            HttpError::InvalidRequest(format!("multipart body has no `{}` field", CONTENT_FIELD))
        }),
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// `name` parameter of a part's Content-Disposition header
fn disposition_name(headers: &str) -> Option<&str> {
    let line = headers
        .split("\r\n")
        .find(|l| l.to_ascii_lowercase().starts_with("content-disposition:"))?;
    line.split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("name="))
        .map(|n| n.trim_matches('"'))
}

/// Content of the first part named `field`
fn multipart_field(body: &[u8], boundary: &str, field: &str) -> Option<Bytes> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let mut pos = find(body, delimiter, 0)?;

    loop {
        let start = pos + delimiter.len();
        if body[start..].starts_with(b"--") {
            return None;
        }
        let next = find(body, delimiter, start)?;
        let part = &body[start..next];
        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        if let Some(header_end) = find(part, b"\r\n\r\n", 0) {
            let headers = String::from_utf8_lossy(&part[..header_end]);
            if disposition_name(&headers) == Some(field) {
                return Some(Bytes::copy_from_slice(&part[header_end + 4..]));
            }
        }
        pos = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_kind() {
        assert_eq!(BodyKind::from_content_type(None), BodyKind::Raw);
        assert_eq!(
            BodyKind::from_content_type(Some("application/x-www-form-urlencoded; charset=utf-8")),
            BodyKind::Form
        );
        assert_eq!(
            BodyKind::from_content_type(Some("multipart/form-data; boundary=\"xyz\"")),
            BodyKind::Multipart { boundary: "xyz".to_string() }
        );
        assert_eq!(BodyKind::from_content_type(Some("video/mp4")), BodyKind::Raw);
    }

    #[test]
    fn test_form_field() {
        let body = Bytes::from_static(b"title=x&body=%23+hello%0Aworld");
        let content = extract_content(Some("application/x-www-form-urlencoded"), body).unwrap();
        assert_eq!(content, Bytes::from_static(b"# hello\nworld"));

        let empty = extract_content(Some("application/x-www-form-urlencoded"), Bytes::from_static(b"body=")).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_multipart_field() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--BOUND\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nnope\r\n");
        body.extend_from_slice(
            b"--BOUND\r\nContent-Disposition: form-data; name=\"body\"; filename=\"x.mp4\"\r\nContent-Type: video/mp4\r\n\r\n",
        );
        body.extend_from_slice(b"\x00\xff\xf7\r\nbinary");
        body.extend_from_slice(b"\r\n--BOUND--\r\n");

        let content = extract_content(Some("multipart/form-data; boundary=BOUND"), Bytes::from(body)).unwrap();
        assert_eq!(content, Bytes::from_static(b"\x00\xff\xf7\r\nbinary"));

        let missing = extract_content(
            Some("multipart/form-data; boundary=BOUND"),
            Bytes::from_static(b"--BOUND\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\n1\r\n--BOUND--\r\n"),
        );
        assert!(matches!(missing, Err(HttpError::InvalidRequest(_))));
    }

    #[test]
    fn test_raw_body() {
        let raw = Bytes::from_static(b"\x00\xff\xf7");
        assert_eq!(extract_content(None, raw.clone()).unwrap(), raw);
    }
}
