//! Response builders and the error → status mapping

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::{Response, StatusCode};
use tracing::warn;

use strapdown_core::content_type::{HTML, JSON, PLAIN_TEXT};
use strapdown_core::EngineError;

use crate::HttpError;

pub type HttpResponse = Response<Full<Bytes>>;

/// Response with a fixed content type
pub fn build(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub fn text(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    build(status, PLAIN_TEXT, body)
}

/// Bare `text/plain` reply read by the upload page script
pub fn upload_reply(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    build(status, "text/plain", body)
}

pub fn html(body: String) -> HttpResponse {
    build(StatusCode::OK, HTML, body)
}

pub fn json(status: StatusCode, value: &serde_json::Value) -> HttpResponse {
    build(status, JSON, value.to_string())
}

/// `{"code": 0}` on success, `{"code": 1}` otherwise
pub fn json_code(status: StatusCode) -> HttpResponse {
    let code = if status.is_success() { 0 } else { 1 };
    json(status, &serde_json::json!({ "code": code }))
}

/// Redirect to an already percent-encoded location
pub fn redirect(status: StatusCode, location: &str) -> HttpResponse {
    let mut response = text(status, Bytes::new());
    let value = HeaderValue::from_str(location).unwrap_or_else(|_| {
        warn!("unusable redirect location {:?}", location);
        HeaderValue::from_static("/")
    });
    response.headers_mut().insert(LOCATION, value);
    response
}

/// Long-lived cacheable response for system assets
pub fn cacheable(mut response: HttpResponse) -> HttpResponse {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=86400, public"));
    response
}

/// Drop the body of a response while keeping its length, for HEAD
pub fn strip_body(response: HttpResponse) -> HttpResponse {
    let (mut parts, body) = response.into_parts();
    let len = body.size_hint().exact().unwrap_or(0);
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    Response::from_parts(parts, Full::new(Bytes::new()))
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_)
        | EngineError::InvalidRevision(_)
        | EngineError::BadParameter(_)
        | EngineError::Conflict { .. }
        | EngineError::UnsafeContent { .. }
        | EngineError::BadPath(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Ambiguous(_) => StatusCode::CONFLICT,
        EngineError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        EngineError::Io(_) | EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status code of an error
pub fn status_of(err: &HttpError) -> StatusCode {
    match err {
        HttpError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        HttpError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        HttpError::NotFound(_) => StatusCode::NOT_FOUND,
        HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
        HttpError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        HttpError::Engine(e) => engine_status(e),
        HttpError::Http(_) | HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain-text response describing an error
pub fn error_response(err: &HttpError) -> HttpResponse {
    let status = status_of(err);
    if let HttpError::Engine(EngineError::UnsafeContent { marker, content, .. }) = err {
        let mut body = format!(
            "the content just posted contains `{marker}`, which will break strapdown system, \
             please edit again and make sure `{marker}` does not exists in the content\n\
             ----------------------------------------------- content posted below, copy and edit again \
             -----------------------------------------------------------\n\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        return text(status, body);
    }
    text(status, format!("{}\n", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strapdown_core::DocPath;

    #[test]
    fn test_status_mapping() {
        let doc = DocPath::parse("a.md").unwrap();
        assert_eq!(status_of(&HttpError::PayloadTooLarge(1)), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            status_of(&HttpError::Engine(EngineError::Conflict { path: doc.clone() })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&HttpError::Engine(EngineError::MethodNotAllowed(doc))),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            status_of(&HttpError::Engine(EngineError::Ambiguous("x".into()))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&HttpError::Engine(EngineError::Io(std::io::Error::other("disk")))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unsafe_content_is_echoed() {
        let err = HttpError::Engine(EngineError::UnsafeContent {
            path: DocPath::parse("xmp.md").unwrap(),
            marker: "</xmp>",
            content: Bytes::from_static(b"I Have XMP </xmp>"),
        });
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], PLAIN_TEXT);
    }

    #[test]
    fn test_strip_body_keeps_length() {
        let response = strip_body(text(StatusCode::OK, "hello"));
        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
        assert_eq!(response.body().size_hint().exact(), Some(0));
    }
}
