//! Request handlers
//!
//! `dispatch` turns one request into one response. Routing is driven by the
//! resolved kind of the path and the query modifiers; all mutations go
//! through the edit coordinator.

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::{Request, StatusCode};
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use tracing::{debug, info};

use strapdown_core::content_type::{self, MARKDOWN};
use strapdown_core::diff::parse_pair;
use strapdown_core::resolver::{is_hidden, is_system};
use strapdown_core::{
    DocPath, EngineError, OptionStore, PathResolver, RenderOptions, Resolution, RevisionId, RevisionPrefix,
    StoreError, SystemAsset,
};

use crate::body::extract_content;
use crate::query::{EditMode, Modifiers};
use crate::render::{encode_path, Page, RenderMode};
use crate::response::{self, HttpResponse};
use crate::{HttpError, State};

const HIDDEN_MESSAGE: &str = "access of .git related files/directory not allowed\n";

/// Per-request facts shared by the GET and POST flows
struct RequestContext {
    /// Percent-decoded request path
    path: String,
    /// Request path as received
    raw_path: String,
    query: Option<String>,
    modifiers: Modifiers,
    client_ip: String,
    content_type: Option<String>,
}

impl RequestContext {
    fn from_request<B>(req: &Request<B>) -> Result<Self, HttpError> {
        let raw_path = req.uri().path().to_string();
        let path = percent_decode_str(&raw_path)
            .decode_utf8()
            .map_err(|_| EngineError::BadPath(raw_path.clone()))?
            .into_owned();
        let query = req.uri().query().map(str::to_string);
        let remote = req.extensions().get::<SocketAddr>().copied();

        Ok(Self {
            modifiers: Modifiers::parse(query.as_deref()),
            client_ip: client_ip(remote, req.headers()),
            content_type: req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            path,
            raw_path,
            query,
        })
    }

    /// Path names a directory explicitly (`/` or `/dir/`)
    fn names_directory(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Document written by `?edit` and `?option` requests
    fn markdown_target(&self, path: &DocPath) -> DocPath {
        if path.is_root() || self.names_directory() {
            path.index_document()
        } else {
            path.markdown()
        }
    }
}

/// Client address recorded as commit author. Behind a loopback proxy the
/// forwarded address is the client; otherwise both are kept.
fn client_ip(remote: Option<SocketAddr>, headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (remote, forwarded) {
        (Some(addr), Some(xff)) if addr.ip().is_loopback() => xff.to_string(),
        (Some(addr), Some(xff)) => format!("{},{}", addr.ip(), xff),
        (Some(addr), None) => addr.ip().to_string(),
        (None, Some(xff)) => xff.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Handle one request
pub(crate) async fn dispatch<B>(state: &State, req: Request<B>) -> Result<HttpResponse, HttpError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let ctx = RequestContext::from_request(&req)?;
    let method = req.method().clone();

    match method.as_str() {
        "GET" | "HEAD" => get(state, &ctx).await,
        "POST" | "PUT" => post(state, &ctx, req.into_body()).await,
        other => Err(HttpError::MethodNotAllowed(other.to_string())),
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, HttpError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(HttpError::PayloadTooLarge(limit)),
        Err(e) => Err(HttpError::InvalidRequest(format!("failed to read request body: {}", e))),
    }
}

/// Document a history, diff, option or upload request refers to
fn document_target(resolution: &Resolution) -> Option<DocPath> {
    match resolution {
        Resolution::Document { doc, .. } | Resolution::IndexDocument { doc, .. } => Some(doc.clone()),
        Resolution::RawAsset { path, .. } => Some(path.clone()),
        Resolution::Directory { dir } | Resolution::Redirect { dir } => Some(dir.index_document()),
        Resolution::Conflict { path } => Some(path.clone()),
        Resolution::System { .. } | Resolution::Hidden(_) => None,
    }
}

async fn options_for(state: &State, ctx: &RequestContext, doc: &DocPath) -> RenderOptions {
    state
        .options
        .effective(doc, &state.config.defaults, ctx.modifiers.heading_number.as_deref())
        .await
}

async fn read_file(state: &State, doc: &DocPath) -> Result<Option<Bytes>, HttpError> {
    match tokio::fs::read(doc.to_fs_path(&state.config.root)).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::Io(e).into()),
    }
}

/// Content of `doc` at the revision named by `raw`
async fn read_version(state: &State, doc: &DocPath, raw: &str) -> Result<(RevisionId, Bytes), HttpError> {
    let prefix = RevisionPrefix::parse(raw)
        .ok_or_else(|| EngineError::InvalidRevision(StoreError::InvalidRevision(raw.to_string()).to_string()))?;
    let id = state.store.resolve(doc, &prefix).await.map_err(EngineError::from)?;
    let content = state.store.read(doc, id).await.map_err(EngineError::from)?;
    debug!("serving {} at {}", doc, id);
    Ok((id, content))
}

fn document_page(
    state: &State,
    doc: &DocPath,
    content: &[u8],
    options: &RenderOptions,
    mode: RenderMode,
    version: Option<RevisionId>,
    uncommitted: bool,
) -> HttpResponse {
    response::html(state.renderer.document(&Page {
        doc,
        content,
        options,
        mode,
        version,
        uncommitted,
    }))
}

async fn editor(state: &State, ctx: &RequestContext, doc: &DocPath, mode: RenderMode) -> Result<HttpResponse, HttpError> {
    let content = read_file(state, doc).await?.unwrap_or_default();
    let options = options_for(state, ctx, doc).await;
    Ok(document_page(state, doc, &content, &options, mode, None, false))
}

/// Rendered view of a markdown document, live or pinned to a revision
async fn view(state: &State, ctx: &RequestContext, doc: &DocPath, exists: bool) -> Result<HttpResponse, HttpError> {
    let options = options_for(state, ctx, doc).await;

    if let Some(raw) = &ctx.modifiers.version {
        let (id, content) = read_version(state, doc, raw).await?;
        return Ok(document_page(state, doc, &content, &options, RenderMode::View, Some(id), false));
    }
    if !exists || ctx.modifiers.edit.is_some() {
        return editor(state, ctx, doc, RenderMode::Edit).await;
    }

    let working = state.coordinator.working_state(doc).await?;
    let Some(content) = read_file(state, doc).await? else {
        // removed between resolution and read
        return editor(state, ctx, doc, RenderMode::Edit).await;
    };
    Ok(document_page(
        state,
        doc,
        &content,
        &options,
        RenderMode::View,
        working.latest(),
        working.is_uncommitted(),
    ))
}

async fn raw_asset(
    state: &State,
    ctx: &RequestContext,
    path: &DocPath,
    explicit_markdown: bool,
) -> Result<HttpResponse, HttpError> {
    match ctx.modifiers.edit {
        Some(EditMode::Document) if explicit_markdown => {
            let stem = path.url_path();
            let stem = stem.strip_suffix(".md").unwrap_or(&stem).to_string();
            return Err(HttpError::InvalidRequest(format!(
                "{} is a markdown file, edit it through {}?edit or {}?edit=raw",
                path.url_path(),
                stem,
                path.url_path()
            )));
        }
        Some(EditMode::Document) => return editor(state, ctx, &path.markdown(), RenderMode::Edit).await,
        Some(EditMode::Raw) => return editor(state, ctx, path, RenderMode::Raw).await,
        None => {}
    }

    let content_type = if explicit_markdown { MARKDOWN } else { content_type::classify(path) };
    if let Some(raw) = &ctx.modifiers.version {
        let (_, content) = read_version(state, path, raw).await?;
        return Ok(response::build(StatusCode::OK, content_type, content));
    }
    match read_file(state, path).await? {
        Some(content) => Ok(response::build(StatusCode::OK, content_type, content)),
        None => Err(HttpError::NotFound(path.url_path())),
    }
}

async fn get(state: &State, ctx: &RequestContext) -> Result<HttpResponse, HttpError> {
    let resolution = state.resolver.resolve(&ctx.path).await?;

    match &resolution {
        Resolution::Hidden(path) => {
            debug!("refusing hidden path {}", path);
            return Ok(response::text(StatusCode::FORBIDDEN, HIDDEN_MESSAGE));
        }
        Resolution::System { path, asset } => {
            return match asset {
                Some(SystemAsset::Version) => Ok(response::cacheable(response::text(
                    StatusCode::OK,
                    state.config.version.clone(),
                ))),
                None => Err(HttpError::NotFound(path.url_path())),
            };
        }
        _ => {}
    }

    let target = document_target(&resolution);
    if let Some(doc) = &target {
        if let Some(raw) = &ctx.modifiers.diff {
            let (a, b) = parse_pair(raw)?;
            let diff = state.diff.diff(doc, &a, &b).await?;
            let options = options_for(state, ctx, doc).await;
            return Ok(response::html(state.renderer.diff(&diff, &options)));
        }
        if ctx.modifiers.history {
            let limit = ctx.modifiers.history_limit.unwrap_or(state.config.history_size);
            let entries = state.store.history(doc, Some(limit)).await.map_err(EngineError::from)?;
            if entries.is_empty() {
                return Ok(response::text(
                    StatusCode::BAD_REQUEST,
                    format!("No commit history found for {}\n", doc),
                ));
            }
            let options = options_for(state, ctx, doc).await;
            return Ok(response::html(state.renderer.history(doc, &entries, &options)));
        }
        if ctx.modifiers.option {
            let stored = state.options.get(doc).await?;
            let value = serde_json::to_value(&stored).map_err(|e| HttpError::Internal(e.to_string()))?;
            return Ok(response::json(StatusCode::OK, &value));
        }
        if ctx.modifiers.upload {
            let options = options_for(state, ctx, doc).await;
            return Ok(response::html(state.renderer.upload(doc, &options)));
        }
    }

    match resolution {
        Resolution::Conflict { path } => Err(EngineError::Conflict { path }.into()),
        Resolution::Redirect { dir } => {
            let mut location = encode_path(&format!("{}/", dir.url_path()));
            if let Some(query) = &ctx.query {
                location.push('?');
                location.push_str(query);
            }
            Ok(response::redirect(StatusCode::MOVED_PERMANENTLY, &location))
        }
        Resolution::RawAsset { path, explicit_markdown } => raw_asset(state, ctx, &path, explicit_markdown).await,
        Resolution::Directory { dir } => {
            let index = dir.index_document();
            if ctx.modifiers.edit.is_some() {
                return editor(state, ctx, &index, RenderMode::Edit).await;
            }
            let entries = state.resolver.list_directory(&dir).await?;
            let options = options_for(state, ctx, &index).await;
            Ok(response::html(state.renderer.listing(&dir, &entries, &options)))
        }
        Resolution::IndexDocument { doc, exists, .. } | Resolution::Document { doc, exists } => {
            view(state, ctx, &doc, exists).await
        }
        Resolution::Hidden(_) | Resolution::System { .. } => Err(HttpError::Internal("unrouted path".to_string())),
    }
}

async fn post<B>(state: &State, ctx: &RequestContext, body: B) -> Result<HttpResponse, HttpError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let path = PathResolver::parse(&ctx.path)?;
    if is_hidden(&path) {
        return Ok(response::text(StatusCode::FORBIDDEN, HIDDEN_MESSAGE));
    }

    if ctx.modifiers.option {
        let doc = ctx.markdown_target(&path);
        let outcome = match read_body(body, state.config.max_body_size).await {
            Ok(raw) => match extract_content(ctx.content_type.as_deref(), raw) {
                Ok(payload) => state.coordinator.set_options(&doc, &payload).await.map_err(HttpError::from),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        return Ok(match outcome {
            Ok(_) => {
                info!("options of {} saved as {}", doc, OptionStore::sidecar(&doc));
                response::json_code(StatusCode::OK)
            }
            Err(e) => {
                debug!("options of {} rejected: {}", doc, e);
                response::json_code(response::status_of(&e))
            }
        });
    }

    if is_system(&path) {
        return Err(EngineError::MethodNotAllowed(path).into());
    }

    let target = match ctx.modifiers.edit {
        Some(EditMode::Document) => ctx.markdown_target(&path),
        _ if path.is_root() || ctx.names_directory() => path.index_document(),
        _ => path,
    };
    let author = format!("anonymous@{}", ctx.client_ip);

    let outcome = async {
        let raw = read_body(body, state.config.max_body_size).await?;
        let content = extract_content(ctx.content_type.as_deref(), raw)?;
        Ok::<_, HttpError>(state.coordinator.edit(&target, content, &author).await?)
    }
    .await;

    match (outcome, ctx.modifiers.upload) {
        (Ok(_), true) => Ok(response::upload_reply(StatusCode::OK, "success")),
        (Ok(_), false) => Ok(response::redirect(StatusCode::FOUND, &ctx.raw_path)),
        (Err(e), true) => Ok(response::upload_reply(response::status_of(&e), format!("failure\n{}\n", e))),
        (Err(e), false) => Err(e),
    }
}
