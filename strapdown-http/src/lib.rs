//! Strapdown HTTP Protocol Implementation
//!
//! Serves a directory tree as a wiki over hyper: markdown documents render
//! through strapdown, every edit becomes a revision, and query modifiers
//! expose history, pinned versions, diffs and per-document options.

pub mod body;
pub mod handlers;
pub mod query;
pub mod render;
pub mod response;

pub use query::{EditMode, Modifiers};
pub use render::{Page, PageRenderer, RenderMode, StrapdownRenderer};

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use strapdown_core::{DiffEngine, EditCoordinator, EngineError, OptionStore, PathResolver, RenderOptions, VersionStore};

/// Server configuration seen by the protocol layer
#[derive(Debug, Clone)]
pub struct Config {
    /// Served directory, also the git working tree
    pub root: PathBuf,
    /// Page options used when a document sets none
    pub defaults: RenderOptions,
    /// Entries shown by `?history` without an explicit count
    pub history_size: usize,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Served as `_static/version`
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            defaults: RenderOptions::default(),
            history_size: 30,
            max_body_size: 100 * 1024 * 1024, // 100 MiB
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Shared per-server state
pub(crate) struct State {
    pub config: Config,
    pub store: Arc<dyn VersionStore>,
    pub resolver: PathResolver,
    pub options: OptionStore,
    pub coordinator: EditCoordinator,
    pub diff: DiffEngine,
    pub renderer: Arc<dyn PageRenderer>,
}

/// Wiki request handler
#[derive(Clone)]
pub struct WikiHandler {
    state: Arc<State>,
}

impl WikiHandler {
    /// Create a handler rendering strapdown pages
    pub fn new(config: Config, store: Arc<dyn VersionStore>) -> Self {
        Self::with_renderer(config, store, Arc::new(StrapdownRenderer))
    }

    /// Create a handler with a custom page renderer
    pub fn with_renderer(config: Config, store: Arc<dyn VersionStore>, renderer: Arc<dyn PageRenderer>) -> Self {
        let state = State {
            resolver: PathResolver::new(config.root.clone()),
            options: OptionStore::new(config.root.clone()),
            coordinator: EditCoordinator::new(config.root.clone(), store.clone()),
            diff: DiffEngine::new(store.clone()),
            store,
            renderer,
            config,
        };
        Self { state: Arc::new(state) }
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Handle an incoming HTTP request.
    ///
    /// Failures are turned into error responses here, so the returned
    /// response is always the one to send.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!("request: {} {}", method, uri);

        let response = match handlers::dispatch(&self.state, req).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_server_fault() {
                    error!("{} {} failed: {}", method, uri, e);
                } else {
                    debug!("{} {} rejected: {}", method, uri, e);
                }
                response::error_response(&e)
            }
        };
        let response = if method == Method::HEAD {
            response::strip_body(response)
        } else {
            response
        };

        info!("[{}] {} {}", method, response.status().as_u16(), uri);
        response
    }
}

/// HTTP layer errors
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl HttpError {
    pub fn is_server_fault(&self) -> bool {
        match self {
            HttpError::Http(_) | HttpError::Internal(_) => true,
            HttpError::Engine(e) => e.is_server_fault(),
            _ => false,
        }
    }
}
