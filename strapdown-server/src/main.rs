//! Strapdown Server - versioned markdown wiki
//!
//! Serves a directory as a wiki rendered by strapdown in the browser. Every
//! edit is committed to the git repository of the served directory.

use anyhow::{Context, Result};
use clap::Parser;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strapdown_core::{GitStore, RenderOptions, VersionStore};
use strapdown_http::{Config, WikiHandler};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Strapdown server command line
#[derive(Parser, Debug)]
#[command(name = "strapdown")]
#[command(version)]
#[command(about = "Versioned markdown wiki server", long_about = None)]
struct Cli {
    /// TOML configuration file, overridden by the flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen addresses, comma separated (e.g., 0.0.0.0:8080,[::]:8080)
    #[arg(short, long)]
    addr: Option<String>,

    /// Served directory
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Create the git repository when the directory has none
    #[arg(long)]
    init: bool,

    /// Default page title
    #[arg(long)]
    title: Option<String>,

    /// Default strapdown theme
    #[arg(long)]
    theme: Option<String>,

    /// Show a table of contents by default
    #[arg(long)]
    toc: Option<bool>,

    /// Default heading numbering (`false` or a pattern such as `i.a.a`)
    #[arg(long)]
    heading_number: Option<String>,

    /// Host serving the strapdown assets
    #[arg(long)]
    host: Option<String>,

    /// Entries listed by `?history` without a count
    #[arg(long)]
    history_size: Option<usize>,

    /// Maximum request body size in bytes
    #[arg(long)]
    max_body_size: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// Server configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
struct ServerConfig {
    addr: String,
    dir: PathBuf,
    init: bool,
    title: String,
    theme: String,
    toc: bool,
    heading_number: String,
    host: String,
    history_size: usize,
    max_body_size: usize,
    debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let page = RenderOptions::default();
        let http = Config::default();
        Self {
            addr: "0.0.0.0:8080".to_string(),
            dir: PathBuf::from("."),
            init: false,
            title: page.title,
            theme: page.theme,
            toc: page.toc,
            heading_number: page.heading_number,
            host: page.host,
            history_size: http.history_size,
            max_body_size: http.max_body_size,
            debug: false,
        }
    }
}

impl ServerConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Command line flags win over the file
    fn apply(mut self, cli: Cli) -> Self {
        if let Some(addr) = cli.addr {
            self.addr = addr;
        }
        if let Some(dir) = cli.dir {
            self.dir = dir;
        }
        if let Some(title) = cli.title {
            self.title = title;
        }
        if let Some(theme) = cli.theme {
            self.theme = theme;
        }
        if let Some(toc) = cli.toc {
            self.toc = toc;
        }
        if let Some(heading_number) = cli.heading_number {
            self.heading_number = heading_number;
        }
        if let Some(host) = cli.host {
            self.host = host;
        }
        if let Some(history_size) = cli.history_size {
            self.history_size = history_size;
        }
        if let Some(max_body_size) = cli.max_body_size {
            self.max_body_size = max_body_size;
        }
        self.init |= cli.init;
        self.debug |= cli.debug;
        self
    }

    fn addrs(&self) -> Result<Vec<SocketAddr>> {
        self.addr
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| a.parse().with_context(|| format!("invalid listen address {:?}", a)))
            .collect()
    }

    fn http_config(&self) -> Config {
        let page = RenderOptions {
            title: self.title.clone(),
            toc: self.toc,
            theme: self.theme.clone(),
            host: self.host.clone(),
            ..RenderOptions::default()
        }
        .with_heading_number(Some(&self.heading_number));

        Config {
            root: self.dir.clone(),
            defaults: page,
            history_size: self.history_size,
            max_body_size: self.max_body_size,
            ..Config::default()
        }
    }
}

fn open_store(config: &ServerConfig) -> Result<GitStore> {
    if config.init {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("failed to create {}", config.dir.display()))?;
        return GitStore::open_or_init(&config.dir)
            .with_context(|| format!("failed to initialize a git repository in {}", config.dir.display()));
    }
    GitStore::open(&config.dir).with_context(|| {
        format!(
            "{} is not a git repository, run `git init` there or start with --init",
            config.dir.display()
        )
    })
}

async fn serve(listener: TcpListener, handler: WikiHandler) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let handler = handler.clone();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |mut req| {
                let handler = handler.clone();
                req.extensions_mut().insert(remote);
                async move { Ok::<_, Infallible>(handler.handle(req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection from {}: {:?}", remote, e);
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let config = match cli.config.take() {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    }
    .apply(cli);

    let env_filter = if config.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let store: Arc<dyn VersionStore> = Arc::new(open_store(&config)?);
    info!("Serving {}", config.dir.display());

    let handler = WikiHandler::new(config.http_config(), store);
    let mut listeners = JoinSet::new();
    for addr in config.addrs()? {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;
        info!("Server listening on {}", addr);
        listeners.spawn(serve(listener, handler.clone()));
    }
    if listeners.is_empty() {
        anyhow::bail!("no listen address configured");
    }

    while let Some(result) = listeners.join_next().await {
        if let Err(e) = result {
            error!("Listener task failed: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_then_flags() {
        let file: ServerConfig = toml::from_str(
            r#"
            addr = "127.0.0.1:9000,127.0.0.1:9001"
            title = "Notes"
            history_size = 5
            "#,
        )
        .unwrap();
        assert_eq!(file.title, "Notes");
        assert_eq!(file.theme, "cerulean");

        let cli = Cli::parse_from(["strapdown", "--history-size", "10", "--toc", "true", "--init"]);
        let config = file.apply(cli);
        assert_eq!(config.history_size, 10);
        assert!(config.toc);
        assert!(config.init);
        assert_eq!(config.addrs().unwrap().len(), 2);
    }

    #[test]
    fn test_http_config() {
        let config = ServerConfig {
            heading_number: "i.a".to_string(),
            ..ServerConfig::default()
        };
        let http = config.http_config();
        assert_eq!(http.defaults.heading_number, "i.a");
        assert_eq!(http.defaults.title, "Wiki");
        assert_eq!(http.history_size, 30);

        let bad = ServerConfig {
            addr: "nowhere".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad.addrs().is_err());
    }

    #[test]
    fn test_open_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = ServerConfig {
            dir: temp_dir.path().join("wiki"),
            ..ServerConfig::default()
        };
        assert!(open_store(&config).is_err());
        config.init = true;
        assert!(open_store(&config).is_ok());
        assert!(temp_dir.path().join("wiki/.git").exists());
    }
}
