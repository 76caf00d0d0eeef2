use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::post;
use axum::Router;
use clap::Parser;
use hifigrab_core::config::ServerSection;
use hifigrab_core::{
    load_config, ChromiumSessionFactory, ConversionPipeline, HifigrabConfig, SearchOrchestrator,
    SystemProcessRunner,
};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod api;

pub use api::{
    ApiError, ApiResult, ConvertBody, ConvertResponse, PreviewBody, PreviewResponse, SearchBody,
    SearchResponse,
};

pub type Result<T> = std::result::Result<T, ServerError>;

pub const DEFAULT_CONFIG_PATH: &str = "configs/hifigrab.toml";
pub const DEFAULT_LOG_FILTER: &str = "hifigrab_core=info,hifigrab_server=info,tower_http=info";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] hifigrab_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid allowed origin {0:?}")]
    InvalidOrigin(String),
    #[error("failed to install logging: {0}")]
    Logging(String),
}

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "hifigrab search and conversion server", long_about = None)]
pub struct Cli {
    /// Path to hifigrab.toml; defaults are used when absent
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Address to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,
    /// Port to bind (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,
    /// Directory converted files are written to
    #[arg(long)]
    pub downloads_dir: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `hifigrab_core=trace`
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    pub fn resolve_config(&self) -> Result<HifigrabConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => {
                load_config(DEFAULT_CONFIG_PATH)?
            }
            None => HifigrabConfig::default(),
        };
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = &self.downloads_dir {
            config.paths.downloads_dir = Some(dir.display().to_string());
        }
        Ok(config)
    }
}

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchOrchestrator>,
    pub pipeline: Arc<ConversionPipeline>,
}

impl AppState {
    pub fn new(search: SearchOrchestrator, pipeline: ConversionPipeline) -> Self {
        Self {
            search: Arc::new(search),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Wires the real browser and the system toolchain.
    pub fn from_config(config: &HifigrabConfig, downloads_dir: PathBuf) -> Self {
        let sessions = Arc::new(ChromiumSessionFactory::new(config.browser.clone()));
        let search = SearchOrchestrator::new(config.search.clone(), sessions);
        let pipeline =
            ConversionPipeline::new(config, downloads_dir, Arc::new(SystemProcessRunner));
        Self::new(search, pipeline)
    }
}

pub fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => {
            EnvFilter::try_new(level).map_err(|err| ServerError::Logging(err.to_string()))?
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| ServerError::Logging(err.to_string()))
}

pub fn cors_layer(server: &ServerSection) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(&server.allowed_origin)
        .map_err(|_| ServerError::InvalidOrigin(server.allowed_origin.clone()))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

pub fn router(state: AppState, server: &ServerSection) -> Result<Router> {
    Ok(Router::new()
        .route("/search", post(api::search))
        .route("/convert", post(api::convert))
        .route("/preview", post(api::preview))
        .fallback(api::not_found)
        .with_state(state)
        .layer(cors_layer(server)?)
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http()))
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_level.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(cli))
}

async fn serve(cli: Cli) -> Result<()> {
    let config = cli.resolve_config()?;
    let downloads_dir = cli
        .downloads_dir
        .clone()
        .unwrap_or_else(|| config.downloads_dir());
    let state = AppState::from_config(&config, downloads_dir.clone());
    let app = router(state, &config.server)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local: SocketAddr = listener.local_addr()?;
    info!(
        addr = %local,
        downloads_dir = %downloads_dir.display(),
        origin = %config.server.allowed_origin,
        "hifigrab server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("hifigrab server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config_values() {
        let cli = Cli::parse_from([
            "hifigrab-server",
            "--config",
            concat!(env!("CARGO_MANIFEST_DIR"), "/../configs/hifigrab.toml"),
            "--port",
            "6060",
            "--downloads-dir",
            "/srv/music",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.server.port, 6060);
        assert_eq!(config.paths.downloads_dir.as_deref(), Some("/srv/music"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/hifigrab.toml")),
            ..Cli::default()
        };
        assert!(matches!(cli.resolve_config(), Err(ServerError::Config(_))));
    }

    #[test]
    fn cors_rejects_malformed_origin() {
        let server = ServerSection {
            allowed_origin: "http://bad\norigin".into(),
            ..ServerSection::default()
        };
        assert!(matches!(cors_layer(&server), Err(ServerError::InvalidOrigin(_))));
    }
}
