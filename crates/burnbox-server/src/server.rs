use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    handlers::{create_secret, get_secret, health},
    service::SecretService,
    store::{self, Backend, Cipher, Scheme},
    sweeper::{spawn_sweeper, sweep_interval},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub backend: Backend,
    /// Scheme for newly created secrets. Existing entries keep their own.
    pub scheme: Scheme,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("BURNBOX_PORT").unwrap_or(8080),
            data_dir: std::env::var("BURNBOX_DATA_DIR").ok().map(PathBuf::from),
            backend: env_parse("BURNBOX_BACKEND").unwrap_or_default(),
            scheme: env_parse("BURNBOX_CIPHER").unwrap_or_default(),
            sweep_interval: sweep_interval(env_parse("BURNBOX_SWEEP_INTERVAL_SECS")),
            cors_origins: std::env::var("BURNBOX_CORS_ORIGINS").ok(),
        }
    }
}

/// Parse an env var, warning (and yielding `None`) when it is set but invalid.
fn env_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(var = name, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

/// Resolve the data directory, creating it if needed.
/// Public so the CLI sweep command can reuse this logic.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Open the configured store and wrap it in a [`SecretService`].
pub fn open_service(cfg: &ServerConfig) -> Result<SecretService> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), backend = ?cfg.backend, "using data directory");

    let store = store::open(cfg.backend, &data_dir).context("open store")?;
    Ok(SecretService::new(store, Cipher::new(cfg.scheme)))
}

/// HTTP routes over `state`.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/secret", post(create_secret))
        .route("/api/secret/{id}", get(get_secret))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let service = open_service(&cfg)?;
    info!(scheme = ?cfg.scheme, "new secrets use this cipher scheme");

    let sweeper = spawn_sweeper(service.clone(), cfg.sweep_interval);

    let app = router(AppState { service }, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnbox server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweeper.shutdown().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_service_uses_configured_dir_and_backend() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: Some(dir.path().join("nested")),
            backend: Backend::Redb,
            scheme: Scheme::Legacy,
            sweep_interval: Duration::from_secs(1),
            cors_origins: None,
        };
        open_service(&cfg).unwrap();
        assert!(dir.path().join("nested").join("burnbox.db").is_file());
    }
}
