// src/server/mod.rs

//! HTTP surface: GitHub statistics routes, WebDAV listings and downloads, and
//! cache introspection.

pub mod error;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::github::GithubService;
use crate::webdav::WebDavClient;

pub use error::ApiError;

/// Shared handler state. The cache lives inside the GitHub service.
#[derive(Debug, Clone)]
pub struct AppState {
    pub github: Arc<GithubService>,
    /// `None` when no WebDAV share is configured.
    pub files: Option<Arc<WebDavClient>>,
}

impl AppState {
    pub fn new(github: GithubService, files: Option<WebDavClient>) -> Self {
        Self {
            github: Arc::new(github),
            files: files.map(Arc::new),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/github", get(routes::proxy_get).post(routes::proxy_post))
        .route("/api/github/repos/{owner}/{repo}", get(routes::repository))
        .route("/api/github/users/{username}", get(routes::user_stats))
        .route("/api/github/users/{username}/repos", get(routes::user_repositories))
        .route("/api/files", get(routes::list_files))
        .route("/api/files/{*path}", get(routes::file))
        .route("/api/cache/stats", get(routes::cache_stats))
        .route("/healthz", get(routes::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
