//! HTTP front end for the fetch proxy.

pub mod auth;
pub mod error;
pub mod handlers;

use anyhow::Result;
use axum::routing::{get, post};
use axum::{Router, middleware};
use fetchgate_core::FetchProxy;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<FetchProxy>,
}

pub fn router(proxy: Arc<FetchProxy>) -> Router {
    let state = AppState { proxy };

    let protected = Router::new()
        .route("/fetch", post(handlers::fetch))
        .route("/fetch/bulk", post(handlers::fetch_bulk))
        .route("/intelligence/list", get(handlers::list_intelligence))
        .route("/blocked/requests", get(handlers::list_blocked))
        .route("/config", get(handlers::show_config))
        .route("/config/reload", post(handlers::reload_config))
        .route("/housekeeping/cleanup", post(handlers::housekeeping))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn serve<F>(proxy: Arc<FetchProxy>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if proxy.api_keys().await.is_empty() {
        tracing::warn!("No API keys configured: authentication is disabled");
    }

    let addr = listener.local_addr()?;
    tracing::info!("fetchgate listening on http://{}", addr);

    axum::serve(listener, router(Arc::clone(&proxy)))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("shutting down gracefully");
        })
        .await?;

    proxy.shutdown().await;
    Ok(())
}
