//! HTTP surface: routing, server lifecycle, graceful shutdown.

pub mod handlers;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::auth;
use state::AppState;

/// Build the API router. Split out of [`run_server`] so tests can drive the
/// router directly.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/api/user/orders",
            post(handlers::submit_order).get(handlers::list_orders),
        )
        .route("/api/user/balance", get(handlers::balance))
        .route("/api/user/balance/withdraw", post(handlers::withdraw))
        .route("/api/user/withdrawals", get(handlers::list_withdrawals))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::authorize,
        ));

    Router::new()
        .route("/api/user/register", post(handlers::register))
        .route("/api/user/login", post(handlers::login))
        .merge(protected)
        .fallback(handlers::not_found)
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Serve until SIGINT/SIGTERM. Returns once every in-flight request has
/// finished; the caller then cancels the worker token and closes storage.
pub async fn run_server(run_address: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(run_address)
        .await
        .with_context(|| format!("cannot bind {run_address}"))?;

    tracing::info!(address = run_address, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    tracing::info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}
