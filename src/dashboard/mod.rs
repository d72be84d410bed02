//! Dashboard — Axum web server for read-only monitoring.
//!
//! Serves a small JSON API over the catalog store: status counts, the
//! product list, and the recent action trail. CORS enabled for local
//! development. This is monitoring glue, not a product surface.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::storage::CatalogStore;
use routes::DashboardState;

/// Start the dashboard web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_dashboard(store: CatalogStore, port: u16) {
    let app = build_router(Arc::new(DashboardState { store }));

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Dashboard server error");
                }
            }
            Err(e) => tracing::error!(error = %e, port, "Failed to bind dashboard port"),
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<DashboardState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().expect("static origin"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/products", get(routes::get_products))
        .route("/api/actions", get(routes::get_actions))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
