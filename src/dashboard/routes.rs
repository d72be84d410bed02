//! Dashboard API route handlers.
//!
//! All endpoints return JSON read directly from the catalog store.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::storage::CatalogStore;
use crate::types::{ActionRecord, Product, ProductStatus};

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: CatalogStore,
}

pub type AppState = Arc<DashboardState>;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub total_products: usize,
    pub by_status: serde_json::Value,
    pub published: usize,
    pub recent_failures: usize,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let products = state
        .store
        .all_products()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let count = |status: ProductStatus| products.iter().filter(|p| p.status == status).count();
    let by_status = serde_json::json!({
        "pending": count(ProductStatus::Pending),
        "needs_approval": count(ProductStatus::NeedsApproval),
        "approved": count(ProductStatus::Approved),
        "rejected": count(ProductStatus::Rejected),
        "published": count(ProductStatus::Published),
        "paused": count(ProductStatus::Paused),
    });

    let actions = state
        .store
        .recent_actions(100)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StatusResponse {
        total_products: products.len(),
        published: count(ProductStatus::Published),
        by_status,
        recent_failures: actions.iter().filter(|a| !a.success).count(),
    }))
}

pub async fn get_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<Product>>, StatusCode> {
    state
        .store
        .all_products()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get_actions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActionRecord>>, StatusCode> {
    state
        .store
        .recent_actions(100)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
