//! HTTP API of the monitor server

use crate::common::{decode_address, timestamp_now};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::coordinator::liveness::MonitorResponse;
use crate::monitor::pool::NodePool;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct MonitorState {
    pub pool: Arc<NodePool>,
}

pub fn create_router(state: MonitorState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/monitor", axum::routing::get(list_nodes))
        .route(
            "/monitor/:address",
            axum::routing::get(check_node)
                .post(register_node)
                .delete(unregister_node),
        )
        .fallback(not_found)
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Path segments arrive percent-decoded once; addresses encoded by the
/// interface server may still carry an escape
fn node_address(raw: String) -> String {
    decode_address(&raw).unwrap_or(raw)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp_now(),
    }))
}

async fn list_nodes(State(state): State<MonitorState>) -> impl IntoResponse {
    Json(json!({ "nodes": state.pool.addresses().await }))
}

async fn check_node(
    State(state): State<MonitorState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let address = node_address(address);
    Json(state.pool.check(&address).await)
}

async fn register_node(
    State(state): State<MonitorState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let address = node_address(address);
    match state.pool.register(&address).await {
        Ok(()) => (StatusCode::CREATED, Json(state.pool.check(&address).await)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(MonitorResponse {
                redis_node_address: address,
                is_alive: false,
                error_message: e.to_string(),
            }),
        ),
    }
}

async fn unregister_node(
    State(state): State<MonitorState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let address = node_address(address);
    if state.pool.unregister(&address).await {
        (StatusCode::OK, Json(json!({ "removed": address })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{} is not registered", address) })),
        )
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no such route" })),
    )
}
