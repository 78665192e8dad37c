//! HTTP API of the interface server
//!
//! - `POST /clients`: register a primary or standby
//! - `GET /clients`: list primaries (with slot ranges) and standbys
//! - `POST /hash/data`: batch SET `{"data": [{"key", "value"}]}`
//! - `GET /hash/data/:key`: single GET

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{timestamp_now, Error, NodeRole};
use crate::coordinator::cluster::Cluster;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct InterfaceState {
    pub cluster: Arc<Cluster>,
}

/// Body of `POST /clients`
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub role: NodeRole,
    pub address: String,
    /// Required for standbys
    #[serde(default, alias = "master_address")]
    pub primary_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Body of `POST /hash/data`
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub data: Vec<KeyValue>,
}

fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    (e.to_http_status(), Json(json!({ "error": e.to_string() })))
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: InterfaceState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route(
            "/clients",
            axum::routing::get(list_clients).post(register_client),
        )
        .route("/hash/data", axum::routing::post(set_data))
        .route("/hash/data/:key", axum::routing::get(get_data))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<InterfaceState>) -> impl IntoResponse {
    let snapshot = state.cluster.snapshot();
    Json(json!({
        "status": "healthy",
        "primaries": snapshot.primaries.len(),
        "standbys": snapshot.standbys.len(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp_now(),
    }))
}

async fn list_clients(State(state): State<InterfaceState>) -> impl IntoResponse {
    Json(state.cluster.snapshot())
}

async fn register_client(
    State(state): State<InterfaceState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let result = match (req.role, req.primary_address.as_deref()) {
        (NodeRole::Primary, _) => state.cluster.add_primary(&req.address).await,
        (NodeRole::Standby, Some(primary)) => {
            state.cluster.add_standby(&req.address, primary).await
        }
        (NodeRole::Standby, None) => Err(Error::InvalidConfig(
            "standby registration requires primary_address".into(),
        )),
    };

    match result {
        Ok(node) => (
            StatusCode::CREATED,
            Json(json!({
                "message": format!("{} {} registered", req.role, node.address()),
                "clients": state.cluster.snapshot(),
            })),
        ),
        Err(e) => {
            tracing::warn!(address = %req.address, error = %e, "Registration failed");
            error_response(&e)
        }
    }
}

async fn set_data(
    State(state): State<InterfaceState>,
    Json(req): Json<SetRequest>,
) -> impl IntoResponse {
    let pairs: Vec<(String, String)> = req.data.into_iter().map(|kv| (kv.key, kv.value)).collect();

    match state.cluster.set_many(&pairs).await {
        Ok(results) => {
            let results: Vec<_> = results
                .into_iter()
                .map(|r| {
                    json!({
                        "node_address": r.node_address,
                        "slot": r.slot,
                        "result": format!("{} {} {}", r.command, r.key, r.value.unwrap_or_default()),
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({ "message": "SET applied", "results": results })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Batch SET failed");
            error_response(&e)
        }
    }
}

async fn get_data(
    State(state): State<InterfaceState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match state.cluster.get(&key).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "message": "GET applied",
                "node_address": result.node_address,
                "slot": result.slot,
                "key": result.key,
                "result": result.value,
            })),
        ),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "GET failed");
            error_response(&e)
        }
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no such route" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{encode_key, LogSyncPolicy};
    use crate::coordinator::liveness::{LivenessOracle, MonitorProbe, MonitorResponse};
    use crate::coordinator::modlog::ModificationLog;
    use crate::coordinator::node_client::MemoryConnector;
    use crate::coordinator::restart::NoopRestarter;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoMonitors;

    #[async_trait::async_trait]
    impl MonitorProbe for NoMonitors {
        async fn query(&self, _m: &str, node: &str) -> crate::Result<MonitorResponse> {
            Ok(MonitorResponse {
                redis_node_address: node.into(),
                is_alive: true,
                error_message: String::new(),
            })
        }
    }

    async fn router(dir: &std::path::Path) -> Router {
        let modlog = Arc::new(ModificationLog::open(dir, LogSyncPolicy::Flush).unwrap());
        let oracle = LivenessOracle::new(Vec::new(), Arc::new(NoMonitors), None);
        let cluster = Cluster::new(
            Arc::new(MemoryConnector::new()),
            modlog,
            oracle,
            Arc::new(NoopRestarter),
        );
        cluster
            .bootstrap(&["m1".to_string(), "m2".to_string()], &["s1".to_string()])
            .await
            .unwrap();
        create_router(InterfaceState {
            cluster: Arc::new(cluster),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path()).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/hash/data")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"data":[{"key":"foo","value":"bar"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["results"][0]["result"], "SET foo bar");
        assert_eq!(body["results"][0]["slot"], 10292);

        let response = app
            .oneshot(Request::get("/hash/data/foo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["result"], "bar");
        assert_eq!(body["node_address"], "m2");
    }

    #[tokio::test]
    async fn test_get_key_with_slash() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path()).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/hash/data")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"data":[{"key":"path/to/key","value":"v"}]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let uri = format!("/hash/data/{}", encode_key("path/to/key"));
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["key"], "path/to/key");
        assert_eq!(body["result"], "v");
    }

    #[tokio::test]
    async fn test_register_standby_needs_primary() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path()).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/clients")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"role":"standby","address":"s2"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::post("/clients")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"role":"slave","address":"s2","master_address":"m2"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["clients"]["standbys"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path()).await;
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
