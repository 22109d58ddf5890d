//! Thin HTTP front end (§4.7 ambient addition). Deliberately minimal: one
//! route to invoke an already-deployed function, one observability route,
//! one liveness route. Request authentication, CORS policy and function
//! CRUD are explicitly out of scope (§1) and live with the collaborator
//! that owns them.

use crate::engine::Engine;
use crate::model::{ExecutionRequest, FunctionId, OwnerId};
use crate::store::FunctionStore;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub functions: Arc<dyn FunctionStore>,
}

pub fn configure_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/functions/:id/invoke", post(invoke_function))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Serialize)]
struct MetricsResponse {
    current_instance_count: u32,
    max_instances: u32,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        current_instance_count: state.engine.current_instance_count().await,
        max_instances: state.engine.max_instances(),
    })
}

#[derive(Deserialize)]
struct InvokeBody {
    #[serde(default)]
    input: Option<serde_json::Value>,
}

/// The owner identity header standing in for the out-of-scope auth
/// collaborator (§1): production deployments front this service with a
/// real identity resolver that sets this header after authenticating the
/// caller.
const OWNER_HEADER: &str = "x-owner-id";

async fn invoke_function(
    State(state): State<AppState>,
    Path(function_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<InvokeBody>,
) -> impl IntoResponse {
    let owner_header = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let owner_id = match owner_header {
        Some(id) => OwnerId(id),
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": format!("missing {OWNER_HEADER} header") })),
            )
                .into_response();
        }
    };

    let function_id = FunctionId(function_id);

    let function = match state.functions.get(&function_id).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "function not found" })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "failed to load function");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to load function" })),
            )
                .into_response();
        }
    };

    if !function.enabled {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "function is disabled" })),
        )
            .into_response();
    }

    let request = ExecutionRequest {
        function_id: function.id,
        owner_id,
        source_code: function.source_code,
        input: body.input,
    };

    let result = state.engine.execute(request).await;
    Json(result).into_response()
}
