//! REST API handlers.
//!
//! Each handler goes through the controller `State` and returns the JSON
//! envelope `{ success, data?, error? }`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, info};

use warmpool_controller::{ControllerError, RuntimeSummary};
use warmpool_core::RuntimeDefinition;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn controller_error(e: &ControllerError) -> Response {
    let status = match e.root() {
        ControllerError::DuplicateRuntime(_) => StatusCode::CONFLICT,
        ControllerError::RuntimeNotFound(_) | ControllerError::InstanceNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ControllerError::InvalidDefinition(_) => StatusCode::BAD_REQUEST,
        ControllerError::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// Runtime summary plus its pool listing.
#[derive(Serialize)]
pub struct RuntimeDetail {
    #[serde(flatten)]
    pub summary: RuntimeSummary,
    pub pools: Vec<String>,
}

// ── Runtimes ───────────────────────────────────────────────────

/// GET /api/v1/runtimes
pub async fn list_runtimes(State(api): State<ApiState>) -> Response {
    ApiResponse::ok(api.state.summaries()).into_response()
}

/// POST /api/v1/runtimes
pub async fn create_runtime(
    State(api): State<ApiState>,
    Json(definition): Json<RuntimeDefinition>,
) -> Response {
    let name = definition.name.clone();
    if let Err(e) = api.state.add_runtime(definition) {
        return controller_error(&e);
    }
    api.nudge.notify_one();

    match api.state.runtime(&name) {
        Ok(runtime) => (StatusCode::CREATED, ApiResponse::ok(runtime.summary())).into_response(),
        // Removed again between the two calls.
        Err(e) => controller_error(&e),
    }
}

/// GET /api/v1/runtimes/{runtime}
pub async fn get_runtime(State(api): State<ApiState>, Path(name): Path<String>) -> Response {
    match api.state.runtime(&name) {
        Ok(runtime) => ApiResponse::ok(RuntimeDetail {
            summary: runtime.summary(),
            pools: runtime.display(),
        })
        .into_response(),
        Err(e) => controller_error(&e),
    }
}

/// PUT /api/v1/runtimes/{runtime}
///
/// Accepted, not applied: the new size takes effect on the next cycle,
/// which this call requests.
pub async fn update_runtime(
    State(api): State<ApiState>,
    Path(name): Path<String>,
    Json(definition): Json<RuntimeDefinition>,
) -> Response {
    if definition.name != name {
        return error_response(
            &format!("definition name `{}` does not match path `{name}`", definition.name),
            StatusCode::BAD_REQUEST,
        );
    }

    match api.state.update_runtime(definition) {
        Ok(()) => {
            api.nudge.notify_one();
            info!(runtime = %name, "runtime update accepted");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({ "runtime": name, "status": "accepted" })),
            )
                .into_response()
        }
        Err(e) => controller_error(&e),
    }
}

/// DELETE /api/v1/runtimes/{runtime}
pub async fn delete_runtime(State(api): State<ApiState>, Path(name): Path<String>) -> Response {
    match api.state.remove_runtime(&name) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/runtimes/{runtime}/services/{id}
pub async fn get_instance(
    State(api): State<ApiState>,
    Path((runtime, id)): Path<(String, String)>,
) -> Response {
    match api.state.lookup(&runtime, &id) {
        Ok(view) => ApiResponse::ok(view).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// GET /api/v1/runtimes/{runtime}/routes
pub async fn get_routes(State(api): State<ApiState>, Path(runtime): Path<String>) -> Response {
    match api.state.routes(&runtime) {
        Ok(routes) => ApiResponse::ok(routes).into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Cycles ─────────────────────────────────────────────────────

/// POST /api/v1/reconcile
pub async fn reconcile(State(api): State<ApiState>) -> Response {
    api.nudge.notify_one();
    debug!("reconcile requested");
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({ "status": "scheduled" })),
    )
        .into_response()
}
