//! API handlers.
//!
//! Each handler goes through the lifecycle manager and returns JSON in the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use arboretum_lifecycle::{DestroyOutcome, LifecycleError};
use arboretum_state::Stamp;

use crate::ApiState;

/// Lifetime requested when the body does not name one.
pub const DEFAULT_LIFETIME: &str = "8 hours";

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

fn lifecycle_error(e: &LifecycleError) -> Response {
    let status = match e {
        LifecycleError::Validation(_) | LifecycleError::Render(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Conflict(_) => StatusCode::CONFLICT,
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::Provider(_) | LifecycleError::Transfer(_) | LifecycleError::Probe(_) => {
            StatusCode::BAD_GATEWAY
        }
        LifecycleError::MalformedIndex { .. } | LifecycleError::State(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

// ── Groups ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct GroupsQuery {
    #[serde(default)]
    pub active: bool,
}

/// GET /groups
pub async fn list_groups(
    State(state): State<ApiState>,
    Query(query): Query<GroupsQuery>,
) -> Response {
    match state.manager.list_groups(query.active) {
        Ok(listings) => ApiResponse::ok(listings).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

/// GET /groups/{name}
pub async fn get_group(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.manager.list_groups(false) {
        Ok(listings) => match listings.into_iter().find(|l| l.group_name == name) {
            Some(listing) => ApiResponse::ok(listing).into_response(),
            None => error_response("group not found", StatusCode::NOT_FOUND),
        },
        Err(e) => lifecycle_error(&e),
    }
}

// ── Branches ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateBranchRequest {
    pub lifetime: Option<String>,
}

/// POST /groups/{name}/branch
pub async fn create_branch(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Option<Json<CreateBranchRequest>>,
) -> Response {
    let lifetime = body
        .and_then(|Json(req)| req.lifetime)
        .unwrap_or_else(|| DEFAULT_LIFETIME.to_string());
    match state.manager.create(&name, &lifetime).await {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        Err(e) => lifecycle_error(&e),
    }
}

#[derive(Debug, Serialize)]
struct Destroyed {
    provider_confirmed: bool,
}

/// DELETE /groups/{name}/branch
pub async fn destroy_branch(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.manager.destroy(&name).await {
        Ok(DestroyOutcome::Destroyed { provider_confirmed }) => {
            ApiResponse::ok(Destroyed { provider_confirmed }).into_response()
        }
        Ok(DestroyOutcome::NotFound) => error_response("branch not found", StatusCode::NOT_FOUND),
        Err(e) => lifecycle_error(&e),
    }
}

// ── Stamp ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StampBody {
    stamp: Stamp,
}

/// GET /stamp
pub async fn get_stamp(State(state): State<ApiState>) -> Response {
    match state.manager.store().stamp() {
        Ok(stamp) => ApiResponse::ok(StampBody { stamp }).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
