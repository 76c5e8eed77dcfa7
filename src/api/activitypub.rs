//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use super::extract::TenantRequest;
use crate::AppState;
use crate::error::AppError;
use crate::federation::{Activity, InboxContext};
use crate::service::UserService;

const ACTIVITY_JSON: &str = "application/activity+json";

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:id - Actor profile
/// - POST /users/:id/inbox - Personal inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(actor))
        .route("/users/:id/inbox", post(inbox))
}

/// GET /users/:id
///
/// Content-Type: application/activity+json
async fn actor(request: TenantRequest, Path(user_id): Path<String>) -> Result<Response, AppError> {
    let users = UserService::new(request.tenant().clone());
    let user = users.get(&user_id).await?;
    let document = users.actor_document(&user);

    Ok((
        [(header::CONTENT_TYPE, ACTIVITY_JSON)],
        axum::Json(document),
    )
        .into_response())
}

/// POST /users/:id/inbox
///
/// # Steps
/// 1. Resolve the tenant and the addressed user
/// 2. Parse the activity
/// 3. Dispatch it through the inbox router
///
/// Signature verification happens in front of this service.
async fn inbox(
    State(state): State<AppState>,
    request: TenantRequest,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let tenant = request.tenant().clone();
    let user = UserService::new(tenant.clone()).get(&user_id).await?;

    let raw: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid activity JSON: {}", e)))?;
    let activity = Activity::parse(raw)?;

    tracing::debug!(
        hostname = %tenant.hostname(),
        user_id = %user.id,
        activity_type = %activity.activity_type,
        actor = %activity.actor,
        "Inbound activity"
    );

    let ctx = InboxContext {
        tenant,
        user,
        locks: state.locks.clone(),
    };
    state.inbox.dispatch(ctx, activity).await?;

    Ok(StatusCode::ACCEPTED)
}
