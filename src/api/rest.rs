//! REST API for tenant users
//!
//! Authenticated with a per-user bearer token. All resources are scoped to
//! the token's user within the tenant chosen by `Host`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;

use super::extract::AuthUser;
use crate::AppState;
use crate::data::{FollowMethod, Follower, Following, InboxMessage, Rule, RuleBehavior, RuleType};
use crate::error::AppError;
use crate::service::{FollowerService, FollowingService, MessageService, RuleService};

/// Create REST router
///
/// Routes (mounted under `/api/v1`):
/// - GET/POST /followings, POST /followings/:id/poll, DELETE /followings/:id
/// - GET/POST /rules, DELETE /rules/:id
/// - GET /followers, DELETE /followers/:id
/// - GET /messages, POST /messages/:id/mute, POST /messages/:id/unmute
pub fn rest_router() -> Router<AppState> {
    Router::new()
        .route("/followings", get(list_followings).post(create_following))
        .route("/followings/:id", delete(delete_following))
        .route("/followings/:id/poll", post(poll_following))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/:id", delete(delete_rule))
        .route("/followers", get(list_followers))
        .route("/followers/:id", delete(block_follower))
        .route("/messages", get(list_messages))
        .route("/messages/:id/mute", post(mute_message))
        .route("/messages/:id/unmute", post(unmute_message))
}

// =============================================================================
// Followings
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateFollowingRequest {
    url: String,
    folder: Option<String>,
    #[serde(default = "default_method")]
    method: FollowMethod,
}

fn default_method() -> FollowMethod {
    FollowMethod::ActivityPub
}

async fn list_followings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Following>>, AppError> {
    let service = FollowingService::new(auth.tenant.tenant().clone(), state.locks.clone());
    Ok(Json(service.list(&auth.user.id).await?))
}

async fn create_following(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateFollowingRequest>,
) -> Result<(StatusCode, Json<Following>), AppError> {
    let service = FollowingService::new(auth.tenant.tenant().clone(), state.locks.clone());
    let following = service
        .start(&auth.user, &request.url, request.folder, request.method)
        .await?;
    Ok((StatusCode::CREATED, Json(following)))
}

async fn poll_following(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Following>, AppError> {
    let service = FollowingService::new(auth.tenant.tenant().clone(), state.locks.clone());
    Ok(Json(service.poll(&auth.user, &id).await?))
}

async fn delete_following(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let service = FollowingService::new(auth.tenant.tenant().clone(), state.locks.clone());
    service.delete(&auth.user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    rule_type: RuleType,
    trigger: String,
    behavior: RuleBehavior,
    comment: Option<String>,
}

async fn list_rules(auth: AuthUser) -> Result<Json<Vec<Rule>>, AppError> {
    let service = RuleService::new(auth.tenant.tenant().clone());
    Ok(Json(service.list(&auth.user.id).await?))
}

async fn create_rule(
    auth: AuthUser,
    Json(request): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), AppError> {
    let service = RuleService::new(auth.tenant.tenant().clone());
    let rule = service
        .create(
            &auth.user.id,
            request.rule_type,
            &request.trigger,
            request.behavior,
            request.comment,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn delete_rule(auth: AuthUser, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    RuleService::new(auth.tenant.tenant().clone())
        .delete(&auth.user.id, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Followers
// =============================================================================

async fn list_followers(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Follower>>, AppError> {
    let service = FollowerService::new(auth.tenant.tenant().clone(), state.locks.clone());
    Ok(Json(service.list(&auth.user.id).await?))
}

/// Removing a follower blocks it
async fn block_follower(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Rule>, AppError> {
    let service = FollowerService::new(auth.tenant.tenant().clone(), state.locks.clone());
    Ok(Json(service.block(&auth.user.id, &id).await?))
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    limit: Option<i64>,
}

async fn list_messages(
    auth: AuthUser,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<InboxMessage>>, AppError> {
    let service = MessageService::new(auth.tenant.tenant().clone());
    Ok(Json(service.list(&auth.user.id, query.limit).await?))
}

async fn mute_message(auth: AuthUser, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    MessageService::new(auth.tenant.tenant().clone())
        .set_muted(&auth.user.id, &id, true)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unmute_message(auth: AuthUser, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    MessageService::new(auth.tenant.tenant().clone())
        .set_muted(&auth.user.id, &id, false)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
