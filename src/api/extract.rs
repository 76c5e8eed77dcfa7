//! Request extractors
//!
//! Resolve the tenant a request is addressed to and, for the REST API,
//! the local user behind a bearer token.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Host},
    http::{HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::AppState;
use crate::data::User;
use crate::error::AppError;
use crate::service::UserService;
use crate::tenancy::{InFlightGuard, Tenant};

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

/// The tenant selected by the `Host` header
///
/// Holds the tenant's in-flight guard for the lifetime of the handler, so
/// a tenant being removed waits for this request before closing.
pub struct TenantRequest {
    guard: InFlightGuard,
}

impl TenantRequest {
    pub fn tenant(&self) -> &Arc<Tenant> {
        self.guard.tenant()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantRequest
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Host(host) = Host::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Validation("Missing Host header".to_string()))?;

        let state = AppState::from_ref(state);
        let tenant = state.registry.by_hostname(&host).await?;
        let guard = tenant.begin_request()?;
        Ok(Self { guard })
    }
}

/// A local user authenticated by API token
///
/// # Usage
/// ```ignore
/// async fn handler(AuthUser { tenant, user }: AuthUser) -> impl IntoResponse {
///     format!("Hello, {} on {}", user.username, tenant.tenant().hostname())
/// }
/// ```
pub struct AuthUser {
    pub tenant: TenantRequest,
    pub user: User,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tenant = TenantRequest::from_request_parts(parts, state).await?;
        let token = extract_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user = UserService::new(tenant.tenant().clone())
            .authenticate(&token)
            .await?;

        Ok(Self { tenant, user })
    }
}
