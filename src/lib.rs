//! fedhost - A multi-tenant ActivityPub federation server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Host header -> tenant (DomainRegistry)                   │
//! │  - ActivityPub actor + inbox, REST API, metrics             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Federation + Service Layer                   │
//! │  - Activity router and inbox handlers                       │
//! │  - Follower/following state, rule filter                    │
//! │  - Resource locks, remote document resolver, delivery       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - One SQLite database per tenant (sqlx)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers and extractors
//! - `service`: Business logic layer
//! - `federation`: ActivityPub routing, locking, resolution and delivery
//! - `tenancy`: Domain registry and per-domain tenants
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;
pub mod tenancy;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use federation::{ActivityRouter, InboxContext, LockRegistry};
use tenancy::DomainRegistry;

/// Maximum accepted request body (1 MiB)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is shared.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Served domains
    pub registry: Arc<DomainRegistry>,

    /// Process-wide per-resource locks
    pub locks: Arc<LockRegistry>,

    /// Inbox routing table
    pub inbox: Arc<ActivityRouter<InboxContext>>,
}

impl AppState {
    pub fn new(config: Arc<config::AppConfig>, registry: Arc<DomainRegistry>) -> Self {
        let locks = Arc::new(LockRegistry::from_config(&config.locks));
        Self {
            config,
            registry,
            locks,
            inbox: Arc::new(federation::inbox_router()),
        }
    }
}

/// Shared outbound HTTP client
///
/// # Errors
/// Returns error if the TLS backend cannot be initialized
pub fn build_http_client(
    config: &config::FederationConfig,
) -> Result<reqwest::Client, error::AppError> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10).min(config.request_timeout()))
        .build()
        .map_err(|e| error::AppError::Internal(e.into()))
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::activitypub_router())
        .nest("/api/v1", api::rest_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
