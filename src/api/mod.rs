//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (actor documents and inboxes)
//! - REST API for tenant users
//! - Metrics (Prometheus)
//!
//! Every tenant-scoped handler resolves its tenant from the `Host` header
//! through [`TenantRequest`].

mod activitypub;
mod extract;
pub mod metrics;
mod rest;

pub use activitypub::activitypub_router;
pub use extract::{AuthUser, TenantRequest};
pub use metrics::metrics_router;
pub use rest::rest_router;
