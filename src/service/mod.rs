//! Service layer
//!
//! Business logic separated from HTTP and inbox handlers. Services are
//! cheap to construct per request from a tenant handle.

mod follower;
mod following;
mod message;
mod rule;
mod user;

pub use follower::{FollowOutcome, FollowerService};
pub use following::FollowingService;
pub use message::MessageService;
pub use rule::{FilterScope, RuleFilter, RuleService, Verdict};
pub use user::{UserService, generate_api_token, hash_api_token};
