//! ActivityPub federation module
//!
//! Handles:
//! - Inbound activity parsing and routing
//! - Inbox handlers
//! - Per-resource locking
//! - Remote document resolution and caching
//! - Signed delivery of outbound activities

mod activity;
mod delivery;
mod inbox;
mod locks;
mod resolver;
mod router;
mod signature;

pub use activity::{Activity, ActivityType, ObjectRef, ObjectType};
pub use delivery::{ActivityDelivery, builder};
pub use inbox::{InboxContext, inbox_router};
pub use locks::{Clock, LockRegistry, ManualClock, ResourceGuard, SystemClock};
pub use resolver::{
    CacheStats, DocumentResolver, RemoteDocument, RequestSigner, canonicalize_url,
    document_icon_url, document_label,
};
pub use router::{ActivityRouter, Pattern};
pub use signature::{KeyPair, SignatureHeaders, generate_digest, generate_key_pair, sign_request};
