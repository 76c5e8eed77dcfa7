//! Data models
//!
//! Rust structs representing tenant database records.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements `as_str`, `Display` and `FromStr` for a unit enum stored as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(AppError::Validation(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// =============================================================================
// User
// =============================================================================

/// A local account inside one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    /// RSA private key (PEM format), generated on first signed delivery
    #[serde(skip_serializing)]
    pub private_key_pem: Option<String>,
    /// RSA public key (PEM format)
    pub public_key_pem: Option<String>,
    /// Hash of the REST API bearer token
    #[serde(skip_serializing)]
    pub api_token_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id: EntityId::new().0,
            username: username.into(),
            display_name,
            private_key_pem: None,
            public_key_pem: None,
            api_token_hash: None,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Follower
// =============================================================================

/// A remote actor following a local user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follower {
    pub id: String,
    /// Local user being followed
    pub user_id: String,
    /// Remote actor URL
    pub actor_url: String,
    /// Inbox the Accept (and later deliveries) go to
    pub inbox_url: String,
    /// Display metadata snapshot taken from the actor document
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    /// ID of the Follow activity that created this record
    pub follow_activity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Following
// =============================================================================

/// How updates from a followed resource arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowMethod {
    /// Remote server pushes activities to our inbox
    #[serde(rename = "ACTIVITYPUB")]
    ActivityPub,
    /// We re-fetch the resource periodically
    #[serde(rename = "POLL")]
    Poll,
}

text_enum!(FollowMethod {
    ActivityPub => "ACTIVITYPUB",
    Poll => "POLL",
});

/// Resolution status of a [`Following`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FollowingStatus {
    Loading,
    Success,
    Failure,
}

text_enum!(FollowingStatus {
    Loading => "LOADING",
    Success => "SUCCESS",
    Failure => "FAILURE",
});

impl FollowingStatus {
    /// Allowed moves: `Loading -> {Success, Failure}` and back to
    /// `Loading` from either outcome.
    pub fn can_transition_to(self, next: FollowingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Loading, Self::Success)
                | (Self::Loading, Self::Failure)
                | (Self::Success, Self::Loading)
                | (Self::Failure, Self::Loading)
        )
    }
}

/// A local user following a remote (or local) resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Following {
    pub id: String,
    pub user_id: String,
    /// URL of the followed resource
    pub url: String,
    /// Human-friendly label, refreshed from the resolved document
    pub label: String,
    /// Folder the followed items are grouped into
    pub folder: Option<String>,
    pub method: FollowMethod,
    pub status: FollowingStatus,
    /// Last failure reason, kept so the UI can show it
    pub status_message: Option<String>,
    pub image_url: Option<String>,
    pub inbox_url: Option<String>,
    /// ID of the Follow activity we sent, if any
    pub follow_activity_id: Option<String>,
    pub last_polled: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Following {
    pub fn new(
        user_id: impl Into<String>,
        url: impl Into<String>,
        folder: Option<String>,
        method: FollowMethod,
    ) -> Self {
        let url = url.into();
        Self {
            id: EntityId::new().0,
            user_id: user_id.into(),
            label: url.clone(),
            url,
            folder,
            method,
            status: FollowingStatus::Loading,
            status_message: None,
            image_url: None,
            inbox_url: None,
            follow_activity_id: None,
            last_polled: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: FollowingStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "Following {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Re-poll: either outcome returns to `Loading`
    pub fn begin_poll(&mut self) -> Result<(), AppError> {
        self.transition(FollowingStatus::Loading)
    }

    /// Resolution succeeded
    pub fn mark_success(&mut self, polled_at: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(FollowingStatus::Success)?;
        self.status_message = None;
        self.last_polled = Some(polled_at);
        Ok(())
    }

    /// Resolution failed; the record and the reason are both kept
    pub fn mark_failure(
        &mut self,
        reason: impl Into<String>,
        polled_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.transition(FollowingStatus::Failure)?;
        self.status_message = Some(reason.into());
        self.last_polled = Some(polled_at);
        Ok(())
    }
}

// =============================================================================
// Rule
// =============================================================================

/// Who created a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    /// Created directly by the owner
    #[serde(rename = "INTERNAL")]
    Internal,
    /// Imported from a federated server
    #[serde(rename = "ACTIVITYPUB")]
    ActivityPub,
}

text_enum!(RuleSource {
    Internal => "INTERNAL",
    ActivityPub => "ACTIVITYPUB",
});

/// What a rule's trigger is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    /// Exact actor URL
    #[serde(rename = "ACTOR")]
    Actor,
    /// Domain or URL prefix
    #[serde(rename = "URL")]
    UrlPrefix,
    /// Phrase or hashtag in the content
    #[serde(rename = "CONTENT")]
    Content,
    /// Delegated to an external block service
    #[serde(rename = "EXTERNAL")]
    External,
}

text_enum!(RuleType {
    Actor => "ACTOR",
    UrlPrefix => "URL",
    Content => "CONTENT",
    External => "EXTERNAL",
});

impl RuleType {
    /// Higher wins when several rules match the same activity
    pub fn specificity(self) -> u8 {
        match self {
            Self::Actor => 3,
            Self::UrlPrefix => 2,
            Self::Content => 1,
            Self::External => 0,
        }
    }
}

/// What happens to matching activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleBehavior {
    Block,
    Mute,
    Allow,
}

text_enum!(RuleBehavior {
    Block => "BLOCK",
    Mute => "MUTE",
    Allow => "ALLOW",
});

impl RuleBehavior {
    /// Block = 2, Mute = 1, Allow = 0
    pub fn restrictiveness(self) -> u8 {
        match self {
            Self::Block => 2,
            Self::Mute => 1,
            Self::Allow => 0,
        }
    }
}

/// A user-owned filter applied to inbound activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub user_id: String,
    pub source: RuleSource,
    pub rule_type: RuleType,
    pub trigger: String,
    pub behavior: RuleBehavior,
    pub comment: Option<String>,
    pub is_public: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(
        user_id: impl Into<String>,
        rule_type: RuleType,
        trigger: impl Into<String>,
        behavior: RuleBehavior,
    ) -> Self {
        Self {
            id: EntityId::new().0,
            user_id: user_id.into(),
            source: RuleSource::Internal,
            rule_type,
            trigger: trigger.into(),
            behavior,
            comment: None,
            is_public: false,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Inbox
// =============================================================================

/// A received post kept in a user's inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub user_id: String,
    /// Object URL (unique per user)
    pub url: String,
    pub actor_url: String,
    pub object_type: String,
    /// Sanitized HTML content
    pub content: String,
    /// Hidden by a Mute rule or by the user
    pub muted: bool,
    pub received_at: DateTime<Utc>,
}
