//! Inbound activity model
//!
//! Activities are parsed once from the delivered JSON into a typed
//! [`Activity`]. Handlers read fields through the accessors here instead of
//! poking at the raw document.

use serde_json::Value;
use std::fmt;

use crate::error::AppError;

/// Activity verb
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Like,
    Announce,
    /// Any verb without dedicated handling
    Other(String),
}

impl ActivityType {
    pub fn parse(s: &str) -> Self {
        match s {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Follow" => Self::Follow,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            "Undo" => Self::Undo,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Undo => "Undo",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of the activity's object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Note,
    Article,
    Page,
    Question,
    Person,
    Service,
    Application,
    Group,
    Organization,
    Follow,
    Tombstone,
    /// Object was referenced by URL only
    Unknown,
    Other(String),
}

impl ObjectType {
    pub fn parse(s: &str) -> Self {
        match s {
            "Note" => Self::Note,
            "Article" => Self::Article,
            "Page" => Self::Page,
            "Question" => Self::Question,
            "Person" => Self::Person,
            "Service" => Self::Service,
            "Application" => Self::Application,
            "Group" => Self::Group,
            "Organization" => Self::Organization,
            "Follow" => Self::Follow,
            "Tombstone" => Self::Tombstone,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Note => "Note",
            Self::Article => "Article",
            Self::Page => "Page",
            Self::Question => "Question",
            Self::Person => "Person",
            Self::Service => "Service",
            Self::Application => "Application",
            Self::Group => "Group",
            Self::Organization => "Organization",
            Self::Follow => "Follow",
            Self::Tombstone => "Tombstone",
            Self::Unknown => "Unknown",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity's object: a bare reference or an embedded document
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    Url(String),
    Document(Value),
}

/// A parsed inbound activity
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: Option<String>,
    pub activity_type: ActivityType,
    pub actor: String,
    pub object: ObjectRef,
    pub object_type: ObjectType,
    raw: Value,
}

/// Read an id from either `"url"` or `{"id": "url"}`
fn id_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        _ => None,
    }
}

impl Activity {
    /// Parse a delivered activity
    ///
    /// # Errors
    /// `Validation` if `type`, `actor` or `object` is missing or malformed
    pub fn parse(raw: Value) -> Result<Self, AppError> {
        let activity_type = raw
            .get("type")
            .and_then(Value::as_str)
            .map(ActivityType::parse)
            .ok_or_else(|| AppError::Validation("Activity has no type".to_string()))?;

        let actor = raw
            .get("actor")
            .and_then(id_of)
            .filter(|actor| !actor.is_empty())
            .ok_or_else(|| AppError::Validation("Activity has no actor".to_string()))?
            .to_string();

        let (object, object_type) = match raw.get("object") {
            Some(Value::String(url)) if !url.is_empty() => {
                (ObjectRef::Url(url.clone()), ObjectType::Unknown)
            }
            Some(document @ Value::Object(map)) => {
                let object_type = map
                    .get("type")
                    .and_then(Value::as_str)
                    .map(ObjectType::parse)
                    .unwrap_or(ObjectType::Unknown);
                (ObjectRef::Document(document.clone()), object_type)
            }
            _ => {
                return Err(AppError::Validation(
                    "Activity has no usable object".to_string(),
                ));
            }
        };

        Ok(Self {
            id: raw.get("id").and_then(Value::as_str).map(str::to_string),
            activity_type,
            actor,
            object,
            object_type,
            raw,
        })
    }

    /// The JSON as delivered
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Object URL, whether embedded or referenced
    pub fn object_id(&self) -> Option<&str> {
        match &self.object {
            ObjectRef::Url(url) => Some(url),
            ObjectRef::Document(document) => id_of(document),
        }
    }

    pub fn object_document(&self) -> Option<&Value> {
        match &self.object {
            ObjectRef::Url(_) => None,
            ObjectRef::Document(document) => Some(document),
        }
    }

    /// A string field of the embedded object
    pub fn object_str(&self, field: &str) -> Option<&str> {
        self.object_document()?.get(field).and_then(Value::as_str)
    }

    /// Author of the embedded object (`attributedTo`)
    pub fn attributed_to(&self) -> Option<&str> {
        let value = self.object_document()?.get("attributedTo")?;
        match value {
            Value::Array(items) => items.iter().find_map(id_of),
            other => id_of(other),
        }
    }

    /// For activities wrapping another activity (Undo, Accept, Reject),
    /// the `object` of the inner activity
    pub fn inner_object_id(&self) -> Option<&str> {
        self.object_document()?.get("object").and_then(id_of)
    }

    /// Text fields a content rule can match against
    pub fn searchable_text(&self) -> impl Iterator<Item = &str> {
        ["content", "summary", "name"]
            .into_iter()
            .filter_map(move |field| self.object_str(field))
    }
}
