//! Inbox messages
//!
//! Posts delivered to a local user. Remote HTML is sanitized before it is
//! stored.

use std::sync::Arc;

use crate::data::{EntityId, InboxMessage};
use crate::error::AppError;
use crate::federation::Activity;
use crate::tenancy::Tenant;

const DEFAULT_LIST_LIMIT: i64 = 40;
const MAX_LIST_LIMIT: i64 = 200;

pub struct MessageService {
    tenant: Arc<Tenant>,
}

impl MessageService {
    pub fn new(tenant: Arc<Tenant>) -> Self {
        Self { tenant }
    }

    /// Store the object of a Create or Announce
    ///
    /// Returns false when the message was already stored.
    pub async fn store(
        &self,
        user_id: &str,
        activity: &Activity,
        muted: bool,
    ) -> Result<bool, AppError> {
        let url = activity
            .object_id()
            .ok_or_else(|| AppError::Validation("Activity object has no id".to_string()))?;
        let content = activity
            .object_str("content")
            .map(ammonia::clean)
            .unwrap_or_default();

        let message = InboxMessage {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            url: url.to_string(),
            actor_url: activity.actor.clone(),
            object_type: activity.object_type.to_string(),
            content,
            muted,
            received_at: chrono::Utc::now(),
        };

        let stored = self
            .tenant
            .database()
            .insert_message_if_absent(&message)
            .await?;
        tracing::debug!(user_id = %user_id, url = %url, muted, stored, "Inbox message");
        Ok(stored)
    }

    /// Delete a message, but only if `actor_url` sent it
    pub async fn delete_by_author(
        &self,
        user_id: &str,
        url: &str,
        actor_url: &str,
    ) -> Result<bool, AppError> {
        self.tenant
            .database()
            .delete_message_by_url_and_actor(user_id, url, actor_url)
            .await
    }

    pub async fn set_muted(&self, user_id: &str, message_id: &str, muted: bool) -> Result<(), AppError> {
        if !self
            .tenant
            .database()
            .set_message_muted(user_id, message_id, muted)
            .await?
        {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Newest first
    pub async fn list(&self, user_id: &str, limit: Option<i64>) -> Result<Vec<InboxMessage>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.tenant.database().list_messages(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::tenant_tests::open_tenant;
    use serde_json::json;
    use tempfile::TempDir;

    fn create(actor: &str, content: &str) -> Activity {
        Activity::parse(json!({
            "type": "Create",
            "actor": actor,
            "object": {
                "id": "https://remote.example/notes/1",
                "type": "Note",
                "content": content
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn stores_sanitized_content_once() {
        let dir = TempDir::new().unwrap();
        let messages = MessageService::new(open_tenant("foo.example", &dir).await);
        let activity = create(
            "https://remote.example/users/alice",
            "<p>hi</p><script>alert(1)</script>",
        );

        assert!(messages.store("u1", &activity, false).await.unwrap());
        assert!(!messages.store("u1", &activity, false).await.unwrap());

        let stored = messages.list("u1", None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "<p>hi</p>");
        assert_eq!(stored[0].object_type, "Note");
    }

    #[tokio::test]
    async fn only_the_author_deletes() {
        let dir = TempDir::new().unwrap();
        let messages = MessageService::new(open_tenant("foo.example", &dir).await);
        let activity = create("https://remote.example/users/alice", "hi");
        messages.store("u1", &activity, false).await.unwrap();

        assert!(
            !messages
                .delete_by_author("u1", "https://remote.example/notes/1", "https://remote.example/users/mallory")
                .await
                .unwrap()
        );
        assert!(
            messages
                .delete_by_author("u1", "https://remote.example/notes/1", "https://remote.example/users/alice")
                .await
                .unwrap()
        );
        assert!(messages.list("u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mute_toggles_existing_messages_only() {
        let dir = TempDir::new().unwrap();
        let messages = MessageService::new(open_tenant("foo.example", &dir).await);
        messages
            .store("u1", &create("https://remote.example/users/alice", "hi"), false)
            .await
            .unwrap();
        let id = messages.list("u1", None).await.unwrap()[0].id.clone();

        messages.set_muted("u1", &id, true).await.unwrap();
        assert!(messages.list("u1", None).await.unwrap()[0].muted);

        assert!(matches!(
            messages.set_muted("u2", &id, true).await,
            Err(AppError::NotFound)
        ));
    }
}
