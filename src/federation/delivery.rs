//! Activity delivery
//!
//! Sends signed activities from a local actor to remote inboxes.

use crate::error::AppError;

/// Activity delivery service
///
/// Sends activities to remote inbox endpoints on behalf of one local actor.
#[derive(Clone)]
pub struct ActivityDelivery {
    http_client: reqwest::Client,
    /// Local actor URI
    actor_uri: String,
    /// Key ID for signatures
    key_id: String,
    /// Private key for signing
    private_key_pem: String,
}

impl std::fmt::Debug for ActivityDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDelivery")
            .field("actor_uri", &self.actor_uri)
            .field("key_id", &self.key_id)
            .finish()
    }
}

fn activity_type_of(activity: &serde_json::Value) -> &str {
    activity
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("Unknown")
}

impl ActivityDelivery {
    pub fn new(
        http_client: reqwest::Client,
        actor_uri: String,
        key_id: String,
        private_key_pem: String,
    ) -> Self {
        Self {
            http_client,
            actor_uri,
            key_id,
            private_key_pem,
        }
    }

    pub fn actor_uri(&self) -> &str {
        &self.actor_uri
    }

    /// Deliver activity to a single inbox
    ///
    /// # Errors
    /// Returns error if signing fails, the request fails or the inbox
    /// answers with a non-success status
    pub async fn deliver_to_inbox(
        &self,
        inbox_uri: &str,
        activity: serde_json::Value,
    ) -> Result<(), AppError> {
        let activity_type = activity_type_of(&activity).to_string();
        let result = self.post_signed(inbox_uri, &activity).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        crate::metrics::ACTIVITIES_SENT
            .with_label_values(&[activity_type.as_str(), status])
            .inc();

        match &result {
            Ok(()) => tracing::info!(
                activity_type = %activity_type,
                inbox = %inbox_uri,
                "Delivered activity"
            ),
            Err(error) => tracing::warn!(
                activity_type = %activity_type,
                inbox = %inbox_uri,
                error = %error,
                "Activity delivery failed"
            ),
        }

        result
    }

    async fn post_signed(
        &self,
        inbox_uri: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to serialize activity: {}", e)))?;

        let sig_headers = super::signature::sign_request(
            "POST",
            inbox_uri,
            Some(&body),
            &self.private_key_pem,
            &self.key_id,
        )?;

        let mut request = self
            .http_client
            .post(inbox_uri)
            .header("Content-Type", "application/activity+json")
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Remote {
                url: inbox_uri.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    fn new_activity_id(&self, kind: &str) -> String {
        format!(
            "{}/{}/{}",
            self.actor_uri,
            kind,
            crate::data::EntityId::new().0
        )
    }

    /// Send a Follow; returns the Follow activity id
    pub async fn send_follow(
        &self,
        target_actor_uri: &str,
        target_inbox_uri: &str,
    ) -> Result<String, AppError> {
        let follow_id = self.new_activity_id("follow");
        let activity = builder::follow(&follow_id, &self.actor_uri, target_actor_uri);

        self.deliver_to_inbox(target_inbox_uri, activity).await?;
        Ok(follow_id)
    }

    /// Send an Accept wrapping the received Follow
    pub async fn send_accept(
        &self,
        follow: serde_json::Value,
        follower_inbox_uri: &str,
    ) -> Result<(), AppError> {
        let accept_id = self.new_activity_id("accept");
        let activity = builder::accept(&accept_id, &self.actor_uri, follow);

        self.deliver_to_inbox(follower_inbox_uri, activity).await
    }

    /// Send an Undo of a Follow we sent earlier
    pub async fn send_undo_follow(
        &self,
        follow_activity_uri: &str,
        target_actor_uri: &str,
        target_inbox_uri: &str,
    ) -> Result<(), AppError> {
        let undo_id = self.new_activity_id("undo");
        let activity = builder::undo(
            &undo_id,
            &self.actor_uri,
            builder::follow(follow_activity_uri, &self.actor_uri, target_actor_uri),
        );

        self.deliver_to_inbox(target_inbox_uri, activity).await
    }
}

/// Activity builders
pub mod builder {
    use serde_json::Value;

    const CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

    /// Build a Follow activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (follower)
    /// * `object` - Object URI (followee)
    pub fn follow(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Follow",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Accept activity
    ///
    /// `object` is the accepted activity, usually the received Follow.
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": strip_context(object)
        })
    }

    /// Build an Undo activity
    pub fn undo(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": CONTEXT,
            "type": "Undo",
            "id": id,
            "actor": actor,
            "object": strip_context(object)
        })
    }

    fn strip_context(mut object: Value) -> Value {
        if let Some(map) = object.as_object_mut() {
            map.remove("@context");
        }
        object
    }
}
