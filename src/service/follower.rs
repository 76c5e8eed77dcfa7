//! Followers of local users
//!
//! Handles the inbound Follow protocol: verify the target, consult the
//! block rules, record the follower under the actor's lock and answer
//! with an Accept.

use serde_json::Value;
use std::sync::Arc;

use super::rule::{FilterScope, RuleService, Verdict};
use super::user::UserService;
use crate::data::{EntityId, Follower, Rule, RuleBehavior, RuleType, User};
use crate::error::{AppError, ResultExt};
use crate::federation::{Activity, LockRegistry, document_icon_url, document_label};
use crate::tenancy::Tenant;

/// Result of handling a Follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    /// The actor already followed; nothing was sent
    AlreadyFollowing,
}

pub struct FollowerService {
    tenant: Arc<Tenant>,
    locks: Arc<LockRegistry>,
}

impl FollowerService {
    pub fn new(tenant: Arc<Tenant>, locks: Arc<LockRegistry>) -> Self {
        Self { tenant, locks }
    }

    /// Handle a Follow addressed to `user`
    ///
    /// # Errors
    /// - `Validation` if the Follow's object is not this user's actor URL
    /// - `Forbidden` if a block rule matches the follower
    /// - resolver errors if the follower's actor document is unavailable
    pub async fn accept_follow(
        &self,
        user: &User,
        activity: &Activity,
    ) -> Result<FollowOutcome, AppError> {
        let target = activity
            .object_id()
            .and_then(|url| self.tenant.user_id_from_url(url));
        if target.as_deref() != Some(user.id.as_str()) {
            return Err(AppError::Validation(format!(
                "Follow object {} is not user {}",
                activity.object_id().unwrap_or("<none>"),
                user.id
            )));
        }

        let rules = RuleService::new(self.tenant.clone())
            .filter(&user.id, FilterScope::BlocksOnly)
            .await?;
        if rules.verdict(activity) == Verdict::Block {
            tracing::info!(user_id = %user.id, actor = %activity.actor, "Follow blocked by rule");
            return Err(AppError::Forbidden);
        }

        let inbox_url = {
            let _guard = self.locks.acquire(&activity.actor).await;
            let database = self.tenant.database();

            if database
                .get_follower_by_actor(&user.id, &activity.actor)
                .await?
                .is_some()
            {
                tracing::debug!(user_id = %user.id, actor = %activity.actor, "Duplicate Follow ignored");
                return Ok(FollowOutcome::AlreadyFollowing);
            }

            let document = self
                .tenant
                .resolver()
                .fetch(&activity.actor)
                .await
                .context(format!("Resolving follower {}", activity.actor))?;
            let inbox_url = document
                .inbox()
                .ok_or_else(|| {
                    AppError::Validation(format!("Actor {} has no inbox", activity.actor))
                })?
                .to_string();

            let follower = Follower {
                id: EntityId::new().0,
                user_id: user.id.clone(),
                actor_url: activity.actor.clone(),
                inbox_url: inbox_url.clone(),
                display_name: document.label().map(str::to_string),
                username: document.preferred_username().map(str::to_string),
                icon_url: document.icon_url().map(str::to_string),
                follow_activity_id: activity.id.clone(),
                created_at: chrono::Utc::now(),
            };

            if !database.insert_follower_if_absent(&follower).await? {
                return Ok(FollowOutcome::AlreadyFollowing);
            }

            tracing::info!(user_id = %user.id, actor = %activity.actor, "New follower");
            inbox_url
        };

        // The follower stays even if the Accept never arrives
        if let Err(error) = self.send_accept(user, activity, &inbox_url).await {
            tracing::warn!(
                user_id = %user.id,
                actor = %activity.actor,
                error = %error,
                "Failed to send Accept"
            );
        }

        Ok(FollowOutcome::Created)
    }

    async fn send_accept(
        &self,
        user: &User,
        activity: &Activity,
        inbox_url: &str,
    ) -> Result<(), AppError> {
        let delivery = UserService::new(self.tenant.clone())
            .delivery_for(user.clone())
            .await?;
        delivery.send_accept(activity.raw().clone(), inbox_url).await
    }

    /// Drop a follower by actor URL; true if one was removed
    pub async fn remove(&self, user_id: &str, actor_url: &str) -> Result<bool, AppError> {
        let _guard = self.locks.acquire(actor_url).await;
        let removed = self
            .tenant
            .database()
            .delete_follower_by_actor(user_id, actor_url)
            .await?;
        if removed {
            tracing::info!(user_id = %user_id, actor = %actor_url, "Follower removed");
        }
        Ok(removed)
    }

    /// Remove a follower and block the actor from following again
    pub async fn block(&self, user_id: &str, follower_id: &str) -> Result<Rule, AppError> {
        let follower = self
            .tenant
            .database()
            .get_follower(user_id, follower_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.remove(user_id, &follower.actor_url).await?;
        RuleService::new(self.tenant.clone())
            .create(
                user_id,
                RuleType::Actor,
                &follower.actor_url,
                RuleBehavior::Block,
                Some("Blocked follower".to_string()),
            )
            .await
    }

    /// Refresh follower snapshots from an updated actor document
    pub async fn refresh_profile(&self, actor: &Value) -> Result<u64, AppError> {
        let actor_url = actor
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Actor update has no id".to_string()))?;

        self.tenant.resolver().invalidate(actor_url).await;
        let updated = self
            .tenant
            .database()
            .update_follower_profile(
                actor_url,
                document_label(actor),
                actor.get("preferredUsername").and_then(Value::as_str),
                document_icon_url(actor),
            )
            .await?;

        tracing::debug!(actor = %actor_url, updated, "Follower profile refreshed");
        Ok(updated)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Follower>, AppError> {
        self.tenant.database().list_followers(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::tenancy::tenant_tests::open_tenant;
    use crate::test_support::{owner_with_keys, spawn_peer};
    use serde_json::json;
    use tempfile::TempDir;

    fn locks() -> Arc<LockRegistry> {
        Arc::new(LockRegistry::from_config(&LockConfig {
            max_idle_seconds: 60,
            max_entries: 100,
        }))
    }

    fn follow(actor: &str, object: &str) -> Activity {
        Activity::parse(json!({
            "id": format!("{}/follows/1", actor),
            "type": "Follow",
            "actor": actor,
            "object": object
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn follow_creates_follower_and_sends_one_accept() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());

        let activity = follow(&peer.actor_url("alice"), &tenant.user_url(&owner.id));
        assert_eq!(
            service.accept_follow(&owner, &activity).await.unwrap(),
            FollowOutcome::Created
        );
        assert_eq!(
            service.accept_follow(&owner, &activity).await.unwrap(),
            FollowOutcome::AlreadyFollowing
        );

        let followers = service.list(&owner.id).await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].inbox_url, format!("{}/inbox", peer.actor_url("alice")));
        assert_eq!(followers[0].display_name.as_deref(), Some("Remote alice"));

        let deliveries = peer.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0]["type"], "Accept");
        assert_eq!(deliveries[0]["object"]["type"], "Follow");
        assert_eq!(deliveries[0]["actor"], tenant.user_url(&owner.id));
    }

    #[tokio::test]
    async fn concurrent_follows_create_one_follower() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = Arc::new(FollowerService::new(tenant.clone(), locks()));
        let activity = follow(&peer.actor_url("bob"), &tenant.user_url(&owner.id));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let service = service.clone();
                let owner = owner.clone();
                let activity = activity.clone();
                tokio::spawn(async move { service.accept_follow(&owner, &activity).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() == FollowOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(service.list(&owner.id).await.unwrap().len(), 1);
        assert_eq!(peer.deliveries_of_type("Accept"), 1);
    }

    #[tokio::test]
    async fn follow_of_another_user_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());

        for object in [
            tenant.user_url("someone-else"),
            format!("https://bar.example/users/{}", owner.id),
        ] {
            let activity = follow(&peer.actor_url("carol"), &object);
            assert!(matches!(
                service.accept_follow(&owner, &activity).await,
                Err(AppError::Validation(_))
            ));
        }

        assert!(service.list(&owner.id).await.unwrap().is_empty());
        assert_eq!(peer.actor_fetches(), 0);
    }

    #[tokio::test]
    async fn blocked_actor_cannot_follow_but_muted_can() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());
        let rules = RuleService::new(tenant.clone());

        rules
            .create(&owner.id, RuleType::Actor, &peer.actor_url("dave"), RuleBehavior::Block, None)
            .await
            .unwrap();
        rules
            .create(&owner.id, RuleType::Actor, &peer.actor_url("erin"), RuleBehavior::Mute, None)
            .await
            .unwrap();

        let blocked = follow(&peer.actor_url("dave"), &tenant.user_url(&owner.id));
        assert!(matches!(
            service.accept_follow(&owner, &blocked).await,
            Err(AppError::Forbidden)
        ));

        let muted = follow(&peer.actor_url("erin"), &tenant.user_url(&owner.id));
        assert_eq!(
            service.accept_follow(&owner, &muted).await.unwrap(),
            FollowOutcome::Created
        );
        assert_eq!(service.list(&owner.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_actor_leaves_no_follower() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());

        let activity = follow(&peer.actor_url("missing"), &tenant.user_url(&owner.id));
        let error = service.accept_follow(&owner, &activity).await.unwrap_err();
        assert_eq!(error.kind(), crate::error::ErrorKind::NotFound);
        assert!(service.list(&owner.id).await.unwrap().is_empty());
        assert!(peer.deliveries().is_empty());
    }

    #[tokio::test]
    async fn block_removes_follower_and_records_rule() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());

        let activity = follow(&peer.actor_url("frank"), &tenant.user_url(&owner.id));
        service.accept_follow(&owner, &activity).await.unwrap();
        let follower = service.list(&owner.id).await.unwrap().remove(0);

        let rule = service.block(&owner.id, &follower.id).await.unwrap();
        assert_eq!(rule.rule_type, RuleType::Actor);
        assert_eq!(rule.behavior, RuleBehavior::Block);
        assert!(service.list(&owner.id).await.unwrap().is_empty());

        assert!(matches!(
            service.accept_follow(&owner, &activity).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service.block(&owner.id, &follower.id).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn profile_updates_rewrite_snapshots() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let owner = owner_with_keys(&tenant).await;
        let peer = spawn_peer().await;
        let service = FollowerService::new(tenant.clone(), locks());

        let actor_url = peer.actor_url("grace");
        let activity = follow(&actor_url, &tenant.user_url(&owner.id));
        service.accept_follow(&owner, &activity).await.unwrap();

        let updated = service
            .refresh_profile(&json!({
                "id": actor_url,
                "type": "Person",
                "name": "Grace H.",
                "preferredUsername": "grace",
                "icon": "https://cdn.example/grace.png"
            }))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let follower = service.list(&owner.id).await.unwrap().remove(0);
        assert_eq!(follower.display_name.as_deref(), Some("Grace H."));
        assert_eq!(follower.icon_url.as_deref(), Some("https://cdn.example/grace.png"));
    }
}
