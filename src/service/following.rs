//! Resources followed by local users
//!
//! A following starts in `Loading`, and every poll resolves the remote
//! document and settles on `Success` or `Failure`. Failed followings are
//! kept with their reason so they can be retried.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::user::UserService;
use crate::data::{FollowMethod, Following, FollowingStatus, User};
use crate::error::AppError;
use crate::federation::{Activity, LockRegistry, canonicalize_url};
use crate::tenancy::Tenant;

pub struct FollowingService {
    tenant: Arc<Tenant>,
    locks: Arc<LockRegistry>,
}

impl FollowingService {
    pub fn new(tenant: Arc<Tenant>, locks: Arc<LockRegistry>) -> Self {
        Self { tenant, locks }
    }

    /// Follow `url` and poll it once; an existing following is returned as is
    pub async fn start(
        &self,
        user: &User,
        url: &str,
        folder: Option<String>,
        method: FollowMethod,
    ) -> Result<Following, AppError> {
        let url = canonicalize_url(url)?;
        let folder = folder
            .map(|folder| folder.trim().to_string())
            .filter(|folder| !folder.is_empty());
        let following = Following::new(&user.id, &url, folder, method);

        let database = self.tenant.database();
        if !database.insert_following_if_absent(&following).await? {
            return database
                .get_following_by_url(&user.id, &url)
                .await?
                .ok_or(AppError::NotFound);
        }

        tracing::info!(user_id = %user.id, url = %url, method = %method, "Following started");
        self.poll(user, &following.id).await
    }

    /// Resolve the followed resource and record the outcome
    ///
    /// A failed resolution is not an error: the following moves to
    /// `Failure` and is returned.
    pub async fn poll(&self, user: &User, following_id: &str) -> Result<Following, AppError> {
        let database = self.tenant.database();
        let url = database
            .get_following(&user.id, following_id)
            .await?
            .ok_or(AppError::NotFound)?
            .url;

        let _guard = self.locks.acquire(&url).await;
        let mut following = database
            .get_following(&user.id, following_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if following.status != FollowingStatus::Loading {
            following.begin_poll()?;
            database.update_following(&following).await?;
        }

        match self.tenant.resolver().fetch(&following.url).await {
            Ok(document) => {
                if let Some(label) = document.label() {
                    following.label = label.to_string();
                }
                following.image_url = document.icon_url().map(str::to_string);
                following.inbox_url = document.inbox().map(str::to_string);
                following.mark_success(Utc::now())?;

                if following.method == FollowMethod::ActivityPub
                    && following.follow_activity_id.is_none()
                {
                    self.send_follow(user, &mut following, document.id()).await;
                }
            }
            Err(error) => {
                tracing::warn!(
                    following_id = %following.id,
                    url = %following.url,
                    error = %error,
                    "Following poll failed"
                );
                following.mark_failure(error.to_string(), Utc::now())?;
            }
        }

        database.update_following(&following).await?;
        Ok(following)
    }

    async fn send_follow(&self, user: &User, following: &mut Following, target_actor: &str) {
        let Some(inbox_url) = following.inbox_url.clone() else {
            tracing::debug!(url = %following.url, "Followed document has no inbox");
            return;
        };

        let result = async {
            let delivery = UserService::new(self.tenant.clone())
                .delivery_for(user.clone())
                .await?;
            delivery.send_follow(target_actor, &inbox_url).await
        }
        .await;

        match result {
            Ok(follow_id) => following.follow_activity_id = Some(follow_id),
            Err(error) => tracing::warn!(
                url = %following.url,
                error = %error,
                "Failed to send Follow"
            ),
        }
    }

    /// Stop following; an Undo is sent for followings we sent a Follow for
    pub async fn delete(&self, user: &User, following_id: &str) -> Result<(), AppError> {
        let database = self.tenant.database();
        let following = database
            .get_following(&user.id, following_id)
            .await?
            .ok_or(AppError::NotFound)?;

        {
            let _guard = self.locks.acquire(&following.url).await;
            if !database.delete_following(&user.id, following_id).await? {
                return Err(AppError::NotFound);
            }
        }
        tracing::info!(user_id = %user.id, url = %following.url, "Following deleted");

        if let (Some(follow_id), Some(inbox_url)) =
            (&following.follow_activity_id, &following.inbox_url)
        {
            let result = async {
                let delivery = UserService::new(self.tenant.clone())
                    .delivery_for(user.clone())
                    .await?;
                delivery
                    .send_undo_follow(follow_id, &following.url, inbox_url)
                    .await
            }
            .await;

            if let Err(error) = result {
                tracing::warn!(url = %following.url, error = %error, "Failed to send Undo");
            }
        }

        Ok(())
    }

    /// Re-poll `Poll` followings not polled within `max_age`; returns how
    /// many were polled
    pub async fn poll_due(&self, max_age: Duration) -> Result<usize, AppError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| AppError::Config(format!("Invalid poll interval: {}", e)))?;
        let due = self
            .tenant
            .database()
            .list_polls_due(Utc::now() - max_age)
            .await?;

        let users = UserService::new(self.tenant.clone());
        let mut polled = 0;
        for following in due {
            let result = async {
                let user = users.get(&following.user_id).await?;
                self.poll(&user, &following.id).await
            }
            .await;

            match result {
                Ok(_) => polled += 1,
                Err(error) => tracing::warn!(
                    following_id = %following.id,
                    error = %error,
                    "Scheduled poll failed"
                ),
            }
        }
        Ok(polled)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Following>, AppError> {
        self.tenant.database().list_followings(user_id).await
    }

    /// The following a Follow response refers to, looked up by sender
    async fn following_for_response(
        &self,
        user_id: &str,
        activity: &Activity,
    ) -> Result<Option<Following>, AppError> {
        let url = canonicalize_url(&activity.actor)?;
        self.tenant
            .database()
            .get_following_by_url(user_id, &url)
            .await
    }

    /// The remote side accepted our Follow
    pub async fn handle_accept(&self, user_id: &str, activity: &Activity) -> Result<(), AppError> {
        let Some(following) = self.following_for_response(user_id, activity).await? else {
            tracing::debug!(actor = %activity.actor, "Accept for unknown following");
            return Ok(());
        };

        let _guard = self.locks.acquire(&following.url).await;
        let database = self.tenant.database();
        let Some(mut following) = database.get_following(user_id, &following.id).await? else {
            return Ok(());
        };

        if following.status == FollowingStatus::Loading {
            following.mark_success(Utc::now())?;
            database.update_following(&following).await?;
            tracing::info!(url = %following.url, "Follow accepted");
        }
        Ok(())
    }

    /// The remote side rejected our Follow
    pub async fn handle_reject(&self, user_id: &str, activity: &Activity) -> Result<(), AppError> {
        let Some(following) = self.following_for_response(user_id, activity).await? else {
            tracing::debug!(actor = %activity.actor, "Reject for unknown following");
            return Ok(());
        };

        let _guard = self.locks.acquire(&following.url).await;
        let database = self.tenant.database();
        let Some(mut following) = database.get_following(user_id, &following.id).await? else {
            return Ok(());
        };

        match following.status {
            FollowingStatus::Failure => return Ok(()),
            FollowingStatus::Success => following.begin_poll()?,
            FollowingStatus::Loading => {}
        }
        following.mark_failure("Follow rejected", Utc::now())?;
        database.update_following(&following).await?;
        tracing::info!(url = %following.url, "Follow rejected");
        Ok(())
    }
}
