//! Inbox handlers
//!
//! The default routing table for activities delivered to a local user's
//! inbox. Each handler gets an [`InboxContext`] naming the tenant and the
//! addressed user.

use std::sync::Arc;

use super::activity::{Activity, ActivityType, ObjectType};
use super::locks::LockRegistry;
use super::router::{ActivityRouter, Pattern};
use crate::data::User;
use crate::error::Result;
use crate::service::{
    FilterScope, FollowerService, FollowingService, MessageService, RuleService, Verdict,
};
use crate::tenancy::Tenant;

/// Who an inbound activity was delivered to
#[derive(Clone)]
pub struct InboxContext {
    pub tenant: Arc<Tenant>,
    pub user: User,
    pub locks: Arc<LockRegistry>,
}

impl InboxContext {
    fn followers(&self) -> FollowerService {
        FollowerService::new(self.tenant.clone(), self.locks.clone())
    }

    fn followings(&self) -> FollowingService {
        FollowingService::new(self.tenant.clone(), self.locks.clone())
    }

    async fn verdict(&self, activity: &Activity) -> Result<Verdict> {
        let rules = RuleService::new(self.tenant.clone())
            .filter(&self.user.id, FilterScope::All)
            .await?;
        Ok(rules.verdict(activity))
    }
}

/// Router with every inbox handler registered
pub fn inbox_router() -> ActivityRouter<InboxContext> {
    use ActivityType as A;
    use ObjectType as O;
    use Pattern::{Any, Exact};

    let mut router = ActivityRouter::new();
    router
        .register(Exact(A::Follow), Any, on_follow)
        .register(Exact(A::Undo), Exact(O::Follow), on_undo_follow)
        .register(Exact(A::Undo), Exact(O::Unknown), on_undo_by_reference)
        .register(Exact(A::Accept), Exact(O::Follow), on_accept_follow)
        .register(Exact(A::Accept), Exact(O::Unknown), on_accept_follow)
        .register(Exact(A::Reject), Exact(O::Follow), on_reject_follow)
        .register(Exact(A::Reject), Exact(O::Unknown), on_reject_follow)
        .register(Exact(A::Create), Any, on_create)
        .register(Exact(A::Announce), Any, on_create)
        .register(Exact(A::Delete), Any, on_delete)
        .register(Exact(A::Like), Any, on_like);

    for actor_type in [O::Person, O::Service, O::Application, O::Group, O::Organization] {
        router.register(Exact(A::Update), Exact(actor_type), on_update_actor);
    }

    router
}

async fn on_follow(ctx: InboxContext, activity: Activity) -> Result<()> {
    let outcome = ctx.followers().accept_follow(&ctx.user, &activity).await?;
    tracing::debug!(actor = %activity.actor, ?outcome, "Follow handled");
    Ok(())
}

async fn on_undo_follow(ctx: InboxContext, activity: Activity) -> Result<()> {
    let target = activity
        .inner_object_id()
        .and_then(|url| ctx.tenant.user_id_from_url(url));
    if target.as_deref() != Some(ctx.user.id.as_str()) {
        tracing::debug!(actor = %activity.actor, "Undo of a Follow for someone else ignored");
        return Ok(());
    }

    // Only the follower itself can undo its follow
    ctx.followers().remove(&ctx.user.id, &activity.actor).await?;
    Ok(())
}

/// Undo naming its object only by URL; honoured when that URL is the
/// Follow recorded for this sender
async fn on_undo_by_reference(ctx: InboxContext, activity: Activity) -> Result<()> {
    let Some(undone) = activity.object_id() else {
        return Ok(());
    };
    let follower = ctx
        .tenant
        .database()
        .get_follower_by_actor(&ctx.user.id, &activity.actor)
        .await?;
    let recorded = follower.as_ref().and_then(|f| f.follow_activity_id.as_deref());
    if recorded != Some(undone) {
        tracing::debug!(actor = %activity.actor, object = %undone, "Undo of an unknown activity ignored");
        return Ok(());
    }

    ctx.followers().remove(&ctx.user.id, &activity.actor).await?;
    Ok(())
}

async fn on_accept_follow(ctx: InboxContext, activity: Activity) -> Result<()> {
    ctx.followings().handle_accept(&ctx.user.id, &activity).await
}

async fn on_reject_follow(ctx: InboxContext, activity: Activity) -> Result<()> {
    ctx.followings().handle_reject(&ctx.user.id, &activity).await
}

async fn on_create(ctx: InboxContext, activity: Activity) -> Result<()> {
    let muted = match ctx.verdict(&activity).await? {
        Verdict::Block => {
            tracing::debug!(
                actor = %activity.actor,
                activity_type = %activity.activity_type,
                "Blocked activity dropped"
            );
            return Ok(());
        }
        Verdict::Mute => true,
        Verdict::Allow => false,
    };

    MessageService::new(ctx.tenant.clone())
        .store(&ctx.user.id, &activity, muted)
        .await?;
    Ok(())
}

async fn on_update_actor(ctx: InboxContext, activity: Activity) -> Result<()> {
    let Some(document) = activity.object_document() else {
        return Ok(());
    };
    if activity.object_id() != Some(activity.actor.as_str()) {
        tracing::debug!(actor = %activity.actor, "Update of another actor ignored");
        return Ok(());
    }

    ctx.followers().refresh_profile(document).await?;
    Ok(())
}

async fn on_delete(ctx: InboxContext, activity: Activity) -> Result<()> {
    let Some(object_id) = activity.object_id() else {
        return Ok(());
    };

    if object_id == activity.actor {
        ctx.followers().remove(&ctx.user.id, &activity.actor).await?;
        return Ok(());
    }

    let deleted = MessageService::new(ctx.tenant.clone())
        .delete_by_author(&ctx.user.id, object_id, &activity.actor)
        .await?;
    tracing::debug!(object = %object_id, deleted, "Delete handled");
    Ok(())
}

async fn on_like(ctx: InboxContext, activity: Activity) -> Result<()> {
    let verdict = ctx.verdict(&activity).await?;
    tracing::info!(
        actor = %activity.actor,
        object = activity.object_id().unwrap_or_default(),
        ?verdict,
        "Like received"
    );
    Ok(())
}
