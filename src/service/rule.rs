//! Rule filter
//!
//! Decides whether an inbound activity is allowed, muted or blocked for a
//! local user. Every active rule in scope is matched; the most specific
//! match wins and ties between equally specific rules are broken by the
//! configured [`TieBreak`].

use std::sync::Arc;

use crate::config::TieBreak;
use crate::data::{Rule, RuleBehavior, RuleType};
use crate::error::AppError;
use crate::federation::{Activity, canonicalize_url};
use crate::tenancy::Tenant;

/// Which rules a filter consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    /// Block, Mute and Allow rules
    All,
    /// Block and Allow rules only; a mute does not stop a follow
    BlocksOnly,
}

/// Outcome of filtering one activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Mute,
    Block,
}

impl From<RuleBehavior> for Verdict {
    fn from(behavior: RuleBehavior) -> Self {
        match behavior {
            RuleBehavior::Allow => Verdict::Allow,
            RuleBehavior::Mute => Verdict::Mute,
            RuleBehavior::Block => Verdict::Block,
        }
    }
}

/// Compare URLs after canonicalization, falling back to the trimmed text
fn same_url(a: &str, b: &str) -> bool {
    match (canonicalize_url(a), canonicalize_url(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}

fn domain_matches(url: &str, domain: &str) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

fn url_prefix_matches(url: &str, prefix: &str) -> bool {
    url.len() >= prefix.len()
        && url.is_char_boundary(prefix.len())
        && url[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Active rules of one user, ready to evaluate activities
#[derive(Debug, Clone)]
pub struct RuleFilter {
    rules: Vec<Rule>,
    tie_break: TieBreak,
}

impl RuleFilter {
    /// Keep the active rules that belong to `scope`
    pub fn new(rules: Vec<Rule>, scope: FilterScope, tie_break: TieBreak) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.is_active)
            .filter(|rule| match scope {
                FilterScope::All => true,
                FilterScope::BlocksOnly => rule.behavior != RuleBehavior::Mute,
            })
            // Allow only makes sense for a named actor
            .filter(|rule| rule.behavior != RuleBehavior::Allow || rule.rule_type == RuleType::Actor)
            .collect();

        Self { rules, tie_break }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn matches(rule: &Rule, activity: &Activity) -> bool {
        let trigger = rule.trigger.trim();
        if trigger.is_empty() {
            return false;
        }

        match rule.rule_type {
            // An author claimed by the object cannot earn an Allow
            RuleType::Actor => {
                same_url(trigger, &activity.actor)
                    || (rule.behavior != RuleBehavior::Allow
                        && activity
                            .attributed_to()
                            .is_some_and(|author| same_url(trigger, author)))
            }
            RuleType::UrlPrefix => {
                let candidates = [Some(activity.actor.as_str()), activity.object_id()];
                if trigger.contains("://") {
                    candidates
                        .into_iter()
                        .flatten()
                        .any(|url| url_prefix_matches(url, trigger))
                } else {
                    let domain = trigger
                        .trim_start_matches("*.")
                        .trim_end_matches('.')
                        .to_ascii_lowercase();
                    candidates
                        .into_iter()
                        .flatten()
                        .any(|url| domain_matches(url, &domain))
                }
            }
            RuleType::Content => {
                let needle = trigger.to_lowercase();
                activity
                    .searchable_text()
                    .any(|text| text.to_lowercase().contains(&needle))
            }
            RuleType::External => {
                tracing::debug!(rule_id = %rule.id, "External rules are not evaluated locally");
                false
            }
        }
    }

    fn rank(&self, behavior: RuleBehavior) -> u8 {
        match self.tie_break {
            TieBreak::MostRestrictive => behavior.restrictiveness(),
            TieBreak::MostPermissive => 2 - behavior.restrictiveness(),
        }
    }

    /// Verdict for `activity`; Allow when nothing matches
    pub fn verdict(&self, activity: &Activity) -> Verdict {
        let winner = self
            .rules
            .iter()
            .filter(|rule| Self::matches(rule, activity))
            .max_by_key(|rule| (rule.rule_type.specificity(), self.rank(rule.behavior)));

        match winner {
            Some(rule) => {
                tracing::debug!(
                    rule_id = %rule.id,
                    rule_type = %rule.rule_type,
                    behavior = %rule.behavior,
                    actor = %activity.actor,
                    "Rule matched"
                );
                rule.behavior.into()
            }
            None => Verdict::Allow,
        }
    }

    /// True when the activity is blocked or muted
    pub fn disallow(&self, activity: &Activity) -> bool {
        self.verdict(activity) != Verdict::Allow
    }
}

pub struct RuleService {
    tenant: Arc<Tenant>,
}

impl RuleService {
    pub fn new(tenant: Arc<Tenant>) -> Self {
        Self { tenant }
    }

    pub async fn filter(&self, user_id: &str, scope: FilterScope) -> Result<RuleFilter, AppError> {
        let rules = self.tenant.database().list_rules(user_id, true).await?;
        Ok(RuleFilter::new(
            rules,
            scope,
            self.tenant.app_config().rules.tie_break,
        ))
    }

    /// Validate and store a new rule
    pub async fn create(
        &self,
        user_id: &str,
        rule_type: RuleType,
        trigger: &str,
        behavior: RuleBehavior,
        comment: Option<String>,
    ) -> Result<Rule, AppError> {
        let trigger = trigger.trim();
        if trigger.is_empty() {
            return Err(AppError::Validation("Rule trigger is empty".to_string()));
        }

        let trigger = match rule_type {
            RuleType::Actor => canonicalize_url(trigger)?,
            RuleType::UrlPrefix if !trigger.contains("://") => trigger.to_ascii_lowercase(),
            _ => trigger.to_string(),
        };

        if behavior == RuleBehavior::Allow && rule_type != RuleType::Actor {
            return Err(AppError::Validation(
                "Allow rules must name an actor".to_string(),
            ));
        }

        let mut rule = Rule::new(user_id, rule_type, trigger, behavior);
        rule.comment = comment;
        self.tenant.database().insert_rule(&rule).await?;

        tracing::info!(
            user_id = %user_id,
            rule_id = %rule.id,
            rule_type = %rule.rule_type,
            behavior = %rule.behavior,
            "Rule created"
        );
        Ok(rule)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Rule>, AppError> {
        self.tenant.database().list_rules(user_id, false).await
    }

    pub async fn delete(&self, user_id: &str, rule_id: &str) -> Result<(), AppError> {
        if !self.tenant.database().delete_rule(user_id, rule_id).await? {
            return Err(AppError::NotFound);
        }
        tracing::info!(user_id = %user_id, rule_id = %rule_id, "Rule deleted");
        Ok(())
    }

    pub async fn set_active(
        &self,
        user_id: &str,
        rule_id: &str,
        is_active: bool,
    ) -> Result<(), AppError> {
        if !self
            .tenant
            .database()
            .set_rule_active(user_id, rule_id, is_active)
            .await?
        {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::tenant_tests::open_tenant;
    use serde_json::json;
    use tempfile::TempDir;

    fn rule(rule_type: RuleType, trigger: &str, behavior: RuleBehavior) -> Rule {
        Rule::new("user-1", rule_type, trigger, behavior)
    }

    fn note(actor: &str, content: &str) -> Activity {
        Activity::parse(json!({
            "id": format!("{}/activities/1", actor),
            "type": "Create",
            "actor": actor,
            "object": {
                "id": format!("{}/notes/1", actor),
                "type": "Note",
                "attributedTo": actor,
                "content": content
            }
        }))
        .unwrap()
    }

    fn filter(rules: Vec<Rule>) -> RuleFilter {
        RuleFilter::new(rules, FilterScope::All, TieBreak::MostRestrictive)
    }

    #[test]
    fn no_rules_allows() {
        let activity = note("https://example.com/alice", "hi");
        assert_eq!(filter(vec![]).verdict(&activity), Verdict::Allow);
    }

    #[test]
    fn actor_allow_overrides_domain_block() {
        let rules = filter(vec![
            rule(RuleType::UrlPrefix, "example.com", RuleBehavior::Block),
            rule(RuleType::Actor, "https://example.com/alice", RuleBehavior::Allow),
        ]);

        assert_eq!(
            rules.verdict(&note("https://example.com/alice", "hi")),
            Verdict::Allow
        );
        assert_eq!(
            rules.verdict(&note("https://example.com/bob", "hi")),
            Verdict::Block
        );
        assert_eq!(
            rules.verdict(&note("https://other.example/carol", "hi")),
            Verdict::Allow
        );
    }

    #[test]
    fn claimed_author_cannot_earn_an_allow() {
        let rules = filter(vec![
            rule(RuleType::UrlPrefix, "example.com", RuleBehavior::Block),
            rule(RuleType::Actor, "https://example.com/alice", RuleBehavior::Allow),
        ]);
        let relayed = Activity::parse(json!({
            "type": "Create",
            "actor": "https://example.com/bob",
            "object": {
                "id": "https://example.com/notes/9",
                "type": "Note",
                "attributedTo": "https://example.com/alice",
                "content": "hi"
            }
        }))
        .unwrap();

        assert_eq!(rules.verdict(&relayed), Verdict::Block);
    }

    #[test]
    fn claimed_author_still_triggers_blocks() {
        let rules = filter(vec![rule(
            RuleType::Actor,
            "https://bad.example/users/eve",
            RuleBehavior::Block,
        )]);
        let announced = Activity::parse(json!({
            "type": "Announce",
            "actor": "https://ok.example/users/dan",
            "object": {
                "id": "https://bad.example/notes/1",
                "type": "Note",
                "attributedTo": "https://bad.example/users/eve"
            }
        }))
        .unwrap();

        assert_eq!(rules.verdict(&announced), Verdict::Block);
    }

    #[test]
    fn domain_rules_cover_subdomains_only() {
        let rules = filter(vec![rule(
            RuleType::UrlPrefix,
            "example.com",
            RuleBehavior::Block,
        )]);

        assert!(rules.disallow(&note("https://social.example.com/dan", "hi")));
        assert!(!rules.disallow(&note("https://notexample.com/erin", "hi")));
    }

    #[test]
    fn url_prefix_rules_match_actor_or_object() {
        let rules = filter(vec![rule(
            RuleType::UrlPrefix,
            "https://remote.example/users/spam",
            RuleBehavior::Mute,
        )]);

        assert_eq!(
            rules.verdict(&note("https://remote.example/users/spammer", "hi")),
            Verdict::Mute
        );
        assert_eq!(
            rules.verdict(&note("https://remote.example/users/frank", "hi")),
            Verdict::Allow
        );
    }

    #[test]
    fn content_rules_are_case_insensitive() {
        let rules = filter(vec![rule(RuleType::Content, "#Crypto", RuleBehavior::Mute)]);

        assert_eq!(
            rules.verdict(&note("https://remote.example/users/g", "buy #crypto now")),
            Verdict::Mute
        );
        assert_eq!(
            rules.verdict(&note("https://remote.example/users/g", "hello")),
            Verdict::Allow
        );
    }

    #[test]
    fn more_specific_rule_wins_over_restrictive_one() {
        let rules = filter(vec![
            rule(RuleType::Content, "hello", RuleBehavior::Block),
            rule(RuleType::UrlPrefix, "remote.example", RuleBehavior::Mute),
        ]);

        assert_eq!(
            rules.verdict(&note("https://remote.example/users/h", "hello")),
            Verdict::Mute
        );
    }

    #[test]
    fn ties_follow_configured_tie_break() {
        let rules = vec![
            rule(RuleType::Actor, "https://remote.example/users/i", RuleBehavior::Allow),
            rule(RuleType::Actor, "https://remote.example/users/i", RuleBehavior::Block),
        ];
        let activity = note("https://remote.example/users/i", "hi");

        let restrictive =
            RuleFilter::new(rules.clone(), FilterScope::All, TieBreak::MostRestrictive);
        assert_eq!(restrictive.verdict(&activity), Verdict::Block);

        let permissive = RuleFilter::new(rules, FilterScope::All, TieBreak::MostPermissive);
        assert_eq!(permissive.verdict(&activity), Verdict::Allow);
    }

    #[test]
    fn blocks_only_scope_ignores_mutes() {
        let rules = vec![rule(RuleType::UrlPrefix, "remote.example", RuleBehavior::Mute)];
        let activity = note("https://remote.example/users/j", "hi");

        let scoped = RuleFilter::new(rules, FilterScope::BlocksOnly, TieBreak::MostRestrictive);
        assert!(scoped.is_empty());
        assert!(!scoped.disallow(&activity));
    }

    #[test]
    fn inactive_and_external_rules_never_match() {
        let mut inactive = rule(RuleType::UrlPrefix, "remote.example", RuleBehavior::Block);
        inactive.is_active = false;
        let external = rule(RuleType::External, "remote.example", RuleBehavior::Block);

        let rules = filter(vec![inactive, external]);
        assert_eq!(rules.len(), 1);
        assert!(!rules.disallow(&note("https://remote.example/users/k", "hi")));
    }

    #[tokio::test]
    async fn service_validates_and_filters_stored_rules() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let service = RuleService::new(tenant);

        assert!(matches!(
            service
                .create("u1", RuleType::Content, "  ", RuleBehavior::Block, None)
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service
                .create("u1", RuleType::UrlPrefix, "a.example", RuleBehavior::Allow, None)
                .await,
            Err(AppError::Validation(_))
        ));

        let block = service
            .create("u1", RuleType::UrlPrefix, "Remote.Example", RuleBehavior::Block, None)
            .await
            .unwrap();
        assert_eq!(block.trigger, "remote.example");

        let activity = note("https://remote.example/users/l", "hi");
        let rules = service.filter("u1", FilterScope::All).await.unwrap();
        assert_eq!(rules.verdict(&activity), Verdict::Block);

        service.set_active("u1", &block.id, false).await.unwrap();
        let rules = service.filter("u1", FilterScope::All).await.unwrap();
        assert_eq!(rules.verdict(&activity), Verdict::Allow);
        assert_eq!(service.list("u1").await.unwrap().len(), 1);

        service.delete("u1", &block.id).await.unwrap();
        assert!(matches!(
            service.delete("u1", &block.id).await,
            Err(AppError::NotFound)
        ));
    }
}
