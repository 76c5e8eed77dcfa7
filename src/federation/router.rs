//! Activity router
//!
//! Handlers are registered against a `(verb, object type)` pair where each
//! side is either an exact value or [`Pattern::Any`]. Lookup order is
//! exact+exact, exact+any, any+exact, any+any. When nothing matches, a
//! built-in sink logs and counts the activity and returns `Ok`.
//!
//! The router holds no state besides its table: locking, filtering and
//! persistence are the handlers' business.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use super::activity::{Activity, ActivityType, ObjectType};
use crate::error::{AppError, Result};

/// One side of a route key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern<T> {
    Exact(T),
    Any,
}

impl<T: std::fmt::Display> Pattern<T> {
    fn label(&self) -> String {
        match self {
            Pattern::Exact(value) => value.to_string(),
            Pattern::Any => "Any".to_string(),
        }
    }
}

type HandlerFn<C> = dyn Fn(C, Activity) -> BoxFuture<'static, Result<()>> + Send + Sync;

struct Route<C> {
    label: String,
    handler: Arc<HandlerFn<C>>,
}

/// Exact entries plus an optional wildcard
struct Level<K, V> {
    exact: HashMap<K, V>,
    any: Option<V>,
}

impl<K: Eq + Hash, V> Level<K, V> {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            any: None,
        }
    }
}

/// Two-level `(verb, object type)` dispatch table
pub struct ActivityRouter<C> {
    verbs: Level<ActivityType, Level<ObjectType, Route<C>>>,
}

impl<C: Send + 'static> Default for ActivityRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> ActivityRouter<C> {
    pub fn new() -> Self {
        Self {
            verbs: Level::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same key
    pub fn register<F, Fut>(
        &mut self,
        verb: Pattern<ActivityType>,
        object_type: Pattern<ObjectType>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(C, Activity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let label = format!("{}/{}", verb.label(), object_type.label());
        let route = Route {
            label,
            handler: Arc::new(
                move |ctx: C, activity: Activity| -> BoxFuture<'static, Result<()>> {
                    Box::pin(handler(ctx, activity))
                },
            ),
        };

        let objects = match verb {
            Pattern::Exact(verb) => self.verbs.exact.entry(verb).or_insert_with(Level::new),
            Pattern::Any => self.verbs.any.get_or_insert_with(Level::new),
        };

        match object_type {
            Pattern::Exact(object_type) => {
                objects.exact.insert(object_type, route);
            }
            Pattern::Any => objects.any = Some(route),
        }

        self
    }

    fn lookup(&self, verb: &ActivityType, object_type: &ObjectType) -> Option<&Route<C>> {
        let exact_verb = self.verbs.exact.get(verb);
        let any_verb = self.verbs.any.as_ref();

        exact_verb
            .and_then(|objects| objects.exact.get(object_type))
            .or_else(|| exact_verb.and_then(|objects| objects.any.as_ref()))
            .or_else(|| any_verb.and_then(|objects| objects.exact.get(object_type)))
            .or_else(|| any_verb.and_then(|objects| objects.any.as_ref()))
    }

    /// Label of the route an activity would take, `None` for the sink
    pub fn route_for(&self, verb: &ActivityType, object_type: &ObjectType) -> Option<&str> {
        self.lookup(verb, object_type)
            .map(|route| route.label.as_str())
    }

    /// Run the most specific handler for `activity`
    pub async fn dispatch(&self, ctx: C, activity: Activity) -> Result<()> {
        let verb = activity.activity_type.clone();
        let object_type = activity.object_type.clone();

        let Some(route) = self.lookup(&verb, &object_type) else {
            tracing::debug!(
                activity_type = %verb,
                object_type = %object_type,
                actor = %activity.actor,
                "Unhandled activity ignored"
            );
            crate::metrics::ACTIVITIES_RECEIVED
                .with_label_values(&[verb.as_str(), "unhandled"])
                .inc();
            return Ok(());
        };

        crate::metrics::ACTIVITIES_RECEIVED
            .with_label_values(&[verb.as_str(), route.label.as_str()])
            .inc();

        let handler = route.handler.clone();
        let label = route.label.clone();
        match handler(ctx, activity).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let kind = error.kind();
                tracing::warn!(
                    route = %label,
                    object_type = %object_type,
                    kind = kind.as_str(),
                    error = %error,
                    "Activity handler failed"
                );
                crate::metrics::ACTIVITIES_FAILED
                    .with_label_values(&[verb.as_str(), kind.as_str()])
                    .inc();
                Err(AppError::wrap(error, label))
            }
        }
    }
}
