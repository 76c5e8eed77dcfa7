//! Per-resource mutation locks
//!
//! Handlers that read-then-write state about one federated resource
//! (an actor, a followed URL) serialize on a lock keyed by that
//! resource's ActivityPub id. Unrelated ids never contend.
//!
//! Locks are created on first use. Entries that are neither held nor
//! awaited and have been idle longer than `max_idle` are dropped by
//! [`LockRegistry::sweep`], which also runs whenever the registry grows
//! past `max_entries`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

use crate::config::LockConfig;

/// Time source used for idle eviction
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + *offset
    }
}

struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

impl LockEntry {
    /// Only the registry holds a reference: nobody owns or waits on it
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.mutex) == 1
    }
}

/// Registry of per-resource locks
pub struct LockRegistry {
    entries: Mutex<HashMap<String, LockEntry>>,
    clock: Arc<dyn Clock>,
    max_idle: Duration,
    max_entries: usize,
}

/// Exclusive hold on one resource; released on drop
pub struct ResourceGuard {
    resource_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

impl LockRegistry {
    pub fn new(max_idle: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            max_idle,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(
            Duration::from_secs(config.max_idle_seconds),
            config.max_entries,
            Arc::new(SystemClock),
        )
    }

    /// Wait for exclusive access to `resource_id`
    pub async fn acquire(&self, resource_id: &str) -> ResourceGuard {
        let mutex = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let now = self.clock.now();

            if entries.len() >= self.max_entries && !entries.contains_key(resource_id) {
                let evicted = self.sweep_entries(&mut entries, now);
                tracing::debug!(evicted, remaining = entries.len(), "Forced lock sweep");
            }

            let entry = entries
                .entry(resource_id.to_string())
                .or_insert_with(|| LockEntry {
                    mutex: Arc::new(tokio::sync::Mutex::new(())),
                    last_used: now,
                });
            entry.last_used = now;
            let mutex = entry.mutex.clone();
            crate::metrics::RESOURCE_LOCKS.set(entries.len() as i64);
            mutex
        };

        let guard = mutex.lock_owned().await;
        ResourceGuard {
            resource_id: resource_id.to_string(),
            _guard: guard,
        }
    }

    /// Drop idle locks; returns how many were evicted
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let evicted = self.sweep_entries(&mut entries, self.clock.now());
        crate::metrics::RESOURCE_LOCKS.set(entries.len() as i64);
        evicted
    }

    fn sweep_entries(&self, entries: &mut HashMap<String, LockEntry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| {
            !(entry.is_idle() && now.saturating_duration_since(entry.last_used) > self.max_idle)
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
