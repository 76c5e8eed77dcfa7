//! Domain registry
//!
//! Maps normalized hostnames to live tenants. Each configuration snapshot
//! is reconciled against the live set:
//!
//! 1. every live tenant is marked for deletion;
//! 2. hostnames already live are refreshed in place and unmarked, even if
//!    the refresh fails;
//! 3. new hostnames are opened outside the map lock, then inserted;
//! 4. tenants still marked are removed from the map, then drained and
//!    closed.
//!
//! Lookups never wait on a tenant being opened or closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

use super::config::{ConfigSnapshot, ConfigStorage, DomainConfig, ProviderConfig};
use super::normalize_hostname;
use super::tenant::Tenant;
use crate::config::AppConfig;
use crate::error::AppError;

/// What one snapshot changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub refreshed: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct DomainRegistry {
    tenants: RwLock<HashMap<String, Arc<Tenant>>>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    storage: Arc<dyn ConfigStorage>,
    app_config: Arc<AppConfig>,
    http_client: reqwest::Client,
    /// Serializes snapshot application and admin writes
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl DomainRegistry {
    pub fn new(
        storage: Arc<dyn ConfigStorage>,
        app_config: Arc<AppConfig>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::default())),
            storage,
            app_config,
            http_client,
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.app_config.tenants.drain_timeout_seconds)
    }

    /// Tenant serving `hostname`
    pub async fn by_hostname(&self, hostname: &str) -> Result<Arc<Tenant>, AppError> {
        let key = normalize_hostname(hostname);
        self.tenants
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Hostnames currently served, sorted
    pub async fn hostnames(&self) -> Vec<String> {
        let mut hostnames: Vec<_> = self.tenants.read().await.keys().cloned().collect();
        hostnames.sort();
        hostnames
    }

    pub async fn tenants(&self) -> Vec<Arc<Tenant>> {
        self.tenants.read().await.values().cloned().collect()
    }

    /// Reconcile live tenants against `snapshot`
    pub async fn apply_snapshot(&self, snapshot: Arc<ConfigSnapshot>) -> ReloadSummary {
        let _reconcile = self.reconcile_lock.lock().await;
        let mut summary = ReloadSummary::default();
        *self.snapshot.write().await = snapshot.clone();

        for tenant in self.tenants.read().await.values() {
            tenant.set_marked_for_deletion(true);
        }

        let mut seen = std::collections::HashSet::new();
        for domain in &snapshot.domains {
            let hostname = normalize_hostname(&domain.hostname);
            if !seen.insert(hostname.clone()) {
                tracing::warn!(hostname = %hostname, "Duplicate domain in configuration ignored");
                continue;
            }

            let existing = self.tenants.read().await.get(&hostname).cloned();
            if let Some(tenant) = existing {
                if let Err(e) = tenant.refresh(domain.clone()).await {
                    tracing::error!(hostname = %hostname, error = %e, "Error refreshing domain");
                    summary.failed.push(hostname.clone());
                } else {
                    summary.refreshed.push(hostname.clone());
                }
                tenant.set_marked_for_deletion(false);
                continue;
            }

            match Tenant::open(
                domain.clone(),
                self.app_config.clone(),
                self.http_client.clone(),
            )
            .await
            {
                Ok(tenant) => {
                    self.tenants.write().await.insert(hostname.clone(), tenant);
                    summary.added.push(hostname);
                }
                Err(e) => {
                    tracing::error!(hostname = %hostname, error = %e, "Unable to start domain");
                    summary.failed.push(hostname);
                }
            }
        }

        let removed: Vec<Arc<Tenant>> = {
            let mut tenants = self.tenants.write().await;
            let marked: Vec<String> = tenants
                .iter()
                .filter(|(_, tenant)| tenant.is_marked_for_deletion())
                .map(|(hostname, _)| hostname.clone())
                .collect();
            marked
                .iter()
                .filter_map(|hostname| tenants.remove(hostname))
                .collect()
        };

        let active = self.tenants.read().await.len();
        crate::metrics::TENANTS_ACTIVE.set(active as i64);

        let drain_timeout = self.drain_timeout();
        for tenant in removed {
            summary.removed.push(tenant.hostname().to_string());
            tenant.close(drain_timeout).await;
        }

        let status = if summary.failed.is_empty() { "ok" } else { "partial" };
        crate::metrics::CONFIG_RELOADS_TOTAL
            .with_label_values(&[status])
            .inc();
        tracing::info!(
            added = summary.added.len(),
            refreshed = summary.refreshed.len(),
            removed = summary.removed.len(),
            failed = summary.failed.len(),
            active,
            "Applied domain configuration"
        );

        summary
    }

    /// Apply snapshots until the channel closes
    pub async fn run(self: Arc<Self>, mut updates: mpsc::Receiver<Arc<ConfigSnapshot>>) {
        tracing::info!("Waiting for domain configuration");
        while let Some(snapshot) = updates.recv().await {
            self.apply_snapshot(snapshot).await;
        }
        tracing::info!("Domain configuration stream closed");
    }

    /// Close every tenant; used at shutdown
    pub async fn shutdown(&self) {
        let tenants: Vec<_> = self.tenants.write().await.drain().map(|(_, t)| t).collect();
        crate::metrics::TENANTS_ACTIVE.set(0);
        for tenant in tenants {
            tenant.close(self.drain_timeout()).await;
        }
    }

    // =========================================================================
    // Admin operations (persisted through ConfigStorage)
    // =========================================================================

    /// Domains in the most recent snapshot
    pub async fn list_domains(&self) -> Vec<DomainConfig> {
        self.snapshot.read().await.domains.clone()
    }

    pub async fn domain(&self, hostname: &str) -> Result<DomainConfig, AppError> {
        self.snapshot
            .read()
            .await
            .domain(hostname)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Add or replace a domain; the reload follows from the storage's
    /// change notification
    pub async fn put_domain(&self, config: DomainConfig) -> Result<(), AppError> {
        config.validate()?;
        self.update_storage(|snapshot| {
            snapshot.upsert_domain(config);
            Ok(())
        })
        .await
    }

    pub async fn delete_domain(&self, hostname: &str) -> Result<(), AppError> {
        self.update_storage(|snapshot| {
            if snapshot.remove_domain(hostname) {
                Ok(())
            } else {
                Err(AppError::NotFound)
            }
        })
        .await
    }

    pub async fn put_provider(&self, provider: ProviderConfig) -> Result<(), AppError> {
        self.update_storage(|snapshot| {
            snapshot.providers.retain(|existing| existing.id != provider.id);
            snapshot.providers.push(provider);
            Ok(())
        })
        .await
    }

    pub async fn delete_provider(&self, provider_id: &str) -> Result<(), AppError> {
        self.update_storage(|snapshot| {
            let before = snapshot.providers.len();
            snapshot.providers.retain(|existing| existing.id != provider_id);
            if snapshot.providers.len() == before {
                return Err(AppError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn update_storage<F>(&self, change: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut ConfigSnapshot) -> Result<(), AppError>,
    {
        let _reconcile = self.reconcile_lock.lock().await;
        let mut snapshot = self.storage.load().await?;
        change(&mut snapshot)?;
        self.storage.write(&snapshot).await
    }
}
