//! One served domain
//!
//! A tenant owns its database, its document resolver and its current
//! [`DomainConfig`]. Requests hold an [`InFlightGuard`] while they use the
//! tenant so that removal can wait for them before closing the database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use super::config::{DomainConfig, OwnerConfig};
use super::normalize_hostname;
use crate::config::AppConfig;
use crate::data::{Database, User};
use crate::error::AppError;
use crate::federation::DocumentResolver;
use crate::service::hash_api_token;

pub struct Tenant {
    hostname: String,
    config: RwLock<DomainConfig>,
    database: RwLock<Arc<Database>>,
    /// Serializes refreshes; readers never take it
    refresh_lock: tokio::sync::Mutex<()>,
    resolver: Arc<DocumentResolver>,
    app_config: Arc<AppConfig>,
    http_client: reqwest::Client,
    in_flight: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
    marked_for_deletion: AtomicBool,
}

impl std::fmt::Debug for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenant")
            .field("hostname", &self.hostname)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Keeps a tenant from finishing its drain while a request runs
pub struct InFlightGuard {
    tenant: Arc<Tenant>,
}

impl InFlightGuard {
    pub fn tenant(&self) -> &Arc<Tenant> {
        &self.tenant
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.tenant.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tenant.drained.notify_waiters();
        }
    }
}

/// Create the owner user if missing and bring its profile and token in line
async fn sync_owner(database: &Database, owner: &OwnerConfig) -> Result<User, AppError> {
    let username = owner.username.trim();
    let candidate = User::new(username, owner.display_name.clone());
    if database.insert_user_if_absent(&candidate).await? {
        tracing::info!(username = %username, "Created tenant owner");
    }

    let user = database
        .get_user_by_username(username)
        .await?
        .ok_or(AppError::NotFound)?;

    if user.display_name != owner.display_name {
        database
            .update_user_display_name(&user.id, owner.display_name.as_deref())
            .await?;
    }

    if let Some(token) = owner.api_token.as_deref().filter(|t| !t.is_empty()) {
        let token_hash = hash_api_token(token);
        if user.api_token_hash.as_deref() != Some(token_hash.as_str()) {
            database.set_user_token_hash(&user.id, &token_hash).await?;
        }
    }

    Ok(user)
}

impl Tenant {
    /// Open the tenant's database and create its owner
    pub async fn open(
        config: DomainConfig,
        app_config: Arc<AppConfig>,
        http_client: reqwest::Client,
    ) -> Result<Arc<Self>, AppError> {
        config.validate()?;
        let hostname = normalize_hostname(&config.hostname);

        let database = Database::connect(&config.storage.database_path).await?;
        sync_owner(&database, &config.owner).await?;

        let resolver = DocumentResolver::new(
            http_client.clone(),
            Duration::from_secs(app_config.cache.document_ttl),
            app_config.cache.max_documents,
        );

        tracing::info!(hostname = %hostname, "Tenant opened");

        Ok(Arc::new(Self {
            hostname,
            config: RwLock::new(config),
            database: RwLock::new(Arc::new(database)),
            refresh_lock: tokio::sync::Mutex::new(()),
            resolver: Arc::new(resolver),
            app_config,
            http_client,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
            marked_for_deletion: AtomicBool::new(false),
        }))
    }

    /// Apply a new configuration in place
    ///
    /// The database is reopened only when its path changed. Requests that
    /// already hold the previous database keep using it until they finish.
    pub async fn refresh(&self, config: DomainConfig) -> Result<(), AppError> {
        let _refresh = self.refresh_lock.lock().await;
        config.validate()?;

        let current = self.config();
        if current.storage.database_path != config.storage.database_path {
            let database = Database::connect(&config.storage.database_path).await?;
            sync_owner(&database, &config.owner).await?;
            *self.database.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(database);
            tracing::info!(
                hostname = %self.hostname,
                path = %config.storage.database_path.display(),
                "Tenant database moved"
            );
        } else if current.owner != config.owner {
            sync_owner(&self.database(), &config.owner).await?;
        }

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn config(&self) -> DomainConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn database(&self) -> Arc<Database> {
        self.database
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resolver(&self) -> &Arc<DocumentResolver> {
        &self.resolver
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// `{protocol}://{hostname}`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.app_config.server.protocol, self.hostname)
    }

    /// Actor URL of a local user
    pub fn user_url(&self, user_id: &str) -> String {
        format!("{}/users/{}", self.base_url(), user_id)
    }

    /// Parse a local actor URL back into a user id
    ///
    /// The host must be this tenant's; the scheme is not compared so that
    /// a tenant reached over plain http in development still matches.
    pub fn user_id_from_url(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let authority = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return None,
        };
        if normalize_hostname(&authority) != self.hostname {
            return None;
        }

        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
        match (segments.next(), segments.next(), segments.next()) {
            (Some("users"), Some(id), None) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Register a request; fails once the tenant started closing
    pub fn begin_request(self: &Arc<Self>) -> Result<InFlightGuard, AppError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::NotFound);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            tenant: self.clone(),
        };

        // close() may have started between the check and the increment
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::NotFound);
        }
        Ok(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_marked_for_deletion(&self, marked: bool) {
        self.marked_for_deletion.store(marked, Ordering::SeqCst);
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.marked_for_deletion.load(Ordering::SeqCst)
    }

    /// Stop accepting requests, wait for in-flight ones, close the database
    ///
    /// Returns false when the drain timed out; the database is closed
    /// regardless.
    pub async fn close(&self, drain_timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(drain_timeout, async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                hostname = %self.hostname,
                in_flight = self.in_flight(),
                "Tenant drain timed out"
            );
        }

        self.database().close().await;
        self.resolver.clear().await;
        tracing::info!(hostname = %self.hostname, drained, "Tenant closed");
        drained
    }
}
