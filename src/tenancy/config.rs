//! Tenant configuration snapshots
//!
//! The set of served domains is published as immutable [`ConfigSnapshot`]s
//! through a [`ConfigStorage`]. The registry consumes them one at a time
//! from a single channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::normalize_hostname;
use crate::error::AppError;

/// Owner account created when a tenant opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// REST API token issued to the owner; only its hash is stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Where a tenant keeps its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// OAuth-style credentials for an external provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// One served domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub hostname: String,
    #[serde(default)]
    pub label: String,
    pub owner: OwnerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl DomainConfig {
    /// Reject configs that cannot be served
    pub fn validate(&self) -> Result<(), AppError> {
        if normalize_hostname(&self.hostname).is_empty() {
            return Err(AppError::Validation("Domain hostname is empty".to_string()));
        }
        if self.owner.username.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Domain {} has no owner username",
                self.hostname
            )));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(AppError::Validation(format!(
                "Domain {} has no database path",
                self.hostname
            )));
        }
        Ok(())
    }
}

/// Full tenant configuration at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl ConfigSnapshot {
    pub fn domain(&self, hostname: &str) -> Option<&DomainConfig> {
        let wanted = normalize_hostname(hostname);
        self.domains
            .iter()
            .find(|domain| normalize_hostname(&domain.hostname) == wanted)
    }

    /// Insert or replace the domain with the same normalized hostname
    pub fn upsert_domain(&mut self, config: DomainConfig) {
        let wanted = normalize_hostname(&config.hostname);
        match self
            .domains
            .iter_mut()
            .find(|domain| normalize_hostname(&domain.hostname) == wanted)
        {
            Some(existing) => *existing = config,
            None => self.domains.push(config),
        }
    }

    /// Returns true when a domain was removed
    pub fn remove_domain(&mut self, hostname: &str) -> bool {
        let wanted = normalize_hostname(hostname);
        let before = self.domains.len();
        self.domains
            .retain(|domain| normalize_hostname(&domain.hostname) != wanted);
        before != self.domains.len()
    }
}

/// Durable tenant configuration with change notification
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Stream of snapshots, starting with the current one
    fn subscribe(&self) -> mpsc::Receiver<Arc<ConfigSnapshot>>;

    /// Read the current snapshot
    async fn load(&self) -> Result<ConfigSnapshot, AppError>;

    /// Persist a new snapshot; subscribers see it on their next poll
    async fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), AppError>;
}

/// JSON file storage
///
/// Writes go to a sibling temp file that is renamed over the original.
/// Subscribers poll the file and receive a snapshot whenever its content
/// changes.
pub struct FileConfigStorage {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_snapshot_file(path: &Path) -> Result<Option<String>, AppError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Config(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_snapshot(content: Option<&str>) -> Result<ConfigSnapshot, AppError> {
    match content {
        None => Ok(ConfigSnapshot::default()),
        Some(content) if content.trim().is_empty() => Ok(ConfigSnapshot::default()),
        Some(content) => serde_json::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid domain configuration: {}", e))),
    }
}

#[async_trait]
impl ConfigStorage for FileConfigStorage {
    fn subscribe(&self) -> mpsc::Receiver<Arc<ConfigSnapshot>> {
        let (sender, receiver) = mpsc::channel(4);
        let path = self.path.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            let mut last_content: Option<Option<String>> = None;

            loop {
                interval.tick().await;
                if sender.is_closed() {
                    break;
                }

                let content = match read_snapshot_file(&path).await {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(error = %e, "Domain configuration unreadable");
                        continue;
                    }
                };
                if last_content.as_ref() == Some(&content) {
                    continue;
                }

                match parse_snapshot(content.as_deref()) {
                    Ok(snapshot) => {
                        tracing::debug!(
                            path = %path.display(),
                            domains = snapshot.domains.len(),
                            "Publishing domain configuration"
                        );
                        if sender.send(Arc::new(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        crate::metrics::CONFIG_RELOADS_TOTAL
                            .with_label_values(&["invalid"])
                            .inc();
                        tracing::error!(error = %e, "Ignoring invalid domain configuration");
                    }
                }
                last_content = Some(content);
            }

            tracing::debug!(path = %path.display(), "Configuration subscriber closed");
        });

        receiver
    }

    async fn load(&self) -> Result<ConfigSnapshot, AppError> {
        let content = read_snapshot_file(&self.path).await?;
        parse_snapshot(content.as_deref())
    }

    async fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode snapshot: {}", e)))?;

        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let io_error = |e: std::io::Error| {
            AppError::Config(format!("Failed to write {}: {}", self.path.display(), e))
        };

        tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;
        let temp_path = dir.join(format!(
            ".{}.tmp",
            crate::data::EntityId::new().0.to_ascii_lowercase()
        ));
        tokio::fs::write(&temp_path, &json).await.map_err(io_error)?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_error)?;

        tracing::info!(
            path = %self.path.display(),
            domains = snapshot.domains.len(),
            "Domain configuration written"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn domain(hostname: &str, database_path: PathBuf) -> DomainConfig {
        DomainConfig {
            hostname: hostname.to_string(),
            label: format!("{} label", hostname),
            owner: OwnerConfig {
                username: "owner".to_string(),
                display_name: Some("Owner".to_string()),
                email: None,
                api_token: None,
            },
            storage: StorageConfig { database_path },
            providers: Vec::new(),
        }
    }

    #[test]
    fn upsert_and_remove_use_normalized_hostnames() {
        let mut snapshot = ConfigSnapshot::default();
        snapshot.upsert_domain(domain("foo.example", "/tmp/a.db".into()));
        snapshot.upsert_domain(domain("WWW.Foo.Example.", "/tmp/b.db".into()));

        assert_eq!(snapshot.domains.len(), 1);
        assert_eq!(
            snapshot.domain("foo.example").unwrap().storage.database_path,
            PathBuf::from("/tmp/b.db")
        );

        assert!(snapshot.remove_domain("www.foo.example"));
        assert!(!snapshot.remove_domain("foo.example"));
    }

    #[test]
    fn validate_rejects_incomplete_domains() {
        let mut config = domain("foo.example", "/tmp/a.db".into());
        assert!(config.validate().is_ok());

        config.owner.username = " ".to_string();
        assert!(config.validate().is_err());

        let config = domain("www.", "/tmp/a.db".into());
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = FileConfigStorage::new(dir.path().join("domains.json"), Duration::from_millis(20));

        assert_eq!(storage.load().await.unwrap(), ConfigSnapshot::default());
    }

    #[tokio::test]
    async fn subscribers_see_written_snapshots() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = FileConfigStorage::new(dir.path().join("domains.json"), Duration::from_millis(20));
        let mut updates = storage.subscribe();

        let initial = updates.recv().await.unwrap();
        assert!(initial.domains.is_empty());

        let mut snapshot = ConfigSnapshot::default();
        snapshot.upsert_domain(domain("foo.example", dir.path().join("foo.db")));
        storage.write(&snapshot).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*next, snapshot);
        assert_eq!(storage.load().await.unwrap(), snapshot);
    }
}
