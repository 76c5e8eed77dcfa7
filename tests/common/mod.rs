//! Common test utilities for E2E tests

pub mod peer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fedhost::config::{
    AppConfig, CacheConfig, FederationConfig, LockConfig, LoggingConfig, RulesConfig,
    ServerConfig, TenantsConfig, TieBreak,
};
use fedhost::data::User;
use fedhost::tenancy::{
    ConfigSnapshot, ConfigStorage, DomainConfig, DomainRegistry, FileConfigStorage, OwnerConfig,
    StorageConfig,
};
use fedhost::AppState;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/test_private_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/test_public_key.pem");

/// Test server instance
///
/// Tenants are addressed by setting the `Host` header; the server itself
/// listens on a random local port.
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub storage: Arc<FileConfigStorage>,
    pub temp_dir: TempDir,
    pub client: reqwest::Client,
}

pub fn test_config(temp_dir: &TempDir) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            protocol: "https".to_string(),
        },
        tenants: TenantsConfig {
            config_path: temp_dir.path().join("domains.json"),
            reload_interval_seconds: 1,
            drain_timeout_seconds: 2,
        },
        cache: CacheConfig {
            document_ttl: 60,
            max_documents: 64,
        },
        locks: LockConfig {
            max_idle_seconds: 60,
            max_entries: 1000,
        },
        federation: FederationConfig {
            request_timeout_seconds: 5,
            user_agent: "fedhost-test".to_string(),
            poll_interval_seconds: 3600,
            key_bits: 2048,
        },
        rules: RulesConfig {
            tie_break: TieBreak::MostRestrictive,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// API token configured for the owner of `hostname`
pub fn api_token(hostname: &str) -> String {
    format!("token-{}", hostname)
}

impl TestServer {
    /// Start a server serving `hostnames`
    pub async fn new(hostnames: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = Arc::new(test_config(&temp_dir));

        let storage = Arc::new(FileConfigStorage::new(
            config.tenants.config_path.clone(),
            Duration::from_millis(20),
        ));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let registry = Arc::new(DomainRegistry::new(
            storage.clone(),
            config.clone(),
            client.clone(),
        ));
        let state = AppState::new(config, registry.clone());

        let server = Self {
            addr: String::new(),
            state,
            storage,
            temp_dir,
            client,
        };

        // First snapshot applied synchronously, later ones via the stream
        let snapshot = server.snapshot(hostnames);
        server.storage.write(&snapshot).await.unwrap();
        let summary = registry.apply_snapshot(Arc::new(snapshot)).await;
        assert!(summary.failed.is_empty(), "tenants failed to open: {:?}", summary.failed);
        tokio::spawn(registry.clone().run(server.storage.subscribe()));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let app = fedhost::build_router(server.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let server = Self { addr, ..server };
        for hostname in hostnames {
            server.install_fixture_keys(hostname).await;
        }
        server
    }

    pub fn domain(&self, hostname: &str) -> DomainConfig {
        DomainConfig {
            hostname: hostname.to_string(),
            label: hostname.to_string(),
            owner: OwnerConfig {
                username: "owner".to_string(),
                display_name: Some(format!("Owner of {}", hostname)),
                email: None,
                api_token: Some(api_token(hostname)),
            },
            storage: StorageConfig {
                database_path: self.database_path(hostname),
            },
            providers: Vec::new(),
        }
    }

    pub fn database_path(&self, hostname: &str) -> PathBuf {
        self.temp_dir.path().join(format!("{}.db", hostname))
    }

    pub fn snapshot(&self, hostnames: &[&str]) -> ConfigSnapshot {
        ConfigSnapshot {
            domains: hostnames.iter().map(|h| self.domain(h)).collect(),
            providers: Vec::new(),
        }
    }

    /// Get full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn get(&self, host: &str, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header(reqwest::header::HOST, host)
    }

    pub fn post(&self, host: &str, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header(reqwest::header::HOST, host)
    }

    /// Authenticated REST request as the owner of `host`
    pub fn api(&self, method: reqwest::Method, host: &str, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(reqwest::header::HOST, host)
            .bearer_auth(api_token(host))
    }

    /// Owner of `hostname`, read straight from its database
    pub async fn owner(&self, hostname: &str) -> User {
        let tenant = self.state.registry.by_hostname(hostname).await.unwrap();
        tenant
            .database()
            .get_user_by_username("owner")
            .await
            .unwrap()
            .unwrap()
    }

    /// Skip RSA key generation by installing the fixture pair
    pub async fn install_fixture_keys(&self, hostname: &str) {
        let owner = self.owner(hostname).await;
        let tenant = self.state.registry.by_hostname(hostname).await.unwrap();
        tenant
            .database()
            .set_user_keys_if_absent(&owner.id, PRIVATE_KEY, PUBLIC_KEY)
            .await
            .unwrap();
    }

    /// Poll `check` until it holds or two seconds pass
    pub async fn eventually<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}
