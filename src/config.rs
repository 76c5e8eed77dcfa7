//! Configuration management
//!
//! Loads process-level configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! Per-domain tenant configuration is not part of this file; it arrives
//! as snapshots through [`crate::tenancy::ConfigStorage`].

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tenants: TenantsConfig,
    pub cache: CacheConfig,
    pub locks: LockConfig,
    pub federation: FederationConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Protocol used in public URLs ("http" or "https")
    pub protocol: String,
}

/// Where tenant snapshots come from
#[derive(Debug, Clone, Deserialize)]
pub struct TenantsConfig {
    /// JSON file holding the list of served domains
    pub config_path: PathBuf,
    /// How often the file is checked for changes
    pub reload_interval_seconds: u64,
    /// How long a removed tenant may drain in-flight work
    pub drain_timeout_seconds: u64,
}

/// Remote document cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Document TTL in seconds (default: 3600)
    pub document_ttl: u64,
    /// Maximum cached documents per tenant (default: 4096)
    pub max_documents: usize,
}

/// Resource lock registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Idle locks older than this are evicted (default: 600)
    pub max_idle_seconds: u64,
    /// Sweep is forced once this many locks exist (default: 10000)
    pub max_entries: usize,
}

/// Outbound federation settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Timeout for any remote request in seconds
    pub request_timeout_seconds: u64,
    /// User-Agent sent with remote requests
    pub user_agent: String,
    /// Re-poll interval for polled followings in seconds
    pub poll_interval_seconds: u64,
    /// RSA key size for lazily generated user keys
    pub key_bits: usize,
}

impl FederationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Rule evaluation settings
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// How equally specific matches are resolved
    #[serde(default)]
    pub tie_break: TieBreak,
}

/// Resolution of two matching rules with the same specificity
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Block beats Mute beats Allow
    #[default]
    MostRestrictive,
    /// Allow beats Mute beats Block
    MostPermissive,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDHOST__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "https")?
            .set_default("tenants.config_path", "config/domains.json")?
            .set_default("tenants.reload_interval_seconds", 5)?
            .set_default("tenants.drain_timeout_seconds", 30)?
            .set_default("cache.document_ttl", 3600)?
            .set_default("cache.max_documents", 4096)?
            .set_default("locks.max_idle_seconds", 600)?
            .set_default("locks.max_entries", 10_000)?
            .set_default("federation.request_timeout_seconds", 30)?
            .set_default("federation.user_agent", "fedhost/0.1.0")?
            .set_default("federation.poll_interval_seconds", 3600)?
            .set_default("federation.key_bits", 2048)?
            .set_default("rules.tie_break", "most_restrictive")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEDHOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_KEY_BITS: usize = 2048;

        if !matches!(self.server.protocol.as_str(), "http" | "https") {
            return Err(crate::error::AppError::Config(format!(
                "server.protocol must be http or https, got {}",
                self.server.protocol
            )));
        }

        if self.federation.request_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "federation.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(crate::error::AppError::Config(format!(
                "federation.key_bits must be at least {}",
                MIN_KEY_BITS
            )));
        }

        if self.tenants.reload_interval_seconds == 0 {
            tracing::warn!("tenants.reload_interval_seconds=0 is invalid; clamped to 1 second");
        }

        if self.server.protocol == "http" {
            tracing::warn!("Serving tenants over plain http; only suitable for local development");
        }

        Ok(())
    }
}
