//! Multi-tenant domain hosting
//!
//! Every served hostname is an isolated [`Tenant`] with its own database
//! and caches. The [`DomainRegistry`] maps request hosts to tenants and
//! reconciles the live set against configuration snapshots.

mod config;
mod registry;
mod tenant;

pub use config::{
    ConfigSnapshot, ConfigStorage, DomainConfig, FileConfigStorage, OwnerConfig, ProviderConfig,
    StorageConfig,
};
pub use registry::{DomainRegistry, ReloadSummary};
pub use tenant::{InFlightGuard, Tenant};

#[cfg(test)]
pub(crate) use tenant::tests as tenant_tests;

/// Canonical form of a hostname used as a registry key
///
/// Trims whitespace, lowercases, drops a trailing dot and a leading
/// `www.`. A port, if present, is kept.
pub fn normalize_hostname(hostname: &str) -> String {
    let lowered = hostname.trim().to_ascii_lowercase();
    let (host, port) = match lowered.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (lowered.as_str(), None),
    };
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = host.trim_end_matches('.');

    match port {
        Some(port) if !host.is_empty() => format!("{}:{}", host, port),
        _ => host.to_string(),
    }
}
