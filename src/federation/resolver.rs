//! Remote document resolver
//!
//! Fetches ActivityPub documents (actors, objects, feeds) and caches them
//! per tenant. A cached entry is returned unchanged until its TTL expires;
//! after that the next fetch goes back to the network.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::locks::{Clock, SystemClock};
use super::signature::sign_request;
use crate::error::AppError;

const CACHE_NAME: &str = "documents";

const ACCEPT_HEADER: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Content types accepted as ActivityPub documents
const ACCEPTED_CONTENT_TYPES: [&str; 3] = [
    "application/activity+json",
    "application/ld+json",
    "application/json",
];

/// A fetched document
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    /// Canonical URL the document was requested with
    pub url: String,
    /// Body exactly as received
    pub body: Arc<[u8]>,
    pub json: Arc<Value>,
    pub fetched_at: Instant,
}

impl RemoteDocument {
    /// `id` of the document, falling back to the request URL
    pub fn id(&self) -> &str {
        self.str_field("id").unwrap_or(&self.url)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.json.get(field).and_then(Value::as_str)
    }

    pub fn inbox(&self) -> Option<&str> {
        self.str_field("inbox")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.str_field("preferredUsername")
    }

    /// Display label: `name`, then `preferredUsername`, then `title`
    pub fn label(&self) -> Option<&str> {
        document_label(&self.json)
    }

    pub fn icon_url(&self) -> Option<&str> {
        document_icon_url(&self.json)
    }
}

/// Display label of an ActivityPub document
pub fn document_label(json: &Value) -> Option<&str> {
    let field = |name: &str| json.get(name).and_then(Value::as_str);
    field("name")
        .filter(|name| !name.is_empty())
        .or_else(|| field("preferredUsername"))
        .or_else(|| field("title"))
}

/// `icon` as either a URL or an Image object
pub fn document_icon_url(json: &Value) -> Option<&str> {
    match json.get("icon")? {
        Value::String(url) => Some(url),
        Value::Object(image) => image.get("url").and_then(Value::as_str),
        Value::Array(images) => images.iter().find_map(|image| match image {
            Value::String(url) => Some(url.as_str()),
            other => other.get("url").and_then(Value::as_str),
        }),
        _ => None,
    }
}

/// Cached document entry
#[derive(Debug, Clone)]
struct CachedDocument {
    document: RemoteDocument,
    ttl: Duration,
}

impl CachedDocument {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.document.fetched_at) < self.ttl
    }
}

/// Key material used to sign outbound fetches
#[derive(Debug, Clone)]
pub struct RequestSigner {
    pub key_id: String,
    pub private_key_pem: String,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

/// Remote document resolver with a TTL cache
pub struct DocumentResolver {
    cache: RwLock<HashMap<String, CachedDocument>>,
    http_client: reqwest::Client,
    default_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    signer: StdRwLock<Option<RequestSigner>>,
}

/// Canonical form of a document URL
///
/// Only http and https are accepted. The fragment is dropped; the host is
/// lowercased and a default port removed by the URL parser.
pub fn canonicalize_url(raw: &str) -> Result<String, AppError> {
    let mut url = url::Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(AppError::Validation(format!("URL has no host: {}", raw)));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}

fn is_accepted_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

impl DocumentResolver {
    pub fn new(http_client: reqwest::Client, default_ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(http_client, default_ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(
        http_client: reqwest::Client,
        default_ttl: Duration,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            http_client,
            default_ttl,
            max_entries: max_entries.max(1),
            clock,
            signer: StdRwLock::new(None),
        }
    }

    /// Sign subsequent fetches with this key
    pub fn set_signer(&self, signer: Option<RequestSigner>) {
        let mut slot = self.signer.write().unwrap_or_else(|e| e.into_inner());
        *slot = signer;
    }

    fn current_signer(&self) -> Option<RequestSigner> {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fetch a document, from cache when fresh
    ///
    /// # Errors
    /// - `Validation` for unsupported URLs, content types or invalid JSON
    /// - `Remote` for error statuses (4xx is not-found, 5xx transient)
    /// - `HttpClient` for network failures and timeouts
    pub async fn fetch(&self, url: &str) -> Result<RemoteDocument, AppError> {
        let canonical = canonicalize_url(url)?;

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&canonical) {
                if cached.is_valid(self.clock.now()) {
                    tracing::debug!(url = %canonical, "Document cache hit");
                    crate::metrics::CACHE_HITS_TOTAL
                        .with_label_values(&[CACHE_NAME])
                        .inc();
                    return Ok(cached.document.clone());
                }
                tracing::debug!(url = %canonical, "Document cache entry expired");
            }
        }

        crate::metrics::CACHE_MISSES_TOTAL
            .with_label_values(&[CACHE_NAME])
            .inc();

        let started = Instant::now();
        let result = self.fetch_remote(&canonical).await;
        let status = match &result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.kind().as_str().to_string(),
        };
        crate::metrics::REMOTE_FETCH_DURATION_SECONDS
            .with_label_values(&[status.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let document = result?;
        self.store(document.clone()).await;
        Ok(document)
    }

    async fn fetch_remote(&self, url: &str) -> Result<RemoteDocument, AppError> {
        let mut request = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER);

        if let Some(signer) = self.current_signer() {
            let headers = sign_request("GET", url, None, &signer.private_key_pem, &signer.key_id)?;
            request = request
                .header("Date", headers.date)
                .header("Signature", headers.signature);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Document fetch failed");
            AppError::HttpClient(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Remote {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_accepted_content_type(&content_type) {
            return Err(AppError::Validation(format!(
                "{} returned unsupported content type {:?}",
                url, content_type
            )));
        }

        let body = response.bytes().await.map_err(AppError::HttpClient)?;
        let json: Value = serde_json::from_slice(&body)?;

        Ok(RemoteDocument {
            url: url.to_string(),
            body: Arc::from(body.as_ref()),
            json: Arc::new(json),
            fetched_at: self.clock.now(),
        })
    }

    async fn store(&self, document: RemoteDocument) {
        let mut cache = self.cache.write().await;
        let now = self.clock.now();

        if cache.len() >= self.max_entries && !cache.contains_key(&document.url) {
            cache.retain(|_, entry| entry.is_valid(now));
            if cache.len() >= self.max_entries {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, entry)| entry.document.fetched_at)
                    .map(|(url, _)| url.clone());
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
        }

        cache.insert(
            document.url.clone(),
            CachedDocument {
                document,
                ttl: self.default_ttl,
            },
        );
        crate::metrics::CACHE_SIZE
            .with_label_values(&[CACHE_NAME])
            .set(cache.len() as i64);
    }

    /// Forget a cached document
    pub async fn invalidate(&self, url: &str) {
        let Ok(canonical) = canonicalize_url(url) else {
            return;
        };
        let mut cache = self.cache.write().await;
        if cache.remove(&canonical).is_some() {
            tracing::debug!(url = %canonical, "Invalidated cached document");
        }
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        let now = self.clock.now();
        let total = cache.len();
        let valid = cache.values().filter(|entry| entry.is_valid(now)).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }

    /// Drop expired entries; returns how many were removed
    pub async fn prune_expired(&self) -> usize {
        let mut cache = self.cache.write().await;
        let now = self.clock.now();
        let before = cache.len();
        cache.retain(|_, entry| entry.is_valid(now));
        let removed = before - cache.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired cached documents", removed);
        }
        removed
    }
}
