//! Fetch layer
//!
//! Provides:
//! - `Fetcher` trait returning a typed `Document` (XML feed or HTML page)
//! - `HttpFetcher`: reqwest client with domain allow-list, request pacing,
//!   retry with exponential backoff and a visited-request store

use crate::errors::IngestionError;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use paperharvest_common::cache::VisitedStore;
use paperharvest_common::config::FetchConfig;
use paperharvest_common::metrics;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Request pacing limiter
pub type FetchRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Kind of a fetched document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Xml,
    Html,
}

impl DocumentKind {
    /// From the content type, falling back to a look at the body
    pub fn detect(content_type: Option<&str>, body: &str) -> Self {
        if let Some(content_type) = content_type {
            let content_type = content_type.to_ascii_lowercase();
            if content_type.contains("xml") {
                return DocumentKind::Xml;
            }
            if content_type.contains("html") {
                return DocumentKind::Html;
            }
        }

        let head = body.trim_start();
        if head.starts_with("<?xml") || head.starts_with("<feed") {
            DocumentKind::Xml
        } else {
            DocumentKind::Html
        }
    }
}

/// Fetched document
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub kind: DocumentKind,
    pub body: String,
}

impl Document {
    /// Fail unless the document has the expected kind
    pub fn expect_kind(self, expected: DocumentKind) -> Result<Self, IngestionError> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(IngestionError::UnexpectedDocument {
                url: self.url,
                expected,
                found: self.kind,
            })
        }
    }
}

/// Crawl-engine boundary
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a URL, failing with `AlreadyVisited` when the visited store
    /// knows it and revisits are disabled
    async fn fetch(&self, url: &str) -> Result<Document, IngestionError>;

    /// Fetch a URL whose content changes over time, regardless of the visited store
    async fn refetch(&self, url: &str) -> Result<Document, IngestionError> {
        self.fetch(url).await
    }
}

/// Request fingerprint: SHA-256 hex of method and normalized URL
pub fn fingerprint(method: &str, url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b" ");
    hasher.update(normalized.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `host` is one of `allowed` or a subdomain of one. An empty list allows all.
pub fn is_domain_allowed(host: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}

/// HTTP fetcher for one site
pub struct HttpFetcher {
    client: Client,
    limiter: Arc<FetchRateLimiter>,
    allowed_domains: Vec<String>,
    visited: Arc<dyn VisitedStore>,
    allow_revisit: bool,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(
        config: &FetchConfig,
        allowed_domains: Vec<String>,
        visited: Arc<dyn VisitedStore>,
    ) -> Result<Self, IngestionError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_insecure_http)
            .build()
            .map_err(|e| IngestionError::ConfigError(format!("HTTP client: {}", e)))?;

        let quota = Quota::with_period(config.request_delay()).ok_or_else(
            || IngestionError::ConfigError("request_delay_ms must be positive".to_string()),
        )?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            allowed_domains,
            visited,
            allow_revisit: config.allow_revisit,
            max_retries: config.max_retries,
        })
    }

    async fn fetch_once(&self, url: &Url) -> Result<Document, IngestionError> {
        self.limiter.until_ready().await;

        let started = Instant::now();
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            metrics::record_fetch("error", started.elapsed().as_secs_f64());
            request_error(url, e)
        })?;

        let status = response.status();
        metrics::record_fetch(status.as_str(), started.elapsed().as_secs_f64());

        if !status.is_success() {
            return Err(IngestionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| request_error(url, e))?;

        Ok(Document {
            url: url.to_string(),
            kind: DocumentKind::detect(content_type.as_deref(), &body),
            body,
        })
    }
}

fn request_error(url: &Url, e: reqwest::Error) -> IngestionError {
    if e.is_timeout() {
        IngestionError::Timeout {
            url: url.to_string(),
        }
    } else {
        IngestionError::Http {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

impl HttpFetcher {
    #[instrument(skip(self))]
    async fn get(&self, url: &str, check_visited: bool) -> Result<Document, IngestionError> {
        let parsed = Url::parse(url).map_err(|e| IngestionError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let host = parsed.host_str().unwrap_or_default();
        if !is_domain_allowed(host, &self.allowed_domains) {
            return Err(IngestionError::DomainNotAllowed {
                url: url.to_string(),
            });
        }

        let key = fingerprint("GET", &parsed);
        if check_visited && !self.allow_revisit && self.visited.is_visited(&key).await? {
            return Err(IngestionError::AlreadyVisited {
                url: url.to_string(),
            });
        }

        let attempts = &AtomicU32::new(0);
        let target = &parsed;
        let policy = ExponentialBackoff {
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let document = retry(policy, || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            match self.fetch_once(target).await {
                Ok(doc) => Ok(doc),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(error = %e, attempt, "Transient fetch failure, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        self.visited.mark_visited(&key).await?;
        debug!(bytes = document.body.len(), "Fetched");
        Ok(document)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, IngestionError> {
        self.get(url, true).await
    }

    async fn refetch(&self, url: &str) -> Result<Document, IngestionError> {
        self.get(url, false).await
    }
}
