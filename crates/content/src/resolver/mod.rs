//! Cross-publisher dependency resolution
//!
//! A manifest may declare dependencies that live in another publisher's
//! catalog. Resolution is best-effort: for each dependency that is not
//! already installed, the resolver parses the structured id, finds a
//! subscription for the publisher segment, fetches that publisher's catalog
//! (size-capped, retried) and matches entries by the content-name segment.
//! A dependency that cannot be resolved is reported, never fatal.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use futures::StreamExt;

use crate::catalog::{PublisherCatalog, PublisherSubscriptionStore};
use crate::discovery::ContentSearchResult;
use crate::error::ContentError;
use crate::manifest::{ContentDependency, ContentManifest, ManifestId};
use crate::pool::ContentManifestPool;

/// Errors raised by catalog fetching and dependency resolution
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid catalog url '{url}'")]
    InvalidCatalogUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("catalog request to '{url}' failed")]
    CatalogRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Rejected before parsing: a hostile or broken catalog host must not
    /// be able to balloon memory use
    #[error("catalog at '{url}' exceeds the size cap ({actual} > {limit} bytes)")]
    CatalogTooLarge { url: String, limit: u64, actual: u64 },

    #[error("catalog at '{url}' is malformed")]
    CatalogMalformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Fail-secure: verification is not implemented, so a signed catalog is
    /// rejected rather than accepted unchecked
    #[error("catalog at '{url}' is signed and signature verification is unsupported")]
    CatalogSigned { url: String },

    #[error(transparent)]
    Store(#[from] ContentError),

    #[error("operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },
}

impl ResolveError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResolveError::Cancelled { .. } | ResolveError::Store(ContentError::Cancelled { .. })
        )
    }
}

/// Tuning knobs for catalog fetching
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Hard cap on catalog size; larger responses are rejected before parsing
    pub max_catalog_bytes: u64,
    pub timeout: Duration,
    pub max_retries: usize,
    /// Exponential backoff base (delay grows as base^attempt ms)
    pub retry_base_millis: u64,
    pub max_retry_delay: Duration,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_catalog_bytes: 4 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_millis: 10,
            max_retry_delay: Duration::from_secs(5),
            user_agent: "content/0.1.0".to_string(),
        }
    }
}

/// A fetched, accepted catalog plus its change-detection fingerprint
#[derive(Debug, Clone)]
pub struct FetchedCatalog {
    pub catalog: PublisherCatalog,
    /// xxh64/base64 of the raw document bytes
    pub fingerprint: String,
}

/// Convert an xxHash64 value to its compact base64 form
fn xxhash64_to_base64(hash: u64) -> String {
    let bytes = hash.to_le_bytes();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

/// HTTP catalog fetcher with retry and size enforcement
pub struct CatalogFetcher {
    client: reqwest::Client,
    config: ResolverConfig,
}

impl CatalogFetcher {
    pub fn new(config: ResolverConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch and parse one publisher catalog
    ///
    /// The size cap is enforced twice: against the declared Content-Length
    /// before the body is read, and against the streamed byte count while
    /// reading (a host that lies about its Content-Length gains nothing).
    pub async fn fetch_catalog(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedCatalog, ResolveError> {
        let parsed = url::Url::parse(url).map_err(|source| ResolveError::InvalidCatalogUrl {
            url: url.to_string(),
            source,
        })?;

        let strategy = ExponentialBackoff::from_millis(self.config.retry_base_millis)
            .max_delay(self.config.max_retry_delay)
            .map(jitter)
            .take(self.config.max_retries);

        let response = Retry::spawn(strategy, || {
            let client = self.client.clone();
            let endpoint = parsed.clone();
            async move { client.get(endpoint).send().await?.error_for_status() }
        })
        .await
        .map_err(|source| ResolveError::CatalogRequest {
            url: url.to_string(),
            source,
        })?;

        let limit = self.config.max_catalog_bytes;
        if let Some(declared) = response.content_length() {
            if declared > limit {
                return Err(ResolveError::CatalogTooLarge {
                    url: url.to_string(),
                    limit,
                    actual: declared,
                });
            }
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled {
                    operation: "fetch catalog",
                });
            }
            let chunk = chunk.map_err(|source| ResolveError::CatalogRequest {
                url: url.to_string(),
                source,
            })?;
            let total = body.len() as u64 + chunk.len() as u64;
            if total > limit {
                return Err(ResolveError::CatalogTooLarge {
                    url: url.to_string(),
                    limit,
                    actual: total,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let catalog: PublisherCatalog =
            serde_json::from_slice(&body).map_err(|source| ResolveError::CatalogMalformed {
                url: url.to_string(),
                source,
            })?;

        if catalog.is_signed() {
            return Err(ResolveError::CatalogSigned {
                url: url.to_string(),
            });
        }

        let fingerprint = xxhash64_to_base64(xxhash_rust::xxh64::xxh64(&body, 0));
        debug!(url, bytes = body.len(), entries = catalog.entries.len(), "fetched catalog");

        Ok(FetchedCatalog {
            catalog,
            fingerprint,
        })
    }
}

/// A declared dependency that is not installed
///
/// `resolution` carries the catalog match when one was found; `None` means
/// the dependency is reported but could not be resolved.
#[derive(Debug, Clone)]
pub struct MissingDependency {
    pub dependency: ContentDependency,
    pub resolution: Option<ContentSearchResult>,
}

/// Resolves missing manifest dependencies across publisher catalogs
pub struct DependencyResolver {
    pool: Arc<ContentManifestPool>,
    subscriptions: Arc<PublisherSubscriptionStore>,
    fetcher: CatalogFetcher,
}

impl DependencyResolver {
    pub fn new(
        pool: Arc<ContentManifestPool>,
        subscriptions: Arc<PublisherSubscriptionStore>,
        fetcher: CatalogFetcher,
    ) -> Self {
        Self {
            pool,
            subscriptions,
            fetcher,
        }
    }

    /// Report every declared dependency that is not in the pool
    ///
    /// Best-effort per dependency: a failed catalog fetch or an
    /// unresolvable id downgrades that entry to "missing, unresolved"
    /// instead of failing the whole check. Cancellation still propagates.
    #[instrument(skip_all, fields(manifest = %manifest.id))]
    pub async fn check_missing_dependencies(
        &self,
        manifest: &ContentManifest,
        cancel: &CancellationToken,
    ) -> Result<Vec<MissingDependency>, ResolveError> {
        let mut missing = Vec::new();

        for dependency in &manifest.dependencies {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled {
                    operation: "check missing dependencies",
                });
            }

            let installed = self
                .pool
                .get_manifest(&ManifestId::new_unchecked(dependency.id.as_str()), cancel)
                .await
                .map_err(ResolveError::Store)?;
            if installed.is_some() {
                continue;
            }

            let resolution = match self.resolve_dependency(dependency, cancel).await {
                Ok(resolution) => resolution,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(dependency = %dependency.id, error = %e,
                        "dependency resolution failed, reporting as unresolved");
                    None
                }
            };

            missing.push(MissingDependency {
                dependency: dependency.clone(),
                resolution,
            });
        }

        Ok(missing)
    }

    /// Try to resolve one dependency from its publisher's catalog
    async fn resolve_dependency(
        &self,
        dependency: &ContentDependency,
        cancel: &CancellationToken,
    ) -> Result<Option<ContentSearchResult>, ResolveError> {
        // The 5-segment contract puts the publisher at index 2 and the
        // content name at index 4; a dependency id that does not parse
        // cannot be located in any catalog.
        let id = match ManifestId::create(dependency.id.as_str()) {
            Ok(id) => id,
            Err(e) => {
                warn!(dependency = %dependency.id, error = %e, "dependency id is malformed");
                return Ok(None);
            }
        };
        let (Some(publisher), Some(content_name)) = (id.publisher(), id.content_name()) else {
            return Ok(None);
        };

        let Some(subscription) = self
            .subscriptions
            .find_by_publisher(publisher, cancel)
            .await?
        else {
            debug!(publisher, "no subscription for dependency publisher");
            return Ok(None);
        };

        let fetched = self
            .fetcher
            .fetch_catalog(&subscription.catalog_url, cancel)
            .await?;

        if let Err(e) = self
            .subscriptions
            .record_fingerprint(&subscription.publisher, &fetched.fingerprint, cancel)
            .await
        {
            warn!(publisher = %subscription.publisher, error = %e,
                "failed to record catalog fingerprint");
        }

        let matched = fetched
            .catalog
            .entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(content_name));

        Ok(matched.map(|entry| {
            entry.to_search_result(&format!("catalog:{}", subscription.publisher))
        }))
    }
}
