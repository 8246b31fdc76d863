//! Publisher catalogs and subscriptions
//!
//! A publisher catalog is a JSON document hosted at the subscription's URL,
//! listing that publisher's releasable content. Catalogs may carry a
//! signature block; verification is not implemented, so a signed catalog is
//! rejected outright rather than accepted unchecked (an unsigned catalog is
//! accepted). Subscriptions live in a small file-backed store with an
//! instance-owned cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::discovery::ContentSearchResult;
use crate::error::{ContentError, Result, StorageOperation};
use crate::manifest::{ContentType, GameType};

const SUBSCRIPTIONS_FILENAME: &str = "subscriptions.json";

/// How much a subscribed publisher is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    Trusted,
    Community,
    Unknown,
}

/// A subscription to one publisher's catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherSubscription {
    /// Publisher name, matched case-insensitively against id segments
    pub publisher: String,
    pub catalog_url: String,
    pub trust: TrustLevel,
    /// xxh64/base64 fingerprint of the last successfully fetched catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_fingerprint: Option<String>,
}

/// Publisher block inside a catalog document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogPublisher {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Signature block; presence alone makes a catalog unusable for now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSignature {
    pub key_id: String,
    pub algorithm: String,
    pub value: String,
}

/// One publishable item in a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub content_type: ContentType,
    pub target_game: GameType,
    /// Manifest id the publisher assigned, when declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub latest: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CatalogEntry {
    /// Convert to the common discovery result shape
    pub fn to_search_result(&self, provider_name: &str) -> ContentSearchResult {
        ContentSearchResult {
            provider_name: provider_name.to_string(),
            manifest_id: self.manifest_id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            content_type: self.content_type,
            target_game: self.target_game,
            author: String::new(),
            description: String::new(),
            download_url: self.download_url.clone(),
            icon_url: self.icon_url.clone(),
            release_date: self.release_date,
            is_prerelease: self.prerelease,
            is_latest: self.latest,
            tags: self.tags.clone(),
        }
    }
}

/// A publisher's catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherCatalog {
    pub publisher: CatalogPublisher,
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<CatalogSignature>,
}

impl PublisherCatalog {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// File-backed store of publisher subscriptions
///
/// The backing file holds a JSON list. The parsed list is cached in the
/// instance behind a single-writer mutex and the cache is refreshed on
/// every write, so the file is re-read only when a fresh instance starts.
pub struct PublisherSubscriptionStore {
    path: PathBuf,
    state: Mutex<Option<Vec<PublisherSubscription>>>,
}

impl PublisherSubscriptionStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            path: dir.into().join(SUBSCRIPTIONS_FILENAME),
            state: Mutex::new(None),
        }
    }

    async fn load(&self, cache: &mut Option<Vec<PublisherSubscription>>) -> Result<()> {
        if cache.is_some() {
            return Ok(());
        }

        let subscriptions = match fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ContentError::Persistence {
                    path: self.path.clone(),
                    operation: "read",
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ContentError::io(&self.path, StorageOperation::Read, e)),
        };

        *cache = Some(subscriptions);
        Ok(())
    }

    async fn persist(&self, subscriptions: &[PublisherSubscription]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ContentError::io(parent, StorageOperation::CreateDir, e))?;
        }

        let bytes =
            serde_json::to_vec_pretty(subscriptions).map_err(|e| ContentError::Persistence {
                path: self.path.clone(),
                operation: "write",
                source: e,
            })?;

        let staging = self.path.with_extension("json.part");
        fs::write(&staging, &bytes)
            .await
            .map_err(|e| ContentError::io(&staging, StorageOperation::Write, e))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| ContentError::io(&self.path, StorageOperation::Rename, e))?;
        Ok(())
    }

    /// All subscriptions
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<PublisherSubscription>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "list subscriptions",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        Ok(guard.as_ref().expect("loaded above").clone())
    }

    /// Look a subscription up by publisher name, case-insensitively
    pub async fn find_by_publisher(
        &self,
        publisher: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<PublisherSubscription>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "find subscription",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        Ok(guard
            .as_ref()
            .expect("loaded above")
            .iter()
            .find(|s| s.publisher.eq_ignore_ascii_case(publisher))
            .cloned())
    }

    /// Insert or replace the subscription for a publisher
    pub async fn upsert(
        &self,
        subscription: PublisherSubscription,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "upsert subscription",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let subscriptions = guard.as_mut().expect("loaded above");

        match subscriptions
            .iter_mut()
            .find(|s| s.publisher.eq_ignore_ascii_case(&subscription.publisher))
        {
            Some(existing) => *existing = subscription,
            None => subscriptions.push(subscription),
        }

        self.persist(subscriptions).await
    }

    /// Record the fingerprint of the last successfully fetched catalog
    pub async fn record_fingerprint(
        &self,
        publisher: &str,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "record catalog fingerprint",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let subscriptions = guard.as_mut().expect("loaded above");

        let Some(subscription) = subscriptions
            .iter_mut()
            .find(|s| s.publisher.eq_ignore_ascii_case(publisher))
        else {
            debug!(publisher, "no subscription to record a fingerprint on");
            return Ok(());
        };

        subscription.last_fetched_fingerprint = Some(fingerprint.to_string());
        self.persist(subscriptions).await
    }
}
