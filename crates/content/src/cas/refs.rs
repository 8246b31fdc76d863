//! CAS reference tracking
//!
//! Durable mapping from manifest id to the set of content hashes that
//! manifest references. Garbage collection consults the union of all
//! tracked sets; an object may be deleted only when no tracked manifest
//! references it. Tracking must therefore complete before any operation
//! that could trigger collection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ContentError, Result, StorageOperation};
use crate::manifest::{ContentManifest, ManifestId};

const REFS_FILENAME: &str = "references.json";

/// Persisted shape: lowercased manifest id -> sorted hash set
///
/// BTree containers keep the JSON stable across rewrites, which keeps the
/// file diffable and the tests deterministic.
type ReferenceSets = BTreeMap<String, BTreeSet<String>>;

/// Durable `ManifestId -> {content hashes}` map
///
/// The backing file is guarded by a single-writer mutex around every
/// read-modify-write; the parsed map is cached in the instance and
/// invalidated by writes (the cache simply holds the written state).
pub struct CasReferenceTracker {
    path: PathBuf,
    state: Mutex<Option<ReferenceSets>>,
}

impl CasReferenceTracker {
    /// Track references in a file under the given directory
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            path: dir.into().join(REFS_FILENAME),
            state: Mutex::new(None),
        }
    }

    fn key(id: &ManifestId) -> String {
        id.as_str().to_ascii_lowercase()
    }

    async fn load(&self, cache: &mut Option<ReferenceSets>) -> Result<()> {
        if cache.is_some() {
            return Ok(());
        }

        let sets = match fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ContentError::Persistence {
                    path: self.path.clone(),
                    operation: "read",
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ReferenceSets::new(),
            Err(e) => return Err(ContentError::io(&self.path, StorageOperation::Read, e)),
        };

        *cache = Some(sets);
        Ok(())
    }

    async fn persist(&self, sets: &ReferenceSets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ContentError::io(parent, StorageOperation::CreateDir, e))?;
        }

        let bytes = serde_json::to_vec_pretty(sets).map_err(|e| ContentError::Persistence {
            path: self.path.clone(),
            operation: "write",
            source: e,
        })?;

        // Staged write + rename: a crash mid-write must never truncate the
        // reference map, since a lost set makes live objects collectible.
        let staging = self.path.with_extension("json.part");
        fs::write(&staging, &bytes)
            .await
            .map_err(|e| ContentError::io(&staging, StorageOperation::Write, e))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| ContentError::io(&self.path, StorageOperation::Rename, e))?;
        Ok(())
    }

    /// Record the content hashes referenced by a manifest
    ///
    /// Idempotent: re-tracking an id overwrites its set rather than
    /// accumulating. Must be called before anything that could schedule
    /// garbage collection for the same content.
    pub async fn track_manifest_references(
        &self,
        id: &ManifestId,
        manifest: &ContentManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "track references",
            });
        }

        let hashes: BTreeSet<String> = manifest
            .content_addressable_hashes()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let sets = guard.as_mut().expect("loaded above");

        debug!(id = %id, count = hashes.len(), "tracking manifest references");
        sets.insert(Self::key(id), hashes);
        self.persist(sets).await
    }

    /// Forget a manifest's reference set
    ///
    /// Does not delete any objects; deletability is decided at GC time from
    /// the union of the remaining sets. Untracking an unknown id is a no-op.
    pub async fn untrack_manifest(&self, id: &ManifestId, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "untrack references",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let sets = guard.as_mut().expect("loaded above");

        if sets.remove(&Self::key(id)).is_none() {
            warn!(id = %id, "untrack requested for an id that was not tracked");
            return Ok(());
        }

        debug!(id = %id, "untracked manifest references");
        self.persist(sets).await
    }

    /// Union of every tracked manifest's hashes (the GC live set)
    pub async fn referenced_hashes(&self, cancel: &CancellationToken) -> Result<HashSet<String>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "collect referenced hashes",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let sets = guard.as_ref().expect("loaded above");

        Ok(sets.values().flatten().cloned().collect())
    }

    /// Ids currently holding a tracked reference set
    pub async fn tracked_ids(&self, cancel: &CancellationToken) -> Result<Vec<ManifestId>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "list tracked ids",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let sets = guard.as_ref().expect("loaded above");

        Ok(sets.keys().map(|key| ManifestId::new_unchecked(key.as_str())).collect())
    }
}
