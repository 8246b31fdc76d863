//! Content-addressable storage layer
//!
//! Three pieces: the [`CasStorage`] object-store seam with its file-backed
//! implementation, the [`CasReferenceTracker`] that makes garbage
//! collection safe, and the [`CasService`] that ties them together for the
//! pool and the reconciliation service.

pub mod refs;
pub mod storage;

pub use refs::CasReferenceTracker;
pub use storage::{CasObject, CasObjectInfo, CasStorage, FileCasStorage, hash_file};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ContentError, Result};
use crate::manifest::{ContentManifest, ManifestId};

/// Tuning knobs for the CAS layer
#[derive(Debug, Clone)]
pub struct CasConfig {
    /// Unreferenced objects younger than this survive a non-forced GC.
    ///
    /// Covers the window between ingesting an object and tracking the
    /// manifest that references it.
    pub gc_grace_period: Duration,
    /// Maximum concurrent file ingests during pool adds
    pub max_concurrent_ingests: usize,
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            gc_grace_period: Duration::from_secs(60 * 60),
            max_concurrent_ingests: 4,
        }
    }
}

/// Outcome of one garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcSummary {
    /// Objects examined
    pub scanned: usize,
    /// Objects deleted
    pub deleted: usize,
    /// Bytes reclaimed by the deletions
    pub reclaimed_bytes: u64,
    /// Unreferenced objects left alone because they were inside the grace period
    pub skipped_recent: usize,
}

/// One corrupt object found by an integrity scan
#[derive(Debug, Clone)]
pub struct CorruptObject {
    pub hash: String,
    pub actual_hash: String,
    pub path: PathBuf,
}

/// Outcome of an integrity scan
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub scanned: usize,
    pub corrupt: Vec<CorruptObject>,
}

/// Facade over object storage plus reference tracking
///
/// Owns the GC decision logic; everything else delegates to the two parts.
pub struct CasService {
    storage: Arc<dyn CasStorage>,
    tracker: CasReferenceTracker,
    config: CasConfig,
}

impl CasService {
    pub fn new(storage: Arc<dyn CasStorage>, tracker: CasReferenceTracker, config: CasConfig) -> Self {
        Self {
            storage,
            tracker,
            config,
        }
    }

    /// File-backed service rooted at one directory, with defaults
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self::new(
            Arc::new(FileCasStorage::new(&root)),
            CasReferenceTracker::new(&root),
            CasConfig::default(),
        )
    }

    pub fn storage(&self) -> &Arc<dyn CasStorage> {
        &self.storage
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Ingest one file body into storage
    pub async fn ingest_file(&self, source: &Path, cancel: &CancellationToken) -> Result<CasObject> {
        self.storage.store_file(source, cancel).await
    }

    /// Record the hashes a manifest references (idempotent overwrite)
    pub async fn track_manifest_references(
        &self,
        id: &ManifestId,
        manifest: &ContentManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.tracker
            .track_manifest_references(id, manifest, cancel)
            .await
    }

    /// Forget a manifest's reference set
    pub async fn untrack_manifest(&self, id: &ManifestId, cancel: &CancellationToken) -> Result<()> {
        self.tracker.untrack_manifest(id, cancel).await
    }

    /// Delete every object no tracked manifest references
    ///
    /// Non-forced passes leave young unreferenced objects alone; `force`
    /// collects them too. Callers must sequence this strictly after the
    /// batch's untrack operations.
    pub async fn run_garbage_collection(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<GcSummary> {
        let live = self.tracker.referenced_hashes(cancel).await?;
        let objects = self.storage.list_objects(cancel).await?;
        let now = SystemTime::now();

        let mut summary = GcSummary {
            scanned: objects.len(),
            ..GcSummary::default()
        };

        for object in objects {
            if cancel.is_cancelled() {
                return Err(ContentError::Cancelled {
                    operation: "garbage collection",
                });
            }

            if live.contains(&object.hash.to_ascii_lowercase()) {
                continue;
            }

            if !force {
                let age = now
                    .duration_since(object.modified)
                    .unwrap_or(Duration::ZERO);
                if age < self.config.gc_grace_period {
                    summary.skipped_recent += 1;
                    continue;
                }
            }

            self.storage.remove_object(&object.hash).await?;
            summary.deleted += 1;
            summary.reclaimed_bytes += object.size;
        }

        info!(
            scanned = summary.scanned,
            deleted = summary.deleted,
            reclaimed_bytes = summary.reclaimed_bytes,
            skipped_recent = summary.skipped_recent,
            force,
            "garbage collection finished"
        );
        Ok(summary)
    }

    /// Re-hash every stored object and report mismatches
    pub async fn verify_integrity(&self, cancel: &CancellationToken) -> Result<IntegrityReport> {
        let objects = self.storage.list_objects(cancel).await?;
        let scanned = objects.len();

        let paths: Vec<(String, PathBuf)> = objects
            .into_iter()
            .map(|o| {
                let path = self.storage.object_path(&o.hash);
                (o.hash, path)
            })
            .collect();

        let corrupt = tokio::task::spawn_blocking(move || {
            paths
                .par_iter()
                .filter_map(|(hash, path)| {
                    let mut file = std::fs::File::open(path).ok()?;
                    let mut hasher = Sha256::new();
                    if std::io::copy(&mut file, &mut hasher).is_err() {
                        return None;
                    }
                    let actual = hex::encode(hasher.finalize());
                    if actual.eq_ignore_ascii_case(hash) {
                        None
                    } else {
                        Some(CorruptObject {
                            hash: hash.clone(),
                            actual_hash: actual,
                            path: path.clone(),
                        })
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ContentError::Task {
            operation: "integrity scan",
            message: e.to_string(),
        })?;

        if !corrupt.is_empty() {
            warn!(count = corrupt.len(), "integrity scan found corrupt objects");
        } else {
            debug!(scanned, "integrity scan found no corruption");
        }

        Ok(IntegrityReport { scanned, corrupt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ContentManifestBuilder, ContentType, GameType};
    use tempfile::tempdir;
    use tokio::fs;

    fn service(root: &Path, grace: Duration) -> CasService {
        CasService::new(
            Arc::new(FileCasStorage::new(root)),
            CasReferenceTracker::new(root),
            CasConfig {
                gc_grace_period: grace,
                ..CasConfig::default()
            },
        )
    }

    async fn ingest(service: &CasService, dir: &Path, name: &str, contents: &[u8]) -> CasObject {
        let path = dir.join(name);
        fs::write(&path, contents).await.unwrap();
        service
            .ingest_file(&path, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn manifest_referencing(id: &str, hashes: &[&str]) -> ContentManifest {
        let mut builder = ContentManifestBuilder::new(
            ManifestId::create(id).unwrap(),
            "Test",
            "1.0",
        )
        .content_type(ContentType::Mod)
        .target_game(GameType::ZeroHour);
        for (i, h) in hashes.iter().enumerate() {
            builder = builder
                .content_addressable_file(format!("Data/f{i}.big"), 1, *h)
                .unwrap();
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn gc_deletes_only_unreferenced_objects() {
        let dir = tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let kept = ingest(&service, dir.path(), "kept.bin", b"kept").await;
        let doomed = ingest(&service, dir.path(), "doomed.bin", b"doomed").await;

        let id = ManifestId::create("1.0.pub.mod.keeper").unwrap();
        service
            .track_manifest_references(
                &id,
                &manifest_referencing("1.0.pub.mod.keeper", &[&kept.hash]),
                &cancel,
            )
            .await
            .unwrap();

        let summary = service.run_garbage_collection(false, &cancel).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.reclaimed_bytes, doomed.size);
        assert!(service.storage().contains(&kept.hash).await.unwrap());
        assert!(!service.storage().contains(&doomed.hash).await.unwrap());
    }

    #[tokio::test]
    async fn grace_period_protects_young_objects_unless_forced() {
        let dir = tempdir().unwrap();
        let service = service(dir.path(), Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let fresh = ingest(&service, dir.path(), "fresh.bin", b"fresh").await;

        let summary = service.run_garbage_collection(false, &cancel).await.unwrap();
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.skipped_recent, 1);
        assert!(service.storage().contains(&fresh.hash).await.unwrap());

        let summary = service.run_garbage_collection(true, &cancel).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!service.storage().contains(&fresh.hash).await.unwrap());
    }

    #[tokio::test]
    async fn verify_integrity_flags_tampered_objects() {
        let dir = tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let good = ingest(&service, dir.path(), "good.bin", b"good bytes").await;
        let bad = ingest(&service, dir.path(), "bad.bin", b"original").await;

        let bad_path = service.storage().object_path(&bad.hash);
        fs::write(&bad_path, b"tampered").await.unwrap();

        let report = service.verify_integrity(&cancel).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.corrupt.len(), 1);
        assert_eq!(report.corrupt[0].hash, bad.hash);
        assert_ne!(report.corrupt[0].hash, good.hash);
    }

    #[tokio::test]
    async fn track_untrack_gc_never_reaps_a_tracked_object() {
        // Replacement flow ordering: track new, untrack old, then GC. The
        // object shared by both versions must survive every interleaving
        // point at which a GC pass could run.
        let dir = tempdir().unwrap();
        let service = service(dir.path(), Duration::ZERO);
        let cancel = CancellationToken::new();

        let shared = ingest(&service, dir.path(), "shared.bin", b"shared").await;
        let old_only = ingest(&service, dir.path(), "old.bin", b"old").await;
        let new_only = ingest(&service, dir.path(), "new.bin", b"new").await;

        let old_id = ManifestId::create("1.0.pub.mod.v1").unwrap();
        let new_id = ManifestId::create("1.0.pub.mod.v2").unwrap();

        service
            .track_manifest_references(
                &old_id,
                &manifest_referencing("1.0.pub.mod.v1", &[&shared.hash, &old_only.hash]),
                &cancel,
            )
            .await
            .unwrap();

        // GC between track-new and untrack-old must keep all three
        service
            .track_manifest_references(
                &new_id,
                &manifest_referencing("1.0.pub.mod.v2", &[&shared.hash, &new_only.hash]),
                &cancel,
            )
            .await
            .unwrap();
        service.run_garbage_collection(true, &cancel).await.unwrap();
        assert!(service.storage().contains(&shared.hash).await.unwrap());
        assert!(service.storage().contains(&old_only.hash).await.unwrap());
        assert!(service.storage().contains(&new_only.hash).await.unwrap());

        // After untracking the old id, only its exclusive object is collectible
        service.untrack_manifest(&old_id, &cancel).await.unwrap();
        let summary = service.run_garbage_collection(true, &cancel).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(service.storage().contains(&shared.hash).await.unwrap());
        assert!(service.storage().contains(&new_only.hash).await.unwrap());
        assert!(!service.storage().contains(&old_only.hash).await.unwrap());
    }
}
