//! Content manifest pool
//!
//! The canonical registry of every known manifest. Manifests persist as one
//! JSON document each; file bodies that are not yet content-addressable are
//! ingested into the CAS on add and their entries rewritten in the stored
//! manifest. Removal is deliberately decoupled from reference untracking
//! and garbage collection: the reconciliation service owns that ordering
//! (untrack, then remove, then GC).

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cas::{CasObject, CasService};
use crate::error::{ContentError, Result, StorageOperation};
use crate::manifest::{ContentManifest, ManifestFileSourceType, ManifestId};

const MANIFEST_EXTENSION: &str = "json";

type ManifestMap = HashMap<ManifestId, ContentManifest>;

/// File-backed registry of known manifests
///
/// A single mutex guards every read-modify-write of the backing directory;
/// the parsed map is cached per instance and refreshed lazily.
pub struct ContentManifestPool {
    dir: PathBuf,
    cas: Arc<CasService>,
    state: Mutex<Option<ManifestMap>>,
}

impl ContentManifestPool {
    pub fn new<P: Into<PathBuf>>(dir: P, cas: Arc<CasService>) -> Self {
        Self {
            dir: dir.into(),
            cas,
            state: Mutex::new(None),
        }
    }

    fn manifest_path(&self, id: &ManifestId) -> PathBuf {
        let sanitized: String = id
            .as_str()
            .to_ascii_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{sanitized}.{MANIFEST_EXTENSION}"))
    }

    async fn load(&self, cache: &mut Option<ManifestMap>) -> Result<()> {
        if cache.is_some() {
            return Ok(());
        }

        let mut map = ManifestMap::new();

        match fs::read_dir(&self.dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| ContentError::io(&self.dir, StorageOperation::List, e))?
                {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION) {
                        continue;
                    }
                    let bytes = fs::read(&path)
                        .await
                        .map_err(|e| ContentError::io(&path, StorageOperation::Read, e))?;
                    let manifest: ContentManifest =
                        serde_json::from_slice(&bytes).map_err(|e| ContentError::Persistence {
                            path: path.clone(),
                            operation: "read",
                            source: e,
                        })?;
                    map.insert(manifest.id.clone(), manifest);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ContentError::io(&self.dir, StorageOperation::List, e)),
        }

        *cache = Some(map);
        Ok(())
    }

    async fn persist(&self, manifest: &ContentManifest) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ContentError::io(&self.dir, StorageOperation::CreateDir, e))?;

        let path = self.manifest_path(&manifest.id);
        let bytes =
            serde_json::to_vec_pretty(manifest).map_err(|e| ContentError::Persistence {
                path: path.clone(),
                operation: "write",
                source: e,
            })?;

        let staging = path.with_extension("json.part");
        fs::write(&staging, &bytes)
            .await
            .map_err(|e| ContentError::io(&staging, StorageOperation::Write, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| ContentError::io(&path, StorageOperation::Rename, e))?;
        Ok(())
    }

    /// Ingest the bodies of entries that are not yet content-addressable
    ///
    /// Entries of type ExtractedPackage and LocalFile must have a body under
    /// `source_dir` (at `source_path` when set, else at `relative_path`);
    /// Download entries without a delivered body are left for install time.
    async fn ingest_sources(
        &self,
        manifest: &mut ContentManifest,
        source_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut jobs: Vec<(usize, PathBuf)> = Vec::new();

        for (index, file) in manifest.files.iter().enumerate() {
            if file.source_type == ManifestFileSourceType::ContentAddressable {
                continue;
            }

            let relative = file.source_path.as_deref().unwrap_or(&file.relative_path);
            let candidate = source_dir.join(relative);
            let exists = fs::try_exists(&candidate)
                .await
                .map_err(|e| ContentError::io(&candidate, StorageOperation::Metadata, e))?;

            if !exists {
                if file.source_type == ManifestFileSourceType::Download {
                    continue;
                }
                return Err(ContentError::MissingSourceFile {
                    relative_path: file.relative_path.clone(),
                    search_root: source_dir.to_path_buf(),
                });
            }

            jobs.push((index, candidate));
        }

        if jobs.is_empty() {
            return Ok(());
        }

        let concurrency = self.cas.config().max_concurrent_ingests.max(1);
        let results: Vec<Result<(usize, CasObject)>> = stream::iter(jobs)
            .map(|(index, path)| {
                let cas = Arc::clone(&self.cas);
                let cancel = cancel.clone();
                async move {
                    let object = cas.ingest_file(&path, &cancel).await?;
                    Ok((index, object))
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for result in results {
            let (index, object) = result?;
            let file = &mut manifest.files[index];
            file.hash = Some(object.hash);
            file.size = object.size;
            file.source_type = ManifestFileSourceType::ContentAddressable;
        }

        Ok(())
    }

    /// Add a manifest to the pool
    ///
    /// With a `source_dir`, not-yet-addressable file bodies are ingested
    /// into the CAS and their entries rewritten first. Returns the manifest
    /// as stored. Adding an id that is already pooled is rejected;
    /// replacement is a reconciliation operation.
    pub async fn add_manifest(
        &self,
        mut manifest: ContentManifest,
        source_dir: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ContentManifest> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "add manifest",
            });
        }

        if let Some(dir) = source_dir {
            self.ingest_sources(&mut manifest, dir, cancel).await?;
        }
        manifest.validate()?;

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let map = guard.as_mut().expect("loaded above");

        if map.contains_key(&manifest.id) {
            return Err(ContentError::ManifestAlreadyExists {
                id: manifest.id.clone(),
            });
        }

        self.persist(&manifest).await?;
        info!(id = %manifest.id, files = manifest.files.len(), "added manifest to pool");
        map.insert(manifest.id.clone(), manifest.clone());
        Ok(manifest)
    }

    /// Fetch one manifest by id
    pub async fn get_manifest(
        &self,
        id: &ManifestId,
        cancel: &CancellationToken,
    ) -> Result<Option<ContentManifest>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "get manifest",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        Ok(guard.as_ref().expect("loaded above").get(id).cloned())
    }

    /// Remove one manifest from the pool
    ///
    /// Returns whether an entry was removed. Does not untrack CAS
    /// references and does not collect garbage; callers sequence those.
    pub async fn remove_manifest(
        &self,
        id: &ManifestId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "remove manifest",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        let map = guard.as_mut().expect("loaded above");

        if map.remove(id).is_none() {
            warn!(id = %id, "remove requested for a manifest not in the pool");
            return Ok(false);
        }

        let path = self.manifest_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ContentError::io(&path, StorageOperation::Delete, e)),
        }

        debug!(id = %id, "removed manifest from pool");
        Ok(true)
    }

    /// All manifests currently in the pool
    pub async fn list_manifests(&self, cancel: &CancellationToken) -> Result<Vec<ContentManifest>> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "list manifests",
            });
        }

        let mut guard = self.state.lock().await;
        self.load(&mut guard).await?;
        Ok(guard.as_ref().expect("loaded above").values().cloned().collect())
    }
}
