//! File-backed content-addressable object storage
//!
//! Objects are keyed by the lowercase hex SHA-256 of their contents and live
//! under `objects/<first two hex chars>/<full hash>`. Ingestion stages into
//! a `.part` file next to the final location and renames it into place, so a
//! crashed ingest never leaves a readable half-object.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ContentError, Result, StorageOperation};

const OBJECTS_DIR: &str = "objects";
const HASH_BUFFER_SIZE: usize = 64 * 1024;

// Reusable read buffers for streaming hash computation
static BUFFER_POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn get_buffer() -> Vec<u8> {
    let mut pool = BUFFER_POOL.lock().unwrap();
    pool.pop().unwrap_or_else(|| vec![0u8; HASH_BUFFER_SIZE])
}

fn return_buffer(buf: Vec<u8>) {
    let mut pool = BUFFER_POOL.lock().unwrap();
    if pool.len() < 8 {
        pool.push(buf);
    }
}

/// Hash and size of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasObject {
    /// Lowercase hex SHA-256 of the object body
    pub hash: String,
    pub size: u64,
}

/// Listing entry for one stored object
#[derive(Debug, Clone)]
pub struct CasObjectInfo {
    pub hash: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Storage seam for content-addressable object bodies
///
/// The pipeline only needs these operations; alternative backends (remote
/// caches, read-only seeds) implement the same trait.
#[async_trait]
pub trait CasStorage: Send + Sync {
    /// Ingest one file body, returning its hash and size
    ///
    /// Idempotent: re-storing content that is already present is a no-op
    /// that returns the existing object.
    async fn store_file(&self, source: &Path, cancel: &CancellationToken) -> Result<CasObject>;

    /// Deterministic on-disk location for a hash (the object may not exist)
    fn object_path(&self, hash: &str) -> PathBuf;

    /// Whether an object body is present
    async fn contains(&self, hash: &str) -> Result<bool>;

    /// Enumerate every stored object
    async fn list_objects(&self, cancel: &CancellationToken) -> Result<Vec<CasObjectInfo>>;

    /// Delete one object body; deleting an absent object is a no-op
    async fn remove_object(&self, hash: &str) -> Result<()>;
}

/// Compute the lowercase hex SHA-256 of a file, streaming
///
/// Runs on the blocking pool; manifest packages can contain multi-gigabyte
/// `.big` archives.
pub async fn hash_file(path: &Path) -> Result<CasObject> {
    let path_buf = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> Result<CasObject> {
        let mut file = std::fs::File::open(&path_buf)
            .map_err(|e| ContentError::io(&path_buf, StorageOperation::Read, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = get_buffer();
        let mut size: u64 = 0;

        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| ContentError::io(&path_buf, StorageOperation::Read, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            size += read as u64;
        }

        return_buffer(buffer);
        Ok(CasObject {
            hash: hex::encode(hasher.finalize()),
            size,
        })
    })
    .await
    .map_err(|e| ContentError::Task {
        operation: "hash file",
        message: e.to_string(),
    })?;

    result
}

/// On-disk object store rooted at a single directory
pub struct FileCasStorage {
    objects_root: PathBuf,
}

impl FileCasStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            objects_root: root.into().join(OBJECTS_DIR),
        }
    }

    fn fanout(hash: &str) -> &str {
        // Hashes are 64 hex chars; anything shorter is caller error surfaced
        // at lookup time as a missing object.
        if hash.len() >= 2 { &hash[..2] } else { hash }
    }
}

#[async_trait]
impl CasStorage for FileCasStorage {
    async fn store_file(&self, source: &Path, cancel: &CancellationToken) -> Result<CasObject> {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled {
                operation: "store object",
            });
        }

        let object = hash_file(source).await?;
        let dest = self.object_path(&object.hash);

        if fs::try_exists(&dest)
            .await
            .map_err(|e| ContentError::io(&dest, StorageOperation::Metadata, e))?
        {
            debug!(hash = %object.hash, "object already stored, deduplicated");
            return Ok(object);
        }

        let parent = dest.parent().expect("object path always has a parent");
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ContentError::io(parent, StorageOperation::CreateDir, e))?;

        let staging = dest.with_extension("part");
        fs::copy(source, &staging)
            .await
            .map_err(|e| ContentError::io(&staging, StorageOperation::Write, e))?;
        fs::rename(&staging, &dest)
            .await
            .map_err(|e| ContentError::io(&dest, StorageOperation::Rename, e))?;

        debug!(hash = %object.hash, size = object.size, "stored object");
        Ok(object)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let hash = hash.to_ascii_lowercase();
        self.objects_root.join(Self::fanout(&hash)).join(&hash)
    }

    async fn contains(&self, hash: &str) -> Result<bool> {
        let path = self.object_path(hash);
        fs::try_exists(&path)
            .await
            .map_err(|e| ContentError::io(&path, StorageOperation::Metadata, e))
    }

    async fn list_objects(&self, cancel: &CancellationToken) -> Result<Vec<CasObjectInfo>> {
        let mut objects = Vec::new();

        if !fs::try_exists(&self.objects_root)
            .await
            .map_err(|e| ContentError::io(&self.objects_root, StorageOperation::Metadata, e))?
        {
            return Ok(objects);
        }

        let mut fanout_dirs = fs::read_dir(&self.objects_root)
            .await
            .map_err(|e| ContentError::io(&self.objects_root, StorageOperation::List, e))?;

        while let Some(fanout) = fanout_dirs
            .next_entry()
            .await
            .map_err(|e| ContentError::io(&self.objects_root, StorageOperation::List, e))?
        {
            if cancel.is_cancelled() {
                return Err(ContentError::Cancelled {
                    operation: "list objects",
                });
            }

            let fanout_path = fanout.path();
            if !fanout_path.is_dir() {
                continue;
            }

            let mut entries = fs::read_dir(&fanout_path)
                .await
                .map_err(|e| ContentError::io(&fanout_path, StorageOperation::List, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ContentError::io(&fanout_path, StorageOperation::List, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".part") {
                    // Abandoned staging file from an interrupted ingest
                    continue;
                }
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| ContentError::io(entry.path(), StorageOperation::Metadata, e))?;
                if !meta.is_file() {
                    continue;
                }
                objects.push(CasObjectInfo {
                    hash: name,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }

        Ok(objects)
    }

    async fn remove_object(&self, hash: &str) -> Result<()> {
        let path = self.object_path(hash);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(hash, "removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContentError::io(&path, StorageOperation::Delete, e)),
        }
    }
}
