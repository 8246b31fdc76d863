//! Error types for the content pipeline
//!
//! One enum covers the manifest model, the pool, the CAS layer and the
//! reconciliation service. Variants carry enough context (ids, paths, the
//! failed operation) to be actionable from a log line alone, because bulk
//! reconciliation surfaces per-item failures only through logs.

use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::id::{ManifestId, ManifestIdError};

/// Errors raised by the content pipeline core
#[derive(Error, Debug)]
pub enum ContentError {
    /// A manifest violates its structural invariants
    #[error("manifest '{id}' is invalid: {reason}")]
    InvalidManifest { id: String, reason: String },

    /// A manifest-relative path is malformed
    #[error("invalid relative path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Malformed manifest id
    #[error(transparent)]
    InvalidId(#[from] ManifestIdError),

    /// Lookup miss in the manifest pool
    #[error("manifest '{id}' is not in the pool")]
    ManifestNotFound { id: ManifestId },

    /// Duplicate add; replacement goes through reconciliation instead
    #[error("manifest '{id}' is already in the pool")]
    ManifestAlreadyExists { id: ManifestId },

    /// A manifest file entry needs ingestion but its source body is missing
    #[error("source file for '{relative_path}' not found under '{search_root}'")]
    MissingSourceFile {
        relative_path: String,
        search_root: PathBuf,
    },

    /// File system I/O failure with operation context
    #[error("storage {operation} failed on '{path}'")]
    Storage {
        path: PathBuf,
        operation: StorageOperation,
        #[source]
        source: std::io::Error,
    },

    /// Persistence (de)serialization failure
    #[error("failed to {operation} record at '{path}'")]
    Persistence {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A blocking hash/scan task failed to complete
    #[error("background task for {operation} failed: {message}")]
    Task {
        operation: &'static str,
        message: String,
    },

    /// Aggregate failure of a single-content-item update
    ///
    /// Completed sub-steps are not rolled back; a stale tracked reference
    /// only wastes space, while dropping a live one loses data.
    #[error("local update '{old_id}' -> '{new_id}' failed: {message}")]
    LocalUpdateFailed {
        old_id: ManifestId,
        new_id: ManifestId,
        message: String,
    },

    /// Operation cancelled via its cancellation token
    ///
    /// Never folded into another variant: callers must be able to
    /// distinguish "cancelled" from "failed".
    #[error("operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },
}

/// File system operations, for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Read,
    Write,
    Create,
    Delete,
    Rename,
    Metadata,
    CreateDir,
    List,
}

impl std::fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOperation::Read => write!(f, "read"),
            StorageOperation::Write => write!(f, "write"),
            StorageOperation::Create => write!(f, "create"),
            StorageOperation::Delete => write!(f, "delete"),
            StorageOperation::Rename => write!(f, "rename"),
            StorageOperation::Metadata => write!(f, "metadata"),
            StorageOperation::CreateDir => write!(f, "create-dir"),
            StorageOperation::List => write!(f, "list"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContentError>;

impl ContentError {
    /// Build a storage error with path and operation context
    pub fn io<P: Into<PathBuf>>(
        path: P,
        operation: StorageOperation,
        source: std::io::Error,
    ) -> Self {
        ContentError::Storage {
            path: path.into(),
            operation,
            source,
        }
    }

    /// True when the error is the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ContentError::Cancelled { .. })
    }

    /// Error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ContentError::InvalidManifest { .. } => "invalid_manifest",
            ContentError::InvalidPath { .. } => "invalid_path",
            ContentError::InvalidId(_) => "invalid_id",
            ContentError::ManifestNotFound { .. } => "manifest_not_found",
            ContentError::ManifestAlreadyExists { .. } => "manifest_already_exists",
            ContentError::MissingSourceFile { .. } => "missing_source_file",
            ContentError::Storage { .. } => "storage",
            ContentError::Persistence { .. } => "persistence",
            ContentError::Task { .. } => "task",
            ContentError::LocalUpdateFailed { .. } => "local_update_failed",
            ContentError::Cancelled { .. } => "cancelled",
        }
    }
}
