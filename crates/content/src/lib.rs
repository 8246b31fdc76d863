//! Content Pipeline Library
//!
//! This library provides the content acquisition and reconciliation core of
//! a Generals / Zero Hour mod manager: hash-addressed content manifests, a
//! deduplicated content-addressable store with safe garbage collection, the
//! manifest pool, and the reconciliation service that keeps every profile
//! consistent when content is replaced or removed.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use content::{CasService, ContentManifestBuilder, ContentManifestPool, ManifestId};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> content::Result<()> {
//! // A file-backed CAS and the manifest pool on top of it
//! let cas = Arc::new(CasService::with_root("./store"));
//! let pool = ContentManifestPool::new("./manifests", Arc::clone(&cas));
//!
//! // Describe a piece of content
//! let id = ManifestId::create("1.0.aod.mappack.desert-pack")?;
//! let manifest = ContentManifestBuilder::new(id, "Desert Pack", "1.0")
//!     .description("A pack of desert maps")
//!     .extracted_file("Data/Maps/dune.map", 2048)?
//!     .build()?;
//!
//! // Add it: file bodies are ingested into the CAS and the entries
//! // rewritten to content-addressable form
//! let cancel = CancellationToken::new();
//! let stored = pool
//!     .add_manifest(manifest, Some(std::path::Path::new("./delivered")), &cancel)
//!     .await?;
//!
//! // Track its references so garbage collection stays safe
//! cas.track_manifest_references(&stored.id, &stored, &cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Structured manifest ids**: validated 5-segment identifiers with
//!   case-insensitive identity throughout
//! - **Immutable manifests**: content updates are new manifests routed
//!   through reconciliation, never in-place edits
//! - **Safe garbage collection**: per-manifest reference tracking, a grace
//!   period for freshly ingested objects, and strict untrack-before-remove
//!   ordering
//! - **Profile reconciliation**: bulk replacement and removal across every
//!   affected profile, fail-closed game-client rebuilds, workspace
//!   invalidation, fire-and-forget change notifications
//! - **Version selection**: display-policy filtering of discovered releases
//! - **Cross-publisher dependencies**: size-capped catalog fetches and
//!   best-effort resolution against subscribed publishers
//! - **Async/await**: Tokio throughout, with cancellation tokens honored at
//!   every suspension point

pub mod catalog;
pub mod cas;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod pool;
pub mod profiles;
pub mod reconcile;
pub mod resolver;

// Re-export commonly used types for convenience
pub use cas::{
    CasConfig, CasObject, CasReferenceTracker, CasService, CasStorage, FileCasStorage, GcSummary,
    IntegrityReport,
};
pub use catalog::{
    CatalogEntry, PublisherCatalog, PublisherSubscription, PublisherSubscriptionStore, TrustLevel,
};
pub use discovery::{ContentSearchResult, VersionDisplayPolicy, select_releases};
pub use error::{ContentError, Result, StorageOperation};
pub use manifest::{
    ContentDependency, ContentManifest, ContentManifestBuilder, ContentType, GameType,
    InstallBehavior, InstallTarget, InstallationInstructions, ManifestFile,
    ManifestFileSourceType, ManifestId, ManifestIdError, PublisherInfo, WorkspaceStrategy,
};
pub use pool::ContentManifestPool;
pub use profiles::{
    GameClient, GameProfile, ProfileManager, UpdateProfileRequest, WorkspaceManager,
};
pub use reconcile::{ChangeCallback, ContentChangedEvent, ContentReconciler};
pub use resolver::{
    CatalogFetcher, DependencyResolver, FetchedCatalog, MissingDependency, ResolveError,
    ResolverConfig,
};
