//! Manifest identity and model types
//!
//! This module contains the fundamental value types the rest of the
//! pipeline depends on: the structured [`ManifestId`], the immutable
//! [`ContentManifest`] and its file entries, and the fluent builder used by
//! manifest factories.

pub mod builder;
pub mod id;
pub mod model;

pub use builder::ContentManifestBuilder;
pub use id::{ManifestId, ManifestIdError, MANIFEST_ID_SEGMENTS};
pub use model::{
    ContentDependency, ContentManifest, ContentMetadata, ContentReference, ContentType, GameType,
    InstallBehavior, InstallStep, InstallTarget, InstallationInstructions, ManifestFile,
    ManifestFileSourceType, PublisherInfo, WorkspaceStrategy, normalize_relative_path,
};
