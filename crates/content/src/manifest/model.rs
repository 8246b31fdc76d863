//! Content manifest model
//!
//! A `ContentManifest` is the immutable description of one piece of
//! installable content: its identity, metadata, dependencies and file set.
//! Manifests persist as JSON and must round-trip losslessly, so every field
//! here is serde-visible. Once a manifest has been added to the pool it is
//! never mutated; content updates produce a new manifest (usually with a new
//! id) and go through the reconciliation service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ContentError, Result};
use crate::manifest::id::ManifestId;

/// Kinds of installable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    GameClient,
    Mod,
    Patch,
    Map,
    MapPack,
    Addon,
    Skin,
    LanguagePack,
    ModdingTool,
    Video,
    UnknownContentType,
}

/// The game a piece of content targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    Generals,
    ZeroHour,
}

/// Where a manifest file's bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestFileSourceType {
    /// Stored in the content-addressable store, keyed by `hash`
    ContentAddressable,
    /// Produced by extracting a delivered package
    ExtractedPackage,
    /// Fetched from `download_url` at install time
    Download,
    /// Referenced in place on the local filesystem
    LocalFile,
}

/// Destination category a file is routed to at workspace-build time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallTarget {
    Workspace,
    UserMapsDirectory,
    UserReplaysDirectory,
    UserScreenshotsDirectory,
}

/// How a declared dependency is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallBehavior {
    AutoInstall,
    Manual,
}

/// Strategy used to materialize a profile workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceStrategy {
    FullCopy,
    SymlinkOnly,
    HardLinkOnly,
    HybridCopySymlink,
}

/// Publisher identity attached to a manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublisherInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub publisher_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Descriptive metadata for presentation and search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    /// Alternate variants of this content (e.g. quality tiers), if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
}

/// A dependency declared by one manifest on another piece of content
///
/// The id may point into a different publisher's catalog; the dependency
/// resolver handles that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDependency {
    /// Manifest id string of the dependency (5-segment form)
    pub id: String,
    /// What kind of content the dependency is
    pub dependency_type: ContentType,
    pub install_behavior: InstallBehavior,
}

/// One file entry in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Normalized relative path: forward slashes, no leading `./`
    pub relative_path: String,
    #[serde(default)]
    pub size: u64,
    /// Content hash; required when `source_type` is ContentAddressable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub source_type: ManifestFileSourceType,
    #[serde(default)]
    pub is_executable: bool,
    #[serde(default = "InstallTarget::default_target")]
    pub install_target: InstallTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Path within the delivered package this entry was produced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl InstallTarget {
    fn default_target() -> Self {
        InstallTarget::Workspace
    }
}

/// A single pre- or post-install step carried in the instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

/// Instructions consumed by the workspace materializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationInstructions {
    pub workspace_strategy: WorkspaceStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_install_steps: Vec<InstallStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_install_steps: Vec<InstallStep>,
}

impl Default for InstallationInstructions {
    fn default() -> Self {
        Self {
            workspace_strategy: WorkspaceStrategy::HybridCopySymlink,
            pre_install_steps: Vec::new(),
            post_install_steps: Vec::new(),
        }
    }
}

/// Reference from one manifest to related content (not a dependency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReference {
    pub id: String,
    pub content_type: ContentType,
}

/// The unit of installable content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentManifest {
    pub id: ManifestId,
    pub name: String,
    pub version: String,
    /// Schema revision of the manifest format itself
    pub manifest_version: u32,
    pub content_type: ContentType,
    pub target_game: GameType,
    #[serde(default)]
    pub publisher: PublisherInfo,
    #[serde(default)]
    pub metadata: ContentMetadata,
    #[serde(default)]
    pub dependencies: Vec<ContentDependency>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
    #[serde(default)]
    pub installation: InstallationInstructions,
    /// Directories that must exist in the workspace even when empty
    #[serde(default)]
    pub required_directories: Vec<String>,
    #[serde(default)]
    pub content_references: Vec<ContentReference>,
    /// Ids of addons known to be compatible with this content
    #[serde(default)]
    pub known_addons: Vec<String>,
}

impl ContentManifest {
    /// Check the structural invariants of a manifest
    ///
    /// - file entries are unique by relative path (case-insensitive)
    /// - every ContentAddressable entry carries a non-empty hash
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            let key = file.relative_path.to_ascii_lowercase();
            if !seen.insert(key) {
                return Err(ContentError::InvalidManifest {
                    id: self.id.to_string(),
                    reason: format!("duplicate file entry '{}'", file.relative_path),
                });
            }

            if file.source_type == ManifestFileSourceType::ContentAddressable
                && file.hash.as_deref().map_or(true, |h| h.trim().is_empty())
            {
                return Err(ContentError::InvalidManifest {
                    id: self.id.to_string(),
                    reason: format!(
                        "content-addressable entry '{}' has no content hash",
                        file.relative_path
                    ),
                });
            }
        }
        Ok(())
    }

    /// Hashes of all content-addressable file bodies in this manifest
    pub fn content_addressable_hashes(&self) -> impl Iterator<Item = &str> {
        self.files.iter().filter_map(|file| {
            if file.source_type == ManifestFileSourceType::ContentAddressable {
                file.hash.as_deref().filter(|h| !h.is_empty())
            } else {
                None
            }
        })
    }
}

/// Normalize a manifest-relative path
///
/// Backslashes become forward slashes, a leading `./` is stripped, and empty
/// or parent-directory components are rejected (a manifest must never reach
/// outside its install root).
pub fn normalize_relative_path(path: &str) -> Result<String> {
    let forward = path.replace('\\', "/");
    let trimmed = forward.strip_prefix("./").unwrap_or(&forward);

    if trimmed.is_empty() {
        return Err(ContentError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    if trimmed.starts_with('/') {
        return Err(ContentError::InvalidPath {
            path: path.to_string(),
            reason: "path must be relative".to_string(),
        });
    }
    for component in trimmed.split('/') {
        if component.is_empty() {
            return Err(ContentError::InvalidPath {
                path: path.to_string(),
                reason: "path contains an empty component".to_string(),
            });
        }
        if component == ".." {
            return Err(ContentError::InvalidPath {
                path: path.to_string(),
                reason: "path escapes the install root".to_string(),
            });
        }
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with_files(files: Vec<ManifestFile>) -> ContentManifest {
        ContentManifest {
            id: ManifestId::create("1.0.testpub.mod.sample").unwrap(),
            name: "Sample".to_string(),
            version: "1.0".to_string(),
            manifest_version: 1,
            content_type: ContentType::Mod,
            target_game: GameType::ZeroHour,
            publisher: PublisherInfo::default(),
            metadata: ContentMetadata::default(),
            dependencies: Vec::new(),
            files,
            installation: InstallationInstructions::default(),
            required_directories: Vec::new(),
            content_references: Vec::new(),
            known_addons: Vec::new(),
        }
    }

    fn cas_file(path: &str, hash: Option<&str>) -> ManifestFile {
        ManifestFile {
            relative_path: path.to_string(),
            size: 10,
            hash: hash.map(str::to_string),
            source_type: ManifestFileSourceType::ContentAddressable,
            is_executable: false,
            install_target: InstallTarget::Workspace,
            download_url: None,
            source_path: None,
        }
    }

    #[test]
    fn normalize_strips_dot_prefix_and_backslashes() {
        assert_eq!(
            normalize_relative_path("./Data\\Maps/alpine.map").unwrap(),
            "Data/Maps/alpine.map"
        );
    }

    #[test]
    fn normalize_rejects_escapes_and_absolutes() {
        assert!(normalize_relative_path("../outside.txt").is_err());
        assert!(normalize_relative_path("maps/../../outside.txt").is_err());
        assert!(normalize_relative_path("/etc/passwd").is_err());
        assert!(normalize_relative_path("").is_err());
    }

    #[test]
    fn validate_rejects_duplicate_paths() {
        let manifest = manifest_with_files(vec![
            cas_file("Data/a.big", Some("aa")),
            cas_file("data/A.BIG", Some("bb")),
        ]);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn validate_requires_hash_for_content_addressable() {
        let manifest = manifest_with_files(vec![cas_file("Data/a.big", None)]);
        assert!(manifest.validate().is_err());

        let manifest = manifest_with_files(vec![cas_file("Data/a.big", Some("  "))]);
        assert!(manifest.validate().is_err());

        let manifest = manifest_with_files(vec![cas_file("Data/a.big", Some("abc123"))]);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn content_addressable_hashes_skips_other_source_types() {
        let mut download = cas_file("Data/b.big", None);
        download.source_type = ManifestFileSourceType::Download;
        download.download_url = Some("https://example.com/b.big".to_string());

        let manifest =
            manifest_with_files(vec![cas_file("Data/a.big", Some("abc123")), download]);
        let hashes: Vec<&str> = manifest.content_addressable_hashes().collect();
        assert_eq!(hashes, vec!["abc123"]);
    }

    #[test]
    fn manifest_round_trips_losslessly() {
        let mut manifest = manifest_with_files(vec![cas_file("Data/a.big", Some("abc123"))]);
        manifest.publisher = PublisherInfo {
            name: "Test Publisher".to_string(),
            publisher_type: "community".to_string(),
            website: Some("https://example.com".to_string()),
            contact: None,
        };
        manifest.dependencies.push(ContentDependency {
            id: "1.0.ea.gameclient.zerohour".to_string(),
            dependency_type: ContentType::GameClient,
            install_behavior: InstallBehavior::AutoInstall,
        });
        manifest.metadata.tags = vec!["maps".to_string()];
        manifest.required_directories = vec!["Data/Maps".to_string()];

        let json = serde_json::to_string_pretty(&manifest).unwrap();
        let back: ContentManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
