//! Discovery types
//!
//! Site-specific discoverers (web catalogs, scraped listings, file system
//! scans) live outside this crate; all of them funnel their findings into
//! [`ContentSearchResult`]. The [`selector`] submodule decides which of an
//! item's releases are surfaced to the user.

pub mod selector;

pub use selector::{VersionDisplayPolicy, select_releases};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::{ContentType, GameType};

/// One discovered piece of content, as reported by a discoverer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSearchResult {
    /// Name of the discoverer that produced this result
    pub provider_name: String,
    /// Manifest id, when the provider already knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    pub name: String,
    pub version: String,
    pub content_type: ContentType,
    pub target_game: GameType,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_prerelease: bool,
    /// Provider-flagged "this is the latest release"
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}
