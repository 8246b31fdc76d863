//! Profile and workspace collaborator contracts
//!
//! Profiles are owned by the profile manager; workspaces by the workspace
//! manager. The reconciliation service only consumes these seams: it reads
//! profiles, submits partial updates, and asks for workspace teardown. The
//! traits mirror what those components guarantee, nothing more.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::manifest::{ContentManifest, ManifestId, WorkspaceStrategy};

/// A profile's selected game client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameClient {
    pub id: ManifestId,
    pub name: String,
    pub version: String,
    /// Link to the detected game installation this client belongs to.
    /// Preserved across client replacement.
    pub installation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
}

impl GameClient {
    /// Rebuild a client reference from a manifest, keeping the installation link
    pub fn from_manifest(manifest: &ContentManifest, installation_id: String) -> Self {
        let executable_path = manifest
            .files
            .iter()
            .find(|f| f.is_executable)
            .map(|f| f.relative_path.clone());

        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            installation_id,
            executable_path,
        }
    }
}

/// A user-defined named set of enabled content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfile {
    pub id: String,
    pub name: String,
    /// Manifest id strings of the enabled content, in load order
    #[serde(default)]
    pub enabled_content_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_client: Option<GameClient>,
    pub workspace_strategy: WorkspaceStrategy,
    /// Id of the materialized workspace, when one exists.
    /// Empty or absent means the profile has no active workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workspace_id: Option<String>,
}

impl GameProfile {
    /// Whether this profile currently has a materialized workspace
    pub fn has_active_workspace(&self) -> bool {
        self.active_workspace_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }
}

/// Partial update submitted to the profile manager
///
/// `None` on a field means "leave unchanged". Clearing
/// `active_workspace_id` therefore requires an explicit empty string.
/// Reconciliation never sets `workspace_strategy`: id-based updates must
/// preserve whatever strategy the profile had.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_content_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_client: Option<GameClient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_strategy: Option<WorkspaceStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_workspace_id: Option<String>,
}

/// Read/update seam onto the profile store
#[async_trait]
pub trait ProfileManager: Send + Sync {
    /// Every known profile
    async fn get_all_profiles(&self, cancel: &CancellationToken) -> Result<Vec<GameProfile>>;

    /// Apply a partial update to one profile
    async fn update_profile(
        &self,
        profile_id: &str,
        request: UpdateProfileRequest,
        cancel: &CancellationToken,
    ) -> Result<GameProfile>;
}

/// Teardown seam onto the workspace materializer
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Delete a materialized workspace and everything under it
    async fn cleanup_workspace(
        &self,
        workspace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
