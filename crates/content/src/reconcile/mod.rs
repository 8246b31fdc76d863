//! Content reconciliation service
//!
//! The orchestrator of the pipeline: when a manifest is replaced or
//! removed, every profile referencing it must be rewritten, stale
//! workspaces invalidated, CAS references kept consistent and garbage
//! collection scheduled. The service itself is stateless between calls; it
//! operates over the pool, the profile manager and the CAS layer.
//!
//! Ordering is the correctness backbone here: track the new manifest, then
//! mutate the pool, then untrack the old manifest, then remove it, then
//! collect garbage. Within a profile, the workspace is torn down before the
//! content list is rewritten, so a workspace never outlives the metadata
//! that described it.

pub mod events;

#[cfg(test)]
mod tests;

pub use events::{ChangeCallback, ContentChangedEvent};

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cas::{CasService, GcSummary};
use crate::error::{ContentError, Result};
use crate::manifest::{ContentManifest, ManifestId};
use crate::pool::ContentManifestPool;
use crate::profiles::{GameClient, ProfileManager, UpdateProfileRequest, WorkspaceManager};

/// Orchestrates manifest replacement, removal and cleanup across profiles
pub struct ContentReconciler {
    pool: Arc<ContentManifestPool>,
    profiles: Arc<dyn ProfileManager>,
    workspaces: Arc<dyn WorkspaceManager>,
    cas: Arc<CasService>,
    listeners: std::sync::Mutex<Vec<ChangeCallback>>,
}

impl ContentReconciler {
    pub fn new(
        pool: Arc<ContentManifestPool>,
        profiles: Arc<dyn ProfileManager>,
        workspaces: Arc<dyn WorkspaceManager>,
        cas: Arc<CasService>,
    ) -> Self {
        Self {
            pool,
            profiles,
            workspaces,
            cas,
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a callback for manifest replacement events
    pub fn subscribe(&self, callback: ChangeCallback) {
        self.listeners.lock().unwrap().push(callback);
    }

    fn notify_replacement(&self, old_id: &ManifestId, new_id: &ManifestId) {
        let event = ContentChangedEvent {
            old_id: old_id.clone(),
            new_id: new_id.clone(),
        };
        let listeners = self.listeners.lock().unwrap();
        debug!(old = %event.old_id, new = %event.new_id, listeners = listeners.len(),
            "broadcasting manifest replacement");
        for listener in listeners.iter() {
            listener(&event);
        }
    }

    /// Replace one manifest id across all profiles
    pub async fn reconcile_manifest_replacement(
        &self,
        old_id: &ManifestId,
        new_id: &ManifestId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut replacements = HashMap::new();
        replacements.insert(old_id.clone(), new_id.clone());
        self.reconcile_bulk_manifest_replacement(&replacements, cancel)
            .await
    }

    /// Replace many manifest ids across all profiles in one pass
    ///
    /// Profiles that reference none of the old ids are not touched at all
    /// (not even re-saved). A profile whose GameClient points at an old id
    /// is updated only if the replacement manifest can be resolved from the
    /// pool; otherwise that profile is skipped entirely rather than left
    /// with a dangling launch configuration. One failed profile does not
    /// abort the rest. Returns the number of profiles actually updated.
    #[instrument(skip_all, fields(replacements = replacements.len()))]
    pub async fn reconcile_bulk_manifest_replacement(
        &self,
        replacements: &HashMap<ManifestId, ManifestId>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if replacements.is_empty() {
            return Ok(0);
        }

        let profiles = self.profiles.get_all_profiles(cancel).await?;
        let mut updated = 0;

        for profile in &profiles {
            if cancel.is_cancelled() {
                return Err(ContentError::Cancelled {
                    operation: "bulk manifest replacement",
                });
            }

            let content_affected = profile
                .enabled_content_ids
                .iter()
                .any(|id| replacements.contains_key(&ManifestId::new_unchecked(id.as_str())));
            let client_affected = profile
                .game_client
                .as_ref()
                .is_some_and(|client| replacements.contains_key(&client.id));

            if !content_affected && !client_affected {
                continue;
            }

            match self
                .apply_replacement_to_profile(profile, replacements, cancel)
                .await
            {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(profile = %profile.id, error = %e,
                        "failed to reconcile profile, continuing with the rest");
                }
            }
        }

        info!(updated, total = profiles.len(), "bulk manifest replacement finished");

        for (old_id, new_id) in replacements {
            self.notify_replacement(old_id, new_id);
        }

        Ok(updated)
    }

    /// Rewrite one affected profile; Ok(false) means skipped (fail-closed)
    async fn apply_replacement_to_profile(
        &self,
        profile: &crate::profiles::GameProfile,
        replacements: &HashMap<ManifestId, ManifestId>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let mut request = UpdateProfileRequest::default();

        // Resolve the replacement client before touching anything else: if
        // it cannot be resolved the whole profile update is skipped, so no
        // partial effect (workspace teardown included) may happen first.
        if let Some(client) = &profile.game_client {
            if let Some(new_id) = replacements.get(&client.id) {
                match self.pool.get_manifest(new_id, cancel).await? {
                    Some(manifest) => {
                        request.game_client = Some(GameClient::from_manifest(
                            &manifest,
                            client.installation_id.clone(),
                        ));
                    }
                    None => {
                        warn!(profile = %profile.id, old = %client.id, new = %new_id,
                            "replacement game client not in pool, skipping profile");
                        return Ok(false);
                    }
                }
            }
        }

        request.enabled_content_ids = Some(substitute_ids(
            &profile.enabled_content_ids,
            replacements,
        ));

        // Tear the workspace down before the profile row changes, so a
        // workspace built from the old content never appears current.
        if profile.has_active_workspace() {
            let workspace_id = profile.active_workspace_id.as_deref().unwrap_or_default();
            if let Err(e) = self.workspaces.cleanup_workspace(workspace_id, cancel).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(profile = %profile.id, workspace = workspace_id, error = %e,
                    "workspace cleanup failed; clearing the reference anyway");
            }
            request.active_workspace_id = Some(String::new());
        }

        self.profiles
            .update_profile(&profile.id, request, cancel)
            .await?;
        Ok(true)
    }

    /// Remove one manifest id from every profile that enables it
    #[instrument(skip_all, fields(id = %manifest_id))]
    pub async fn reconcile_manifest_removal(
        &self,
        manifest_id: &ManifestId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let profiles = self.profiles.get_all_profiles(cancel).await?;
        let mut updated = 0;

        for profile in &profiles {
            if cancel.is_cancelled() {
                return Err(ContentError::Cancelled {
                    operation: "manifest removal",
                });
            }

            let remaining: Vec<String> = profile
                .enabled_content_ids
                .iter()
                .filter(|id| ManifestId::new_unchecked(id.as_str()) != *manifest_id)
                .cloned()
                .collect();

            if remaining.len() == profile.enabled_content_ids.len() {
                continue;
            }

            let mut request = UpdateProfileRequest {
                enabled_content_ids: Some(remaining),
                ..UpdateProfileRequest::default()
            };

            if profile.has_active_workspace() {
                let workspace_id = profile.active_workspace_id.as_deref().unwrap_or_default();
                if let Err(e) = self.workspaces.cleanup_workspace(workspace_id, cancel).await {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    warn!(profile = %profile.id, workspace = workspace_id, error = %e,
                        "workspace cleanup failed; clearing the reference anyway");
                }
                request.active_workspace_id = Some(String::new());
            }

            match self.profiles.update_profile(&profile.id, request, cancel).await {
                Ok(_) => updated += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(profile = %profile.id, error = %e,
                        "failed to update profile during removal, continuing");
                }
            }
        }

        info!(updated, "manifest removal finished");
        Ok(updated)
    }

    /// Single-content-item update path
    ///
    /// Strict ordering, each step a correctness requirement:
    /// 1. track the new manifest's CAS references;
    /// 2. id changed: ensure the new manifest is pooled, then run the
    ///    single-pair bulk replacement; id unchanged: the identity-based
    ///    checks elsewhere cannot see a content change, so instead tear
    ///    down every workspace of every profile enabling the id;
    /// 3. id changed: untrack the old id, then remove it from the pool —
    ///    untrack-before-remove keeps a concurrent GC scan from ever
    ///    seeing the old hashes as unreferenced while still pooled.
    ///
    /// Any failure surfaces as one aggregate error; completed sub-steps are
    /// not rolled back (a stale tracked reference wastes space, a dropped
    /// live reference loses data).
    #[instrument(skip_all, fields(old = %old_id, new = %new_manifest.id))]
    pub async fn orchestrate_local_update(
        &self,
        old_id: &ManifestId,
        new_manifest: &ContentManifest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let new_id = new_manifest.id.clone();

        let outcome = self
            .run_local_update(old_id, new_manifest, cancel)
            .await;

        match outcome {
            Ok(updated) => Ok(updated),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(ContentError::LocalUpdateFailed {
                old_id: old_id.clone(),
                new_id,
                message: e.to_string(),
            }),
        }
    }

    async fn run_local_update(
        &self,
        old_id: &ManifestId,
        new_manifest: &ContentManifest,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let new_id = &new_manifest.id;

        self.cas
            .track_manifest_references(new_id, new_manifest, cancel)
            .await?;

        if new_id == old_id {
            debug!("manifest identity unchanged, invalidating workspaces only");
            return self.invalidate_workspaces_for(new_id, cancel).await;
        }

        // The caller's own pool insert may still be in flight; make sure
        // the replacement is resolvable before profiles start pointing at it.
        if self.pool.get_manifest(new_id, cancel).await?.is_none() {
            match self.pool.add_manifest(new_manifest.clone(), None, cancel).await {
                Ok(_) => {}
                Err(ContentError::ManifestAlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let updated = self
            .reconcile_manifest_replacement(old_id, new_id, cancel)
            .await?;

        self.cas.untrack_manifest(old_id, cancel).await?;
        self.pool.remove_manifest(old_id, cancel).await?;

        Ok(updated)
    }

    /// Tear down the workspace of every profile enabling an id
    ///
    /// Used when a manifest's contents changed under the same identity.
    async fn invalidate_workspaces_for(
        &self,
        id: &ManifestId,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let profiles = self.profiles.get_all_profiles(cancel).await?;
        let mut invalidated = 0;

        for profile in &profiles {
            if cancel.is_cancelled() {
                return Err(ContentError::Cancelled {
                    operation: "workspace invalidation",
                });
            }

            let enables = profile
                .enabled_content_ids
                .iter()
                .any(|s| ManifestId::new_unchecked(s.as_str()) == *id)
                || profile
                    .game_client
                    .as_ref()
                    .is_some_and(|client| client.id == *id);

            if !enables || !profile.has_active_workspace() {
                continue;
            }

            let workspace_id = profile.active_workspace_id.as_deref().unwrap_or_default();
            if let Err(e) = self.workspaces.cleanup_workspace(workspace_id, cancel).await {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(profile = %profile.id, workspace = workspace_id, error = %e,
                    "workspace cleanup failed; clearing the reference anyway");
            }

            let request = UpdateProfileRequest {
                active_workspace_id: Some(String::new()),
                ..UpdateProfileRequest::default()
            };

            match self.profiles.update_profile(&profile.id, request, cancel).await {
                Ok(_) => invalidated += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(profile = %profile.id, error = %e,
                        "failed to clear workspace reference, continuing");
                }
            }
        }

        Ok(invalidated)
    }

    /// Run CAS garbage collection
    ///
    /// Always called strictly after the batch's untrack operations, never
    /// interleaved with them.
    pub async fn schedule_garbage_collection(
        &self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<GcSummary> {
        self.cas.run_garbage_collection(force, cancel).await
    }
}

/// Substitute ids through the replacement map and deduplicate
///
/// Ids absent from the map pass through unchanged. Deduplication is
/// case-insensitive and keeps the first occurrence: a profile may already
/// have listed both an old id and its coincidentally-matching new id.
fn substitute_ids(
    ids: &[String],
    replacements: &HashMap<ManifestId, ManifestId>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(ids.len());

    for id in ids {
        let key = ManifestId::new_unchecked(id.as_str());
        let substituted = match replacements.get(&key) {
            Some(new_id) => new_id.as_str().to_string(),
            None => id.clone(),
        };
        if seen.insert(ManifestId::new_unchecked(substituted.as_str())) {
            result.push(substituted);
        }
    }

    result
}
