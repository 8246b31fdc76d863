//! Reconciliation service tests
//!
//! Collaborators are hand-rolled mocks that record every call, so the
//! tests can assert not just final state but which profiles were touched
//! at all (unaffected profiles must never reach the update contract).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::cas::CasService;
use crate::error::{ContentError, Result};
use crate::manifest::{
    ContentManifest, ContentManifestBuilder, ContentType, GameType, InstallTarget, ManifestFile,
    ManifestFileSourceType, ManifestId, WorkspaceStrategy,
};
use crate::pool::ContentManifestPool;
use crate::profiles::{
    GameClient, GameProfile, ProfileManager, UpdateProfileRequest, WorkspaceManager,
};
use crate::reconcile::ContentReconciler;

/// Profile manager mock that records update calls and applies them
struct MockProfileManager {
    profiles: Mutex<Vec<GameProfile>>,
    update_calls: Mutex<Vec<(String, UpdateProfileRequest)>>,
    /// Profile ids whose updates should fail
    failing: Vec<String>,
}

impl MockProfileManager {
    fn new(profiles: Vec<GameProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles),
            update_calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
        }
    }

    fn failing_for(mut self, profile_id: &str) -> Self {
        self.failing.push(profile_id.to_string());
        self
    }

    fn update_calls(&self) -> Vec<(String, UpdateProfileRequest)> {
        self.update_calls.lock().unwrap().clone()
    }

    fn profile(&self, id: &str) -> GameProfile {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .expect("profile exists")
    }
}

#[async_trait]
impl ProfileManager for MockProfileManager {
    async fn get_all_profiles(&self, _cancel: &CancellationToken) -> Result<Vec<GameProfile>> {
        Ok(self.profiles.lock().unwrap().clone())
    }

    async fn update_profile(
        &self,
        profile_id: &str,
        request: UpdateProfileRequest,
        _cancel: &CancellationToken,
    ) -> Result<GameProfile> {
        self.update_calls
            .lock()
            .unwrap()
            .push((profile_id.to_string(), request.clone()));

        if self.failing.iter().any(|id| id == profile_id) {
            return Err(ContentError::Task {
                operation: "update profile",
                message: "injected failure".to_string(),
            });
        }

        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == profile_id)
            .expect("profile exists");

        if let Some(name) = request.name {
            profile.name = name;
        }
        if let Some(ids) = request.enabled_content_ids {
            profile.enabled_content_ids = ids;
        }
        if let Some(client) = request.game_client {
            profile.game_client = Some(client);
        }
        if let Some(strategy) = request.workspace_strategy {
            profile.workspace_strategy = strategy;
        }
        if let Some(workspace_id) = request.active_workspace_id {
            profile.active_workspace_id = if workspace_id.is_empty() {
                None
            } else {
                Some(workspace_id)
            };
        }

        Ok(profile.clone())
    }
}

/// Workspace manager mock that records cleanups
#[derive(Default)]
struct MockWorkspaceManager {
    cleaned: Mutex<Vec<String>>,
}

impl MockWorkspaceManager {
    fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceManager for MockWorkspaceManager {
    async fn cleanup_workspace(
        &self,
        workspace_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.cleaned.lock().unwrap().push(workspace_id.to_string());
        Ok(())
    }
}

fn profile(id: &str, content_ids: &[&str]) -> GameProfile {
    GameProfile {
        id: id.to_string(),
        name: format!("Profile {id}"),
        enabled_content_ids: content_ids.iter().map(|s| s.to_string()).collect(),
        game_client: None,
        workspace_strategy: WorkspaceStrategy::HybridCopySymlink,
        active_workspace_id: None,
    }
}

fn simple_manifest(id: &str, name: &str) -> ContentManifest {
    ContentManifestBuilder::new(ManifestId::create(id).unwrap(), name, "1.0")
        .content_type(ContentType::Mod)
        .target_game(GameType::ZeroHour)
        .build()
        .unwrap()
}

fn client_manifest(id: &str, name: &str) -> ContentManifest {
    ContentManifestBuilder::new(ManifestId::create(id).unwrap(), name, "1.04")
        .content_type(ContentType::GameClient)
        .target_game(GameType::ZeroHour)
        .file(ManifestFile {
            relative_path: "generals.exe".to_string(),
            size: 4,
            hash: Some("cafe".to_string()),
            source_type: ManifestFileSourceType::ContentAddressable,
            is_executable: true,
            install_target: InstallTarget::Workspace,
            download_url: None,
            source_path: None,
        })
        .build()
        .unwrap()
}

struct Fixture {
    reconciler: ContentReconciler,
    profiles: Arc<MockProfileManager>,
    workspaces: Arc<MockWorkspaceManager>,
    pool: Arc<ContentManifestPool>,
    cas: Arc<CasService>,
    _root: tempfile::TempDir,
}

/// Make tracing output visible when a test is run with --nocapture
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn fixture(profiles: Vec<GameProfile>) -> Fixture {
    fixture_with(MockProfileManager::new(profiles))
}

fn fixture_with(profile_manager: MockProfileManager) -> Fixture {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let cas = Arc::new(CasService::with_root(root.path().join("cas")));
    let pool = Arc::new(ContentManifestPool::new(
        root.path().join("manifests"),
        Arc::clone(&cas),
    ));
    let profiles = Arc::new(profile_manager);
    let workspaces = Arc::new(MockWorkspaceManager::default());
    let reconciler = ContentReconciler::new(
        Arc::clone(&pool),
        Arc::clone(&profiles) as Arc<dyn ProfileManager>,
        Arc::clone(&workspaces) as Arc<dyn WorkspaceManager>,
        Arc::clone(&cas),
    );
    Fixture {
        reconciler,
        profiles,
        workspaces,
        pool,
        cas,
        _root: root,
    }
}

fn replacement_map(pairs: &[(&str, &str)]) -> HashMap<ManifestId, ManifestId> {
    pairs
        .iter()
        .map(|(old, new)| {
            (
                ManifestId::create(*old).unwrap(),
                ManifestId::create(*new).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn replacement_substitutes_without_duplicating() {
    // The profile already lists the new id (different case); substitution
    // must not produce it twice.
    let fx = fixture(vec![profile(
        "p1",
        &["1.0.pub.mod.a-old", "1.0.pub.mod.A-NEW"],
    )]);
    let cancel = CancellationToken::new();

    let updated = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 1);
    let rewritten = fx.profiles.profile("p1");
    assert_eq!(rewritten.enabled_content_ids, vec!["1.0.pub.mod.a-new"]);
}

#[tokio::test]
async fn unmapped_ids_pass_through_unchanged() {
    let fx = fixture(vec![profile(
        "p1",
        &["1.0.pub.mod.a-old", "1.0.pub.map.untouched"],
    )]);
    let cancel = CancellationToken::new();

    fx.reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap();

    let rewritten = fx.profiles.profile("p1");
    assert_eq!(
        rewritten.enabled_content_ids,
        vec!["1.0.pub.mod.a-new", "1.0.pub.map.untouched"]
    );
}

#[tokio::test]
async fn unaffected_profiles_are_never_submitted_for_update() {
    let fx = fixture(vec![
        profile("affected", &["1.0.pub.mod.a-old"]),
        profile("bystander", &["1.0.pub.map.other"]),
    ]);
    let cancel = CancellationToken::new();

    let updated = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 1);
    let calls = fx.profiles.update_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "affected");
}

#[tokio::test]
async fn game_client_replacement_is_fail_closed() {
    // The replacement manifest is NOT in the pool: the profile update must
    // be skipped entirely, including workspace teardown.
    let mut p = profile("p1", &["1.0.ea.gameclient.gen-old"]);
    p.game_client = Some(GameClient {
        id: ManifestId::create("1.0.ea.gameclient.gen-old").unwrap(),
        name: "Old Client".to_string(),
        version: "1.0".to_string(),
        installation_id: "install-1".to_string(),
        executable_path: None,
    });
    p.active_workspace_id = Some("ws-1".to_string());

    let fx = fixture(vec![p]);
    let cancel = CancellationToken::new();

    let updated = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.ea.gameclient.gen-old", "1.0.ea.gameclient.gen-new")]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 0);
    assert!(fx.profiles.update_calls().is_empty());
    assert!(fx.workspaces.cleaned().is_empty());

    let untouched = fx.profiles.profile("p1");
    assert_eq!(
        untouched.game_client.as_ref().unwrap().id.as_str(),
        "1.0.ea.gameclient.gen-old"
    );
    assert_eq!(untouched.active_workspace_id.as_deref(), Some("ws-1"));
}

#[tokio::test]
async fn game_client_is_rebuilt_preserving_the_installation_link() {
    let mut p = profile("p1", &["1.0.ea.gameclient.gen-old"]);
    p.game_client = Some(GameClient {
        id: ManifestId::create("1.0.ea.gameclient.gen-old").unwrap(),
        name: "Old Client".to_string(),
        version: "1.0".to_string(),
        installation_id: "install-1".to_string(),
        executable_path: None,
    });
    p.active_workspace_id = Some("ws-1".to_string());

    let fx = fixture(vec![p]);
    let cancel = CancellationToken::new();

    fx.pool
        .add_manifest(
            client_manifest("1.0.ea.gameclient.gen-new", "New Client"),
            None,
            &cancel,
        )
        .await
        .unwrap();

    let updated = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.ea.gameclient.gen-old", "1.0.ea.gameclient.gen-new")]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(fx.workspaces.cleaned(), vec!["ws-1"]);

    let rewritten = fx.profiles.profile("p1");
    let client = rewritten.game_client.unwrap();
    assert_eq!(client.id.as_str(), "1.0.ea.gameclient.gen-new");
    assert_eq!(client.name, "New Client");
    assert_eq!(client.installation_id, "install-1");
    assert_eq!(client.executable_path.as_deref(), Some("generals.exe"));
    assert!(rewritten.active_workspace_id.is_none());
    assert_eq!(
        rewritten.enabled_content_ids,
        vec!["1.0.ea.gameclient.gen-new"]
    );
}

#[tokio::test]
async fn updates_never_touch_the_workspace_strategy() {
    let mut with_ws = profile("p1", &["1.0.pub.mod.a-old"]);
    with_ws.active_workspace_id = Some("ws-9".to_string());
    let fx = fixture(vec![with_ws, profile("p2", &["1.0.pub.mod.a-old"])]);
    let cancel = CancellationToken::new();

    fx.reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap();
    fx.reconciler
        .reconcile_manifest_removal(
            &ManifestId::create("1.0.pub.mod.a-new").unwrap(),
            &cancel,
        )
        .await
        .unwrap();

    let calls = fx.profiles.update_calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|(_, req)| req.workspace_strategy.is_none()));
}

#[tokio::test]
async fn removal_subtracts_only_the_removed_id() {
    let fx = fixture(vec![
        profile("p1", &["1.0.pub.map.toremove", "1.0.pub.map.other"]),
        profile("p2", &["1.0.pub.map.other"]),
    ]);
    let cancel = CancellationToken::new();

    let updated = fx
        .reconciler
        .reconcile_manifest_removal(
            &ManifestId::create("1.0.pub.map.toremove").unwrap(),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 1);
    assert_eq!(
        fx.profiles.profile("p1").enabled_content_ids,
        vec!["1.0.pub.map.other"]
    );
    let calls = fx.profiles.update_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "p1");
}

#[tokio::test]
async fn removal_tears_down_the_active_workspace() {
    let mut p = profile("p1", &["1.0.pub.map.toremove"]);
    p.active_workspace_id = Some("ws-2".to_string());
    let fx = fixture(vec![p]);
    let cancel = CancellationToken::new();

    fx.reconciler
        .reconcile_manifest_removal(
            &ManifestId::create("1.0.pub.map.toremove").unwrap(),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(fx.workspaces.cleaned(), vec!["ws-2"]);
    assert!(fx.profiles.profile("p1").active_workspace_id.is_none());
}

#[tokio::test]
async fn one_failing_profile_does_not_abort_the_batch() {
    let manager = MockProfileManager::new(vec![
        profile("good-1", &["1.0.pub.mod.a-old"]),
        profile("bad", &["1.0.pub.mod.a-old"]),
        profile("good-2", &["1.0.pub.mod.a-old"]),
    ])
    .failing_for("bad");
    let fx = fixture_with(manager);
    let cancel = CancellationToken::new();

    let updated = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(updated, 2);
    assert_eq!(fx.profiles.update_calls().len(), 3);
}

#[tokio::test]
async fn replacement_broadcasts_one_event_per_pair() {
    let fx = fixture(vec![profile("p1", &["1.0.pub.mod.a-old"])]);
    let cancel = CancellationToken::new();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    fx.reconciler.subscribe(Arc::new(move |event| {
        sink.lock().unwrap().push(event.clone());
    }));

    fx.reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[
                ("1.0.pub.mod.a-old", "1.0.pub.mod.a-new"),
                ("1.0.pub.map.b-old", "1.0.pub.map.b-new"),
            ]),
            &cancel,
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().any(|e| {
        e.old_id.as_str() == "1.0.pub.mod.a-old" && e.new_id.as_str() == "1.0.pub.mod.a-new"
    }));
    assert!(events.iter().any(|e| {
        e.old_id.as_str() == "1.0.pub.map.b-old" && e.new_id.as_str() == "1.0.pub.map.b-new"
    }));
}

#[tokio::test]
async fn cancelled_token_surfaces_as_cancelled() {
    let fx = fixture(vec![profile("p1", &["1.0.pub.mod.a-old"])]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx
        .reconciler
        .reconcile_bulk_manifest_replacement(
            &replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn local_update_with_new_id_replaces_and_cleans_up() {
    let fx = fixture(vec![profile("p1", &["1.0.pub.mod.v1"])]);
    let cancel = CancellationToken::new();

    // Old version in the pool, with a body only it references
    let source = fx._root.path().join("delivered-v1");
    tokio::fs::create_dir_all(&source).await.unwrap();
    tokio::fs::write(source.join("old.big"), b"old body").await.unwrap();
    let mut old_manifest = ContentManifestBuilder::new(
        ManifestId::create("1.0.pub.mod.v1").unwrap(),
        "Mod",
        "1.0",
    )
    .content_type(ContentType::Mod)
    .target_game(GameType::ZeroHour)
    .extracted_file("old.big", 0)
    .unwrap()
    .build()
    .unwrap();
    old_manifest = fx
        .pool
        .add_manifest(old_manifest, Some(&source), &cancel)
        .await
        .unwrap();
    let old_id = old_manifest.id.clone();
    fx.cas
        .track_manifest_references(&old_id, &old_manifest, &cancel)
        .await
        .unwrap();
    let old_hash = old_manifest.files[0].hash.clone().unwrap();

    // New version, not yet pooled: orchestration must insert it
    let new_source = fx._root.path().join("delivered-v2");
    tokio::fs::create_dir_all(&new_source).await.unwrap();
    tokio::fs::write(new_source.join("new.big"), b"new body").await.unwrap();
    let new_object = fx
        .cas
        .ingest_file(&new_source.join("new.big"), &cancel)
        .await
        .unwrap();
    let new_manifest = ContentManifestBuilder::new(
        ManifestId::create("1.0.pub.mod.v2").unwrap(),
        "Mod",
        "2.0",
    )
    .content_type(ContentType::Mod)
    .target_game(GameType::ZeroHour)
    .content_addressable_file("new.big", new_object.size, new_object.hash.clone())
    .unwrap()
    .build()
    .unwrap();

    let updated = fx
        .reconciler
        .orchestrate_local_update(&old_id, &new_manifest, &cancel)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    // Profile now points at v2
    assert_eq!(
        fx.profiles.profile("p1").enabled_content_ids,
        vec!["1.0.pub.mod.v2"]
    );

    // Pool: old gone, new present
    assert!(fx.pool.get_manifest(&old_id, &cancel).await.unwrap().is_none());
    assert!(fx
        .pool
        .get_manifest(&new_manifest.id, &cancel)
        .await
        .unwrap()
        .is_some());

    // Old references untracked: a forced GC reaps the old body, keeps the new
    let summary = fx
        .reconciler
        .schedule_garbage_collection(true, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(!fx.cas.storage().contains(&old_hash).await.unwrap());
    assert!(fx.cas.storage().contains(&new_object.hash).await.unwrap());
}

#[tokio::test]
async fn local_update_with_same_id_invalidates_workspaces_only() {
    let mut p = profile("p1", &["1.0.pub.mod.stable"]);
    p.active_workspace_id = Some("ws-5".to_string());
    let fx = fixture(vec![p, profile("p2", &["1.0.pub.map.other"])]);
    let cancel = CancellationToken::new();

    let manifest = simple_manifest("1.0.pub.mod.stable", "Stable Mod");
    fx.pool
        .add_manifest(manifest.clone(), None, &cancel)
        .await
        .unwrap();

    let invalidated = fx
        .reconciler
        .orchestrate_local_update(&manifest.id, &manifest, &cancel)
        .await
        .unwrap();

    assert_eq!(invalidated, 1);
    assert_eq!(fx.workspaces.cleaned(), vec!["ws-5"]);

    let rewritten = fx.profiles.profile("p1");
    assert!(rewritten.active_workspace_id.is_none());
    // Content list untouched: same identity
    assert_eq!(rewritten.enabled_content_ids, vec!["1.0.pub.mod.stable"]);
    // The manifest is still pooled under its id
    assert!(fx
        .pool
        .get_manifest(&manifest.id, &cancel)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn local_update_failure_is_one_aggregate_error() {
    // Force a failure inside the orchestration by making the pool add
    // invalid (content-addressable file without a pooled body is fine, but
    // an invalid manifest is rejected by validation at add time).
    let fx = fixture(vec![profile("p1", &["1.0.pub.mod.v1"])]);
    let cancel = CancellationToken::new();

    let old_id = ManifestId::create("1.0.pub.mod.v1").unwrap();
    let mut bad_manifest = simple_manifest("1.0.pub.mod.v2", "Broken");
    bad_manifest.files.push(ManifestFile {
        relative_path: "data.big".to_string(),
        size: 1,
        hash: None,
        source_type: ManifestFileSourceType::ContentAddressable,
        is_executable: false,
        install_target: InstallTarget::Workspace,
        download_url: None,
        source_path: None,
    });

    let err = fx
        .reconciler
        .orchestrate_local_update(&old_id, &bad_manifest, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::LocalUpdateFailed { .. }));
}

#[test]
fn substituting_twice_is_idempotent() {
    let replacements = replacement_map(&[("1.0.pub.mod.a-old", "1.0.pub.mod.a-new")]);
    let once = super::substitute_ids(
        &["1.0.pub.mod.a-old".to_string(), "1.0.pub.map.other".to_string()],
        &replacements,
    );
    let twice = super::substitute_ids(&once, &replacements);
    assert_eq!(once, twice);
}
