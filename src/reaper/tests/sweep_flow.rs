//! Full sweep flows over a realistic registry tree.

use std::sync::Arc;

use common::config::CleanupConfig;
use reaper::clock::FixedClock;
use reaper::store::{InMemoryStore, StoreOp};
use reaper::{SweepSummary, Sweeper};

const BUCKET: &str = "registry";
const ROOT: &str = "docker/registry/v2/repositories/";
const NOW: &str = "2024-03-10T12:00:00Z";
const STALE: &str = "2024-03-08T12:00:00Z";
const FRESH: &str = "2024-03-10T06:00:00Z";

fn sweeper(store: &InMemoryStore, config: CleanupConfig) -> Sweeper {
    Sweeper::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock(NOW.parse().unwrap())),
        config,
        BUCKET,
    )
}

async fn seed_repository(store: &InMemoryStore, name: &str) {
    for key in [
        format!("{ROOT}{name}/_layers/sha256/aa11/link"),
        format!("{ROOT}{name}/_manifests/revisions/sha256/bb22/link"),
        format!("{ROOT}{name}/_manifests/tags/latest/current/link"),
    ] {
        store.put_object(key, b"link".to_vec()).await;
    }
}

async fn seed_session(store: &InMemoryStore, repo: &str, session: &str, started_at: &str) {
    let folder = format!("{ROOT}{repo}/_uploads/{session}/");
    store
        .put_object(format!("{folder}startedat"), started_at.as_bytes().to_vec())
        .await;
    store
        .put_object(format!("{folder}data"), b"payload".to_vec())
        .await;
    store
        .put_object(format!("{folder}hashstates/sha256/0"), b"state".to_vec())
        .await;
}

#[tokio::test]
async fn test_sweep_of_realistic_registry_tree() {
    let store = InMemoryStore::new();
    for name in ["library/alpine", "library/nginx", "team/api"] {
        seed_repository(&store, name).await;
    }
    seed_session(&store, "library/alpine", "sess-stale", STALE).await;
    seed_session(&store, "library/nginx", "sess-fresh", FRESH).await;
    store
        .put_multipart_upload(
            format!("{ROOT}team/api/_uploads/mp1/data"),
            "u-old",
            STALE.parse().unwrap(),
        )
        .await;
    store
        .put_multipart_upload(
            format!("{ROOT}team/api/_uploads/mp2/data"),
            "u-new",
            FRESH.parse().unwrap(),
        )
        .await;

    let summary = sweeper(&store, CleanupConfig::default())
        .run()
        .await
        .unwrap();

    // Top-level common prefixes under the root are library/ and team/
    assert_eq!(
        summary,
        SweepSummary {
            prefixes_visited: 2,
            multipart_uploads_aborted: 1,
            upload_folders_removed: 1,
            folder_objects_deleted: 3,
            markers_skipped: 1,
            markers_unreadable: 0,
        }
    );

    let keys = store.object_keys().await;
    assert_eq!(keys.len(), 12);
    assert!(!keys.iter().any(|k| k.contains("sess-stale")));
    assert!(keys.contains(&format!("{ROOT}library/nginx/_uploads/sess-fresh/startedat")));
    assert_eq!(
        store.multipart_uploads().await,
        vec![(
            format!("{ROOT}team/api/_uploads/mp2/data"),
            "u-new".to_string()
        )]
    );
}

#[tokio::test]
async fn test_second_sweep_finds_nothing_left_to_remove() {
    let store = InMemoryStore::new();
    seed_repository(&store, "library/alpine").await;
    seed_session(&store, "library/alpine", "sess-stale", STALE).await;
    seed_session(&store, "library/alpine", "sess-fresh", FRESH).await;

    let first = sweeper(&store, CleanupConfig::default())
        .run()
        .await
        .unwrap();
    assert_eq!(first.upload_folders_removed, 1);

    let keys_after_first = store.object_keys().await;
    let second = sweeper(&store, CleanupConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(second.upload_folders_removed, 0);
    assert_eq!(second.folder_objects_deleted, 0);
    assert_eq!(second.markers_skipped, 1);
    assert_eq!(store.object_keys().await, keys_after_first);
}

#[tokio::test]
async fn test_dry_run_previews_what_a_real_run_removes() {
    let store = InMemoryStore::new();
    seed_repository(&store, "library/alpine").await;
    seed_session(&store, "library/alpine", "sess-stale", STALE).await;
    store
        .put_multipart_upload(
            format!("{ROOT}library/alpine/_uploads/mp1/data"),
            "u-old",
            STALE.parse().unwrap(),
        )
        .await;
    let dry = CleanupConfig {
        dry_run: true,
        ..CleanupConfig::default()
    };

    let preview = sweeper(&store, dry).run().await.unwrap();

    assert_eq!(preview.multipart_uploads_aborted, 0);
    assert_eq!(preview.upload_folders_removed, 0);
    assert_eq!(store.object_keys().await.len(), 6);
    assert_eq!(store.multipart_uploads().await.len(), 1);
    let ops = store.operations().await;
    assert!(
        !ops.iter()
            .any(|op| matches!(op, StoreOp::AbortUpload { .. } | StoreOp::Delete { .. }))
    );

    let real = sweeper(&store, CleanupConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(real.multipart_uploads_aborted, 1);
    assert_eq!(real.upload_folders_removed, 1);
    assert_eq!(real.folder_objects_deleted, 3);
    assert_eq!(store.object_keys().await.len(), 3);
    assert!(store.multipart_uploads().await.is_empty());
}
