//! Key pool replication through the fake contents API.

use std::time::Duration;

use tower::ServiceExt;

use keyshop::keys::{KeyPool, SOLVED_FILE};
use keyshop::mirror::RemoteMirror;

mod common;
use common::*;

#[tokio::test]
async fn test_push_then_pull_restores_an_empty_disk() {
    let (config, repo) = spawn_github().await;
    let mirror = RemoteMirror::new(&config, Duration::from_secs(5)).unwrap();

    let source_dir = tempfile::tempdir().unwrap();
    let source = KeyPool::open(source_dir.path()).unwrap();
    source
        .add_keys(Period::ThirtyDays, &["ABC123", "DEF456"])
        .unwrap();
    source.retire("ABC123", Some("buyer@example.com"));

    mirror.push_pool(&source, Period::ThirtyDays).await.unwrap();
    // A second push updates the existing files
    source.add_keys(Period::ThirtyDays, &["GHI789"]).unwrap();
    mirror.push_pool(&source, Period::ThirtyDays).await.unwrap();

    assert_eq!(
        repo.get("data/keys/key30d.txt").unwrap().lines().collect::<Vec<_>>(),
        vec!["DEF456", "GHI789"]
    );
    assert!(repo.get(&format!("data/keys/{}", SOLVED_FILE)).unwrap().starts_with("ABC123 | "));

    let target_dir = tempfile::tempdir().unwrap();
    let target = KeyPool::open(target_dir.path()).unwrap();
    let synced = mirror.pull_all(&target).await.unwrap();

    let files: Vec<&str> = synced.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(files, vec!["key30d.txt", SOLVED_FILE]);
    assert_eq!(synced[0].lines, 2);
    assert_eq!(target.list(Period::ThirtyDays).unwrap(), vec!["DEF456", "GHI789"]);
    assert_eq!(target.solved_entries(10).unwrap()[0].key, "ABC123");
    // Files missing remotely stay as they were
    assert_eq!(target.count(Period::OneDay).unwrap(), 0);
}

#[tokio::test]
async fn test_missing_remote_file_reads_as_none() {
    let (config, _repo) = spawn_github().await;
    let mirror = RemoteMirror::new(&config, Duration::from_secs(5)).unwrap();

    assert_eq!(mirror.read_file("data/keys/key1d.txt").await.unwrap(), None);
}

#[tokio::test]
async fn test_admin_sync_pulls_pools() {
    let (mirror_config, repo) = spawn_github().await;
    repo.put("data/keys/key7d.txt", "W-1\nW-2\n");
    let (state, _dir) = create_test_app_state_with(|config| config.mirror = Some(mirror_config));
    let token = admin_token(&state);

    let response = app(state.clone())
        .oneshot(authed_request("POST", "/admin/sync", &token, None))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["files"][0]["file"], "key7d.txt");
    assert_eq!(state.keys.list(Period::SevenDays).unwrap(), vec!["W-1", "W-2"]);
}

#[tokio::test]
async fn test_unreachable_mirror_is_logged_only() {
    let (state, _dir) = create_test_app_state_with(|config| {
        config.mirror = Some(MirrorConfig {
            token: "t".into(),
            owner: "o".into(),
            repo: "r".into(),
            branch: None,
            api_url: "http://127.0.0.1:9".into(),
        });
    });
    state.keys.add_keys(Period::OneDay, &["X"]).unwrap();

    // Logged only
    state.mirror_pool(Period::OneDay).await;
    assert_eq!(state.keys.count(Period::OneDay).unwrap(), 1);
}
