//! Scenario tests for the overlay tree: client mutations, the list
//! merge, orphan handling, and temp-file isolation.

mod common;

use ::common::{marker_name, Method, OverlayState, RequestQueue, ShareEvent, Tree};

/// Create a file, close it, and list the parent: the file shows up as
/// local-only, the queue holds its PUT, and the work tree its marker.
#[tokio::test]
async fn scenario_create_then_list() {
    let env = common::setup().await;

    let file = env.overlay.create_file("/a/x.txt").await.unwrap();
    assert_eq!(file.state(), OverlayState::LocalOnly);
    file.close().await;

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path(), "/a/x.txt");
    assert_eq!(listed[0].state(), OverlayState::LocalOnly);

    let entries = env.queue.entries_for("/a").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.method, Method::Put);
    assert_eq!(entries[0].entry.path, "/a/x.txt");

    assert!(env.work.exists(&marker_name("/a/x.txt")).await.unwrap());
}

/// A file that appeared remotely out of band lists as remote-only, and
/// opening it yields a handle backed by the remote entry.
#[tokio::test]
async fn scenario_remote_add_observed() {
    let env = common::setup().await;
    env.remote.seed_file("/a/y.txt", b"remote bytes");
    env.local.create_directory("/a").await.unwrap();

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path(), "/a/y.txt");
    assert_eq!(listed[0].state(), OverlayState::RemoteOnly);

    let file = env.overlay.open("/a/y.txt").await.unwrap();
    assert_eq!(file.state(), OverlayState::RemoteOnly);
    assert!(file.local_entry().is_none());
    assert!(file.remote_entry().is_some());
    file.close().await;
}

/// Deleting a created file removes it from the local tree and its marker
/// from the work tree, queues a DELETE, and hides it from listings.
#[tokio::test]
async fn scenario_delete_queued() {
    let env = common::setup().await;

    let file = env.overlay.create_file("/a/x.txt").await.unwrap();
    file.close().await;

    env.overlay.delete("/a/x.txt").await.unwrap();

    assert!(!env.local.exists("/a/x.txt").await.unwrap());
    assert!(!env.work.exists(&marker_name("/a/x.txt")).await.unwrap());

    let pending = env.queue.get_requests("/a").await.unwrap();
    assert_eq!(pending.get("x.txt"), Some(&Method::Delete));

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert!(listed.is_empty());
}

/// A queued DELETE hides the name from listings even while the remote
/// still reports it.
#[tokio::test]
async fn scenario_delete_hides_remote_entry() {
    let env = common::setup().await;
    env.remote.seed_file("/a/x.txt", b"bytes");
    env.local.create_directory("/a").await.unwrap();
    env.local.create_file("/a/x.txt").await.unwrap();

    env.overlay.delete("/a/x.txt").await.unwrap();

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert!(
        listed.is_empty(),
        "queued delete must hide the remote entry"
    );
}

/// A local file that vanished from the remote, with no marker and no
/// open handle, is removed from the cache during a list.
#[tokio::test]
async fn scenario_orphan_auto_remove() {
    let env = common::setup().await;
    env.remote.seed_dir("/a");
    env.local.create_file("/a/old.txt").await.unwrap();

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert!(listed.is_empty());
    assert!(!env.local.exists("/a/old.txt").await.unwrap());
}

/// Same orphan, but an open handle exists: the file stays, is included
/// in the listing, and a conflict event is emitted.
#[tokio::test]
async fn scenario_orphan_conflict() {
    let env = common::setup().await;
    env.remote.seed_dir("/a");
    env.remote.seed_file("/a/old.txt", b"bytes");
    env.local.create_directory("/a").await.unwrap();

    // Open while both sides have it, then the remote loses it.
    env.local.create_file("/a/old.txt").await.unwrap();
    let handle = env.overlay.open("/a/old.txt").await.unwrap();
    env.remote.delete("/a/old.txt").await.unwrap();

    let mut events = env.share.events().subscribe();

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path(), "/a/old.txt");
    assert_eq!(listed[0].state(), OverlayState::LocalOnly);
    assert!(env.local.exists("/a/old.txt").await.unwrap());

    match events.try_recv().unwrap() {
        ShareEvent::Conflict { path } => assert_eq!(path, "/a/old.txt"),
        other => panic!("expected conflict event, got {:?}", other),
    }

    handle.close().await;
}

/// Renaming a created-but-unconfirmed file moves the local file and its
/// marker and captures the rename as a single MOVE entry.
#[tokio::test]
async fn scenario_rename_file() {
    let env = common::setup().await;

    let file = env.overlay.create_file("/a/x.txt").await.unwrap();
    drop(file); // rename happens before the handle's close queues a PUT

    env.overlay.rename("/a/x.txt", "/a/y.txt").await.unwrap();

    assert!(!env.local.exists("/a/x.txt").await.unwrap());
    assert!(env.local.exists("/a/y.txt").await.unwrap());
    assert!(!env.work.exists(&marker_name("/a/x.txt")).await.unwrap());
    assert!(env.work.exists(&marker_name("/a/y.txt")).await.unwrap());

    let entries = env.queue.entries_for("/a").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.method, Method::Move);
    assert_eq!(entries[0].entry.path, "/a/x.txt");
    assert_eq!(entries[0].entry.dest_path.as_deref(), Some("/a/y.txt"));
}

/// Directory renames are eager on the remote and re-parent every queued
/// entry below the old name.
#[tokio::test]
async fn scenario_rename_directory_reparents_queue() {
    let env = common::setup().await;

    env.overlay.create_directory("/docs").await.unwrap();
    let file = env.overlay.create_file("/docs/report.txt").await.unwrap();
    file.close().await;

    env.overlay.rename("/docs", "/archive").await.unwrap();

    // No entry may remain under the old parent or any descendant.
    assert!(env.queue.entries_for("/docs").await.unwrap().is_empty());

    let entries = env.queue.entries_for("/archive").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.path, "/archive/report.txt");

    // The remote saw the rename eagerly.
    assert!(env
        .remote
        .recorded_ops()
        .iter()
        .any(|op| op == "MOVE /docs -> /archive"));
}

/// Mutations on temp names never produce queue entries.
#[tokio::test]
async fn scenario_temp_isolation() {
    let env = common::setup().await;

    let file = env.overlay.create_file("/a/~lock.docx").await.unwrap();
    assert_eq!(file.state(), OverlayState::Temp);
    file.mark_modified();
    file.close().await;

    env.overlay
        .rename("/a/~lock.docx", "/a/~lock2.docx")
        .await
        .unwrap();
    env.overlay.delete("/a/~lock2.docx").await.unwrap();

    assert_eq!(env.queue.stats().await.unwrap().pending, 0);
}

/// A rename out of the temp namespace is queued: the file becomes
/// persistent and must reach the remote.
#[tokio::test]
async fn scenario_temp_to_persistent_rename_is_queued() {
    let env = common::setup().await;

    let file = env.overlay.create_file("/a/~upload.part").await.unwrap();
    file.close().await;

    env.overlay
        .rename("/a/~upload.part", "/a/report.pdf")
        .await
        .unwrap();

    let entries = env.queue.entries_for("/a").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.method, Method::Move);
    assert_eq!(entries[0].entry.dest_path.as_deref(), Some("/a/report.pdf"));
}

/// Fixed snapshots of L, R, W, and Q merge to the same sequence every
/// time, remote order first, local-only entries appended.
#[tokio::test]
async fn test_merge_is_deterministic_and_ordered() {
    let env = common::setup().await;

    env.remote.seed_file("/a/r1.txt", b"1");
    env.remote.seed_file("/a/r2.txt", b"2");
    env.local.create_directory("/a").await.unwrap();
    env.local.create_file("/a/r2.txt").await.unwrap();

    // Client-created local file, marker in place.
    let created = env.overlay.create_file("/a/new.txt").await.unwrap();
    created.close().await;

    let snapshot: Vec<(String, OverlayState)> = env
        .overlay
        .list("/a/*")
        .await
        .unwrap()
        .iter()
        .map(|f| (f.path().to_string(), f.state()))
        .collect();

    assert_eq!(
        snapshot,
        vec![
            ("/a/r1.txt".to_string(), OverlayState::RemoteOnly),
            ("/a/r2.txt".to_string(), OverlayState::Synced),
            ("/a/new.txt".to_string(), OverlayState::LocalOnly),
        ]
    );

    for _ in 0..3 {
        let again: Vec<(String, OverlayState)> = env
            .overlay
            .list("/a/*")
            .await
            .unwrap()
            .iter()
            .map(|f| (f.path().to_string(), f.state()))
            .collect();
        assert_eq!(again, snapshot);
    }
}

/// Local names match remote ones under NFKD normalization.
#[tokio::test]
async fn test_merge_matches_unicode_normalization_forms() {
    let env = common::setup().await;

    // Remote uses the precomposed form, local cache the decomposed one.
    env.remote.seed_file("/a/caf\u{e9}.txt", b"bytes");
    env.local.create_directory("/a").await.unwrap();
    env.local
        .create_file("/a/cafe\u{301}.txt")
        .await
        .unwrap();

    let listed = env.overlay.list("/a/*").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state(), OverlayState::Synced);
    // The merged entry carries the local path.
    assert_eq!(listed[0].path(), "/a/cafe\u{301}.txt");
}

/// `exists` prefers the local tree and falls back to the remote.
#[tokio::test]
async fn test_exists_local_first() {
    let env = common::setup().await;

    env.remote.seed_file("/a/remote.txt", b"r");
    env.local.create_file("/a/local.txt").await.unwrap();

    assert!(env.overlay.exists("/a/local.txt").await.unwrap());
    assert!(env.overlay.exists("/a/remote.txt").await.unwrap());
    assert!(!env.overlay.exists("/a/missing.txt").await.unwrap());
}

/// The open matrix: remote-only, synced, local-only, and not-found.
#[tokio::test]
async fn test_open_matrix() {
    let env = common::setup().await;

    env.remote.seed_file("/a/both.txt", b"r");
    env.remote.seed_file("/a/remote.txt", b"r");
    env.local.create_directory("/a").await.unwrap();
    env.local.create_file("/a/both.txt").await.unwrap();
    env.local.create_file("/a/local.txt").await.unwrap();

    let both = env.overlay.open("/a/both.txt").await.unwrap();
    assert_eq!(both.state(), OverlayState::Synced);
    both.close().await;

    let remote = env.overlay.open("/a/remote.txt").await.unwrap();
    assert_eq!(remote.state(), OverlayState::RemoteOnly);
    remote.close().await;

    let local = env.overlay.open("/a/local.txt").await.unwrap();
    assert_eq!(local.state(), OverlayState::LocalOnly);
    local.close().await;

    assert!(matches!(
        env.overlay.open("/a/missing.txt").await,
        Err(::common::TreeError::NotFound(_))
    ));
}

/// Directory creation is eager on the remote.
#[tokio::test]
async fn test_create_directory_is_eager() {
    let env = common::setup().await;

    env.overlay.create_directory("/projects").await.unwrap();

    assert!(env.local.exists("/projects").await.unwrap());
    assert!(env.remote.has("/projects"));
    assert_eq!(env.queue.stats().await.unwrap().pending, 0);
}

/// Deleting a directory drops its local and remote subtrees and every
/// queued entry beneath it.
#[tokio::test]
async fn test_delete_directory_clears_queue_prefix() {
    let env = common::setup().await;

    env.overlay.create_directory("/docs").await.unwrap();
    env.overlay.create_directory("/docs/sub").await.unwrap();
    let a = env.overlay.create_file("/docs/a.txt").await.unwrap();
    a.close().await;
    let b = env.overlay.create_file("/docs/sub/b.txt").await.unwrap();
    b.close().await;

    assert_eq!(env.queue.stats().await.unwrap().pending, 2);

    env.overlay.delete_directory("/docs").await.unwrap();

    assert!(!env.local.exists("/docs").await.unwrap());
    assert!(!env.remote.has("/docs"));
    assert_eq!(env.queue.stats().await.unwrap().pending, 0);
    assert!(!env.work.exists("/docs").await.unwrap());
}

/// A modification through an open handle queues a POST at close; a
/// fresh create queues a PUT.
#[tokio::test]
async fn test_close_hook_distinguishes_create_from_modify() {
    let env = common::setup().await;

    env.remote.seed_file("/a/doc.txt", b"old");
    env.local.create_directory("/a").await.unwrap();
    env.local.create_file("/a/doc.txt").await.unwrap();

    let synced = env.overlay.open("/a/doc.txt").await.unwrap();
    synced.mark_modified();
    synced.close().await;

    let pending = env.queue.get_requests("/a").await.unwrap();
    assert_eq!(pending.get("doc.txt"), Some(&Method::Post));

    let created = env.overlay.create_file("/a/fresh.txt").await.unwrap();
    created.close().await;

    let pending = env.queue.get_requests("/a").await.unwrap();
    assert_eq!(pending.get("fresh.txt"), Some(&Method::Put));
}

/// An unmodified read-only handle queues nothing at close.
#[tokio::test]
async fn test_read_only_close_queues_nothing() {
    let env = common::setup().await;

    env.remote.seed_file("/a/doc.txt", b"old");
    env.local.create_directory("/a").await.unwrap();
    env.local.create_file("/a/doc.txt").await.unwrap();

    let handle = env.overlay.open("/a/doc.txt").await.unwrap();
    handle.close().await;

    assert_eq!(env.queue.stats().await.unwrap().pending, 0);
}

/// A pending queue entry blocks orphan removal even without a handle.
#[tokio::test]
async fn test_orphan_with_pending_entry_is_kept() {
    let env = common::setup().await;
    env.remote.seed_dir("/a");
    env.local.create_file("/a/old.txt").await.unwrap();

    // Simulate a leftover MOVE targeting the file.
    env.queue
        .queue_request(::common::QueueEntry {
            method: Method::Move,
            path: "/a/other.txt".to_string(),
            dest_path: Some("/a/old.txt".to_string()),
            remote_prefix: "http://repo.test/share".to_string(),
            local_prefix: env.local.root().to_string_lossy().to_string(),
        })
        .await
        .unwrap();

    let mut events = env.share.events().subscribe();
    let listed = env.overlay.list("/a/*.txt").await.unwrap();

    // other.txt is not in L; only old.txt survives as a conflict.
    assert!(listed.iter().any(|f| f.path() == "/a/old.txt"));
    assert!(env.local.exists("/a/old.txt").await.unwrap());
    assert!(matches!(
        events.try_recv().unwrap(),
        ShareEvent::Conflict { .. }
    ));
}
