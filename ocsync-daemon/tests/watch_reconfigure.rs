//! Watcher behaviour against the real platform backend.

use std::time::Duration;

use ocsync_core::TRANSIENT_MARKER;
use ocsync_daemon::{FilesystemWatcher, SyncEvent};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

const QUIET: Duration = Duration::from_millis(500);

async fn next_change(rx: &mut UnboundedReceiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("channel open")
}

async fn drain(rx: &mut UnboundedReceiver<SyncEvent>) {
    while timeout(QUIET, rx.recv()).await.is_ok() {}
}

#[tokio::test]
async fn rewatch_moves_the_watch_from_old_root_to_new_root() {
    let old_root = TempDir::new().expect("tmp");
    let new_root = TempDir::new().expect("tmp");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = FilesystemWatcher::new(tx).expect("watcher");

    watcher.rewatch(old_root.path()).expect("watch old");
    std::fs::write(old_root.path().join("before.txt"), "x").expect("write");
    match next_change(&mut rx).await {
        SyncEvent::FilesystemChange { path, .. } => assert!(path.starts_with(old_root.path())),
        other => panic!("unexpected {other:?}"),
    }
    drain(&mut rx).await;

    let handle = watcher.rewatch(new_root.path()).expect("watch new");
    assert_eq!(handle.root(), new_root.path());

    std::fs::write(old_root.path().join("after.txt"), "x").expect("write");
    assert!(
        timeout(QUIET, rx.recv()).await.is_err(),
        "old root must no longer trigger"
    );

    std::fs::write(new_root.path().join("inside.txt"), "x").expect("write");
    match next_change(&mut rx).await {
        SyncEvent::FilesystemChange { path, .. } => assert!(path.starts_with(new_root.path())),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn nested_directories_are_watched() {
    let root = TempDir::new().expect("tmp");
    let nested = root.path().join("a").join("b");
    std::fs::create_dir_all(&nested).expect("mkdir");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = FilesystemWatcher::new(tx).expect("watcher");
    watcher.rewatch(root.path()).expect("watch");

    std::fs::write(nested.join("deep.txt"), "x").expect("write");
    match next_change(&mut rx).await {
        SyncEvent::FilesystemChange { path, .. } => assert!(path.starts_with(&nested)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn marker_churn_produces_no_triggers() {
    let root = TempDir::new().expect("tmp");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = FilesystemWatcher::new(tx).expect("watcher");
    watcher.rewatch(root.path()).expect("watch");

    let marker = root.path().join(TRANSIENT_MARKER);
    std::fs::write(&marker, "t").expect("create marker");
    std::fs::write(&marker, "tt").expect("modify marker");
    std::fs::remove_file(&marker).expect("remove marker");

    assert!(timeout(QUIET, rx.recv()).await.is_err());
}

#[tokio::test]
async fn unwatch_silences_everything() {
    let root = TempDir::new().expect("tmp");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = FilesystemWatcher::new(tx).expect("watcher");
    watcher.rewatch(root.path()).expect("watch");
    watcher.unwatch();
    assert!(watcher.active().is_none());

    std::fs::write(root.path().join("ignored.txt"), "x").expect("write");
    assert!(timeout(QUIET, rx.recv()).await.is_err());
}
