//! Integration tests for StateManager with library change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits change events on mutations
//! - Supports multiple subscribers
//! - Handles concurrent access from multiple tasks
//! - Reports what the library actually did during scans, refreshes and exports

use camino::Utf8PathBuf;
use modsync::models::{ModdableObject, ObjectKind};
use modsync::services::ExportOptions;
use modsync::{LibraryChange, LibrarySettings, ModLibrary, StateManager, StaticCatalog};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, timeout};

/// Next event other than an operation label change.
async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<LibraryChange>) -> LibraryChange {
    loop {
        let event = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Channel closed");
        if !matches!(event, LibraryChange::OperationChanged { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_scan_events_emitted() {
    let state = Arc::new(StateManager::new());
    let mut rx = state.subscribe();

    state.start_scan();
    assert_eq!(next_event(&mut rx).await, LibraryChange::ScanStarted);

    state.finish_scan(2, 7, 0);
    assert_eq!(
        next_event(&mut rx).await,
        LibraryChange::ScanFinished {
            objects: 2,
            mods: 7,
            errors: 0
        }
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = Arc::new(StateManager::new());
    let mut rx1 = state.subscribe();
    let mut rx2 = state.subscribe();
    let mut rx3 = state.subscribe();

    state.update(|s| s.is_scanning = true);

    for rx in [&mut rx1, &mut rx2, &mut rx3] {
        assert_eq!(next_event(rx).await, LibraryChange::ScanStarted);
    }
}

#[tokio::test]
async fn test_concurrent_state_access() {
    let state = Arc::new(StateManager::new());

    let mut handles = vec![];
    for i in 0..10 {
        let state_clone = state.clone();
        let handle = tokio::spawn(async move {
            state_clone.update(|s| s.object_count = i);
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // Last write wins
    let final_count = state.read(|s| s.object_count);
    assert!(final_count < 10, "Object count should be within range");
}

#[tokio::test]
async fn test_library_operations_drive_state() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join("mods/Characters/Hero/Default/A")).unwrap();

    let catalog = StaticCatalog::new(vec![ModdableObject::new(
        "hero",
        "Hero",
        "Characters",
        ObjectKind::Character,
    )])
    .unwrap();
    let library = ModLibrary::new(LibrarySettings::with_root(root.join("mods")), Arc::new(catalog));
    let mut rx = library.state().subscribe();

    tokio_test::assert_ok!(library.scan().await);
    assert_eq!(next_event(&mut rx).await, LibraryChange::ScanStarted);
    assert!(matches!(
        next_event(&mut rx).await,
        LibraryChange::ScanFinished { objects: 1, mods: 1, .. }
    ));

    fs::create_dir_all(root.join("mods/Characters/Hero/Default/B")).unwrap();
    tokio_test::assert_ok!(library.refresh(None, None).await);
    let mut refreshed = None;
    while refreshed.is_none() {
        if let LibraryChange::RefreshFinished { new, .. } = next_event(&mut rx).await {
            refreshed = Some(new);
        }
    }
    assert_eq!(refreshed, Some(1));
    assert_eq!(library.state().snapshot().tracked_mods, 2);

    library
        .export(&[], &root.join("out"), ExportOptions::default())
        .await
        .unwrap();
    let mut percents = Vec::new();
    loop {
        match next_event(&mut rx).await {
            LibraryChange::ExportProgress { percent } => percents.push(percent),
            LibraryChange::ExportFinished { exported, errors } => {
                assert_eq!((exported, errors), (2, 0));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(percents.last(), Some(&100));
    assert!(!library.state().snapshot().is_busy());
}
