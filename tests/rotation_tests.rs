// Segment rotation guard: hand-off ordering (new segment confirmed live
// before the old supervisor stops), single rotation per crossing, and the
// keep-recording fallback when the replacement cannot spawn.

mod common;

use anyhow::Result;
use common::{MockBackend, SpyEvent};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Mutex};
use vocalog::capture::rotation::rotated_path;
use vocalog::{CaptureSupervisor, RotationConfig, RotationGuard};

fn small_rotation_config() -> RotationConfig {
    RotationConfig {
        max_segment_bytes: 1024,
        check_interval: Duration::from_millis(20),
        overlap: Duration::from_millis(30),
    }
}

#[tokio::test]
async fn rotation_starts_new_segment_before_stopping_old() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("rec-0.m4a");
    fs::write(&path, vec![0u8; 4096])?;

    let backend = MockBackend::new();
    let (sup_tx, _sup_rx) = mpsc::channel(8);
    let supervisor = CaptureSupervisor::start(backend.clone(), path.clone(), sup_tx.clone()).await?;
    let slot = Arc::new(Mutex::new(Some(supervisor)));

    let (path_tx, path_rx) = watch::channel(path.clone());
    let path_tx = Arc::new(path_tx);
    let (rotated_tx, mut rotated_rx) = mpsc::channel(8);

    let mut guard = RotationGuard::spawn(
        small_rotation_config(),
        backend.clone(),
        slot.clone(),
        path_tx.clone(),
        sup_tx,
        rotated_tx,
    );

    let new_path = tokio::time::timeout(Duration::from_secs(1), rotated_rx.recv())
        .await?
        .expect("rotation notification");

    assert_ne!(new_path, path);
    assert!(
        new_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("rec-0_"),
        "rotated name should be timestamp-suffixed, got {}",
        new_path.display()
    );
    // The canonical path switched to the new segment.
    assert_eq!(*path_rx.borrow(), new_path);

    // Give the overlap window time to elapse and the old supervisor to stop.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let events = backend.events();
    let new_spawn = events
        .iter()
        .position(|e| *e == SpyEvent::CaptureSpawned(new_path.clone()))
        .expect("new segment spawned");
    let old_stop = events
        .iter()
        .position(|e| *e == SpyEvent::CaptureTerminated(path.clone()))
        .expect("old segment stopped");
    assert!(
        new_spawn < old_stop,
        "hand-off must start the new capture before stopping the old one: {events:?}"
    );

    // One crossing, one rotation: the new (empty) segment never re-triggers.
    assert_eq!(backend.capture_spawns().len(), 2);

    guard.stop().await;
    if let Some(mut supervisor) = slot.lock().await.take() {
        supervisor.stop().await?;
    }
    Ok(())
}

#[tokio::test]
async fn failed_replacement_spawn_keeps_current_segment() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("rec-0.m4a");
    fs::write(&path, vec![0u8; 4096])?;

    let backend = MockBackend::new();
    let (sup_tx, _sup_rx) = mpsc::channel(8);
    let supervisor = CaptureSupervisor::start(backend.clone(), path.clone(), sup_tx.clone()).await?;
    let slot = Arc::new(Mutex::new(Some(supervisor)));

    backend.set_fail_spawn(true);

    let (path_tx, path_rx) = watch::channel(path.clone());
    let path_tx = Arc::new(path_tx);
    let (rotated_tx, mut rotated_rx) = mpsc::channel(8);

    let mut guard = RotationGuard::spawn(
        small_rotation_config(),
        backend.clone(),
        slot.clone(),
        path_tx.clone(),
        sup_tx,
        rotated_tx,
    );

    // Several check intervals pass without a successful rotation.
    let rotated =
        tokio::time::timeout(Duration::from_millis(150), rotated_rx.recv()).await;
    assert!(rotated.is_err(), "no rotation should complete");
    assert_eq!(*path_rx.borrow(), path);
    assert!(slot.lock().await.is_some(), "original supervisor still in place");

    guard.stop().await;
    backend.set_fail_spawn(false);
    if let Some(mut supervisor) = slot.lock().await.take() {
        supervisor.stop().await?;
    }
    Ok(())
}

#[tokio::test]
async fn undersized_segment_is_left_alone() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("rec-0.m4a");
    fs::write(&path, vec![0u8; 100])?;

    let backend = MockBackend::new();
    let (sup_tx, _sup_rx) = mpsc::channel(8);
    let supervisor = CaptureSupervisor::start(backend.clone(), path.clone(), sup_tx.clone()).await?;
    let slot = Arc::new(Mutex::new(Some(supervisor)));

    let (path_tx, _path_rx) = watch::channel(path.clone());
    let (rotated_tx, mut rotated_rx) = mpsc::channel(8);

    let mut guard = RotationGuard::spawn(
        small_rotation_config(),
        backend.clone(),
        slot.clone(),
        Arc::new(path_tx),
        sup_tx,
        rotated_tx,
    );

    let rotated =
        tokio::time::timeout(Duration::from_millis(150), rotated_rx.recv()).await;
    assert!(rotated.is_err());
    assert_eq!(backend.capture_spawns().len(), 1);

    guard.stop().await;
    if let Some(mut supervisor) = slot.lock().await.take() {
        supervisor.stop().await?;
    }
    Ok(())
}

#[test]
fn rotated_path_keeps_directory_and_extension() {
    let rotated = rotated_path(std::path::Path::new("/a/b/rec-0.m4a"));
    assert_eq!(rotated.parent(), Some(std::path::Path::new("/a/b")));
    assert_eq!(rotated.extension().unwrap(), "m4a");
    assert!(rotated
        .file_stem()
        .unwrap()
        .to_string_lossy()
        .starts_with("rec-0_"));
}
