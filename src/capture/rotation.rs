//! Segment rotation guard.
//!
//! Capture output past ~25MB has been seen to make the encoder and the
//! downstream transcription consumers unreliable, so a growing segment is
//! rotated before it gets there. The hand-off ordering is fixed: the
//! replacement supervisor is started and confirmed live first, the current
//! path is switched, and only then is the old supervisor stopped, after a
//! short overlap so the audio has no gap.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::CaptureBackend;
use super::supervisor::{CaptureSupervisor, SupervisorEvent};
use crate::config::RotationSettings;
use std::time::Duration;

/// Runtime rotation parameters.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_segment_bytes: u64,
    pub check_interval: Duration,
    pub overlap: Duration,
}

impl From<&RotationSettings> for RotationConfig {
    fn from(settings: &RotationSettings) -> Self {
        Self {
            max_segment_bytes: settings.max_segment_bytes(),
            check_interval: settings.check_interval(),
            overlap: settings.overlap(),
        }
    }
}

pub struct RotationGuard {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RotationGuard {
    /// Start the periodic size check over the session's live segment.
    ///
    /// `slot` is the shared home of the session's active supervisor; on
    /// rotation the new supervisor is swapped in there and the old one is
    /// stopped after the overlap delay. `path_tx` publishes the canonical
    /// current path, and `rotated_tx` tells the controller a rotation
    /// happened.
    pub fn spawn(
        config: RotationConfig,
        backend: Arc<dyn CaptureBackend>,
        slot: Arc<Mutex<Option<CaptureSupervisor>>>,
        path_tx: Arc<watch::Sender<PathBuf>>,
        supervisor_events: mpsc::Sender<SupervisorEvent>,
        rotated_tx: mpsc::Sender<PathBuf>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(
            config,
            backend,
            slot,
            path_tx,
            supervisor_events,
            rotated_tx,
            stop_rx,
        ));

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Cancel the size-check timer. Does not touch the supervisors; the
    /// controller owns their teardown.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("rotation guard task panicked: {e}");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: RotationConfig,
    backend: Arc<dyn CaptureBackend>,
    slot: Arc<Mutex<Option<CaptureSupervisor>>>,
    path_tx: Arc<watch::Sender<PathBuf>>,
    supervisor_events: mpsc::Sender<SupervisorEvent>,
    rotated_tx: mpsc::Sender<PathBuf>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let threshold = config.max_segment_bytes;

    loop {
        tokio::select! {
            _ = &mut stop_rx => return,

            _ = interval.tick() => {
                let current = path_tx.borrow().clone();

                let size = match tokio::fs::metadata(&current).await {
                    Ok(meta) => meta.len(),
                    // The file may not exist yet while the encoder warms up.
                    Err(_) => continue,
                };

                if size < threshold {
                    debug!(path = %current.display(), size, "segment size check");
                    continue;
                }

                info!(
                    path = %current.display(),
                    size,
                    threshold,
                    "segment crossed size threshold, rotating"
                );

                let next = rotated_path(&current);
                let new_supervisor = match CaptureSupervisor::start(
                    backend.clone(),
                    next.clone(),
                    supervisor_events.clone(),
                )
                .await
                {
                    Ok(sup) => sup,
                    Err(e) => {
                        // Keep recording into the oversized segment rather
                        // than risk a gap.
                        warn!("segment rotation failed to start replacement: {e}");
                        continue;
                    }
                };

                // New supervisor is live: switch the canonical path, swap it
                // into the slot, and retire the old one after the overlap.
                let old = {
                    let mut guard = slot.lock().await;
                    guard.replace(new_supervisor)
                };
                let _ = path_tx.send(next.clone());
                let _ = rotated_tx.send(next.clone()).await;

                if let Some(mut old) = old {
                    let overlap = config.overlap;
                    tokio::spawn(async move {
                        tokio::time::sleep(overlap).await;
                        if let Err(e) = old.stop().await {
                            warn!("failed to stop rotated-out supervisor: {e}");
                        }
                    });
                }
            }
        }
    }
}

/// `rec-x.m4a` -> `rec-x_20260830-121314.m4a`.
pub fn rotated_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let ts = Utc::now().format("%Y%m%d-%H%M%S");

    let name = match path.extension() {
        Some(ext) => format!("{stem}_{ts}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{ts}"),
    };

    path.with_file_name(name)
}
