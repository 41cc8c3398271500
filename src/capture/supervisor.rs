//! Supervision of the external process writing the session's audio file.
//!
//! The supervisor owns exactly one capture child at a time inside a task that
//! races the child's exit against a stop signal. An abnormal exit while the
//! session is still active is recovered once, into a `_recovered` file; a
//! second consecutive abnormal exit is fatal and reported to the controller.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::backend::{CaptureBackend, CaptureChild, CaptureExit};
use crate::error::CaptureError;

/// Consecutive automatic recoveries allowed per supervisor before a crash
/// becomes fatal.
const MAX_CONSECUTIVE_RECOVERIES: u32 = 1;

/// What a supervisor reports to its controller while running.
///
/// Every event carries the reporting supervisor's identity. Rotation can
/// leave a retired supervisor alive through the overlap window, and its
/// late reports must be distinguishable from the live segment's.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The capture process died abnormally and was restarted into `path`.
    Recovered { supervisor: Uuid, path: PathBuf },
    /// The capture process died beyond the recovery budget; the supervisor
    /// task has exited and that segment cannot continue.
    Fatal { supervisor: Uuid, error: String },
}

pub struct CaptureSupervisor {
    id: Uuid,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    output_path: PathBuf,
}

impl CaptureSupervisor {
    /// Verify the backend is usable, spawn the capture process, and hand it
    /// to a supervision task.
    pub async fn start(
        backend: Arc<dyn CaptureBackend>,
        output: PathBuf,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> Result<Self, CaptureError> {
        if !backend.is_available() {
            return Err(CaptureError::CaptureUnavailable(backend.name().to_string()));
        }

        let child = backend
            .spawn_capture(&output)
            .await
            .map_err(CaptureError::Other)?;

        let id = Uuid::new_v4();
        info!(supervisor = %id, output = %output.display(), "capture supervisor started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            id,
            child,
            backend,
            output.clone(),
            stop_rx,
            events,
        ));

        Ok(Self {
            id,
            stop_tx: Some(stop_tx),
            task: Some(task),
            output_path: output,
        })
    }

    /// Identity of this supervisor, carried on every event it emits.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The path this supervisor was started on. Recovery may move the live
    /// file; the controller tracks that through `SupervisorEvent::Recovered`.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Signal the supervision task to terminate the capture process and wait
    /// for it to wind down. Safe to call after a fatal exit; the task is
    /// simply already gone.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("capture supervision task panicked: {e}");
            }
        }
        Ok(())
    }
}

async fn supervise(
    id: Uuid,
    mut child: Box<dyn CaptureChild>,
    backend: Arc<dyn CaptureBackend>,
    mut path: PathBuf,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<SupervisorEvent>,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            // Stop requested (or the supervisor handle was dropped).
            _ = &mut stop_rx => {
                if let Err(e) = child.terminate().await {
                    warn!(path = %path.display(), "error terminating capture process: {e}");
                }
                info!(path = %path.display(), "capture process stopped");
                return;
            }

            exit = child.wait() => {
                match exit {
                    CaptureExit::Clean => {
                        // The process decided it was done; nothing to recover.
                        info!(path = %path.display(), "capture process exited cleanly");
                        return;
                    }
                    CaptureExit::Abnormal(code) => {
                        consecutive_failures += 1;
                        warn!(
                            path = %path.display(),
                            code = ?code,
                            consecutive = consecutive_failures,
                            "capture process died mid-session"
                        );

                        if consecutive_failures > MAX_CONSECUTIVE_RECOVERIES {
                            let err = CaptureError::CaptureProcessDied {
                                consecutive: consecutive_failures,
                            };
                            error!("{err}");
                            let _ = events
                                .send(SupervisorEvent::Fatal {
                                    supervisor: id,
                                    error: err.to_string(),
                                })
                                .await;
                            return;
                        }

                        path = recovered_path(&path);
                        match backend.spawn_capture(&path).await {
                            Ok(new_child) => {
                                child = new_child;
                                info!(path = %path.display(), "capture recovered into new file");
                                let _ = events
                                    .send(SupervisorEvent::Recovered {
                                        supervisor: id,
                                        path: path.clone(),
                                    })
                                    .await;
                            }
                            Err(e) => {
                                error!("capture recovery spawn failed: {e}");
                                let _ = events
                                    .send(SupervisorEvent::Fatal {
                                        supervisor: id,
                                        error: e.to_string(),
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// `rec-x.m4a` -> `rec-x_recovered.m4a`.
pub fn recovered_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());

    let name = match path.extension() {
        Some(ext) => format!("{stem}_recovered.{}", ext.to_string_lossy()),
        None => format!("{stem}_recovered"),
    };

    path.with_file_name(name)
}
