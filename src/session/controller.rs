//! Recording session controller.
//!
//! The public state machine (`Idle -> Recording -> Idle`) coordinating the
//! capture supervisor, the level monitor, and the rotation guard. At most one
//! session is active per controller; start/stop are serialized by the async
//! mutex around the active slot, so concurrent calls are rejected rather than
//! interleaved.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{SessionEvent, StopOutcome};
use super::metadata::{metadata_path, MetadataTracker};
use crate::capture::backend::CaptureBackend;
use crate::capture::rotation::{RotationConfig, RotationGuard};
use crate::capture::supervisor::{CaptureSupervisor, SupervisorEvent};
use crate::config::Config;
use crate::error::CaptureError;
use crate::level::monitor::{LevelMonitor, LevelState};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const SUPERVISOR_CHANNEL_CAPACITY: usize = 8;

pub struct SessionController {
    config: Config,
    backend: Arc<dyn CaptureBackend>,
    metadata: Arc<MetadataTracker>,
    level: LevelState,
    events: mpsc::Sender<SessionEvent>,
    active: Arc<Mutex<Option<ActiveSession>>>,
}

struct ActiveSession {
    session_id: Uuid,
    /// First segment of the session; duration accounting is keyed off it for
    /// the whole logical session, across rotations and recoveries.
    original_path: PathBuf,
    started_at: DateTime<Utc>,
    current_path_rx: watch::Receiver<PathBuf>,
    supervisor_slot: Arc<Mutex<Option<CaptureSupervisor>>>,
    monitor: LevelMonitor,
    rotation: RotationGuard,
    tick_task: JoinHandle<()>,
    /// Ends on its own once supervisor and rotation drop their senders.
    _pump_task: JoinHandle<()>,
}

impl ActiveSession {
    /// Stop everything the session owns. Every step runs even if an earlier
    /// one errors, so no subprocess or timer is left behind.
    async fn teardown(mut self) {
        self.monitor.stop().await;
        self.rotation.stop().await;
        self.tick_task.abort();

        let supervisor = {
            let mut slot = self.supervisor_slot.lock().await;
            slot.take()
        };
        if let Some(mut supervisor) = supervisor {
            if let Err(e) = supervisor.stop().await {
                warn!(session_id = %self.session_id, "error stopping capture supervisor: {e}");
            }
        }
    }
}

impl SessionController {
    /// Build a controller and the event stream collaborators subscribe to.
    pub fn new(config: Config, backend: Arc<dyn CaptureBackend>) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let controller = Self {
            config,
            backend,
            metadata: Arc::new(MetadataTracker::new()),
            level: LevelState::new(),
            events,
            active: Arc::new(Mutex::new(None)),
        };

        (controller, events_rx)
    }

    /// Begin a session, writing into `output_dir` (or the configured default
    /// recordings directory). Returns the initial output path.
    pub async fn start(&self, output_dir: Option<PathBuf>) -> Result<PathBuf, CaptureError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let dir = output_dir
            .unwrap_or_else(|| PathBuf::from(&self.config.capture.recordings_dir));
        std::fs::create_dir_all(&dir)?;

        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let path = dir.join(format!(
            "rec-{}.{}",
            started_at.format("%Y%m%d-%H%M%S"),
            self.config.capture.extension
        ));

        self.metadata
            .record_start_at(&path, started_at)
            .map_err(CaptureError::Other)?;

        let (sup_tx, sup_rx) = mpsc::channel(SUPERVISOR_CHANNEL_CAPACITY);
        let supervisor =
            match CaptureSupervisor::start(self.backend.clone(), path.clone(), sup_tx.clone())
                .await
            {
                Ok(supervisor) => supervisor,
                Err(e) => {
                    self.metadata.drop_path(&path);
                    let _ = std::fs::remove_file(metadata_path(&path));
                    return Err(e);
                }
            };

        let supervisor_slot = Arc::new(Mutex::new(Some(supervisor)));
        let monitor = LevelMonitor::start(self.backend.clone(), self.level.clone());

        let (path_tx, current_path_rx) = watch::channel(path.clone());
        let path_tx = Arc::new(path_tx);

        let (rotated_tx, rotated_rx) = mpsc::channel(SUPERVISOR_CHANNEL_CAPACITY);
        let rotation = RotationGuard::spawn(
            RotationConfig::from(&self.config.rotation),
            self.backend.clone(),
            supervisor_slot.clone(),
            path_tx.clone(),
            sup_tx,
            rotated_tx,
        );

        let tick_task = tokio::spawn(tick_loop(
            self.events.clone(),
            self.level.clone(),
            started_at,
            Duration::from_millis(self.config.session.tick_interval_ms),
        ));

        let pump_task = tokio::spawn(pump_events(
            sup_rx,
            rotated_rx,
            path_tx,
            supervisor_slot.clone(),
            self.events.clone(),
            self.active.clone(),
            self.metadata.clone(),
            session_id,
        ));

        info!(%session_id, path = %path.display(), "recording started");
        let _ = self
            .events
            .send(SessionEvent::Started {
                session_id,
                path: path.clone(),
                started_at,
            })
            .await;

        *active = Some(ActiveSession {
            session_id,
            original_path: path.clone(),
            started_at,
            current_path_rx,
            supervisor_slot,
            monitor,
            rotation,
            tick_task,
            _pump_task: pump_task,
        });

        Ok(path)
    }

    /// End the active session. Zero measured whole seconds is reported as a
    /// discard and the artifacts are deleted.
    pub async fn stop(&self) -> Result<StopOutcome, CaptureError> {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            return Err(CaptureError::NotRecording);
        };

        let session_id = session.session_id;
        let original_path = session.original_path.clone();
        let current_path = session.current_path_rx.borrow().clone();

        session.teardown().await;

        let duration = self
            .metadata
            .record_stop(&original_path)
            .map_err(CaptureError::Other)?;

        if duration.as_secs() == 0 {
            info!(%session_id, "zero-duration session, discarding output");
            self.discard_artifacts(&original_path, &current_path);
            self.metadata.drop_path(&original_path);
            let _ = self
                .events
                .send(SessionEvent::Discarded {
                    path: original_path.clone(),
                })
                .await;
            return Ok(StopOutcome::Discarded {
                path: original_path,
            });
        }

        info!(
            %session_id,
            path = %current_path.display(),
            duration_secs = duration.as_secs(),
            "recording stopped"
        );
        let _ = self
            .events
            .send(SessionEvent::Stopped {
                path: current_path.clone(),
                duration,
            })
            .await;

        Ok(StopOutcome::Stopped {
            path: current_path,
            duration,
        })
    }

    /// Current loudness in [0, 1]. Always safe; reads 0 when idle.
    pub fn level(&self) -> f32 {
        self.level.get()
    }

    pub async fn is_recording(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Canonical path of the live segment, if a session is active.
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.current_path_rx.borrow().clone())
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.lock().await.as_ref().map(|s| s.started_at)
    }

    fn discard_artifacts(&self, original: &PathBuf, current: &PathBuf) {
        for path in [original, current] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "failed to delete discarded recording: {e}");
                }
            }
        }
        let _ = std::fs::remove_file(metadata_path(original));
    }
}

/// Best-effort progress ticks: elapsed seconds plus current loudness. Dropped
/// (not queued) when the collaborator lags.
async fn tick_loop(
    events: mpsc::Sender<SessionEvent>,
    level: LevelState,
    started_at: DateTime<Utc>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The immediate first tick would always report zero elapsed.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let elapsed_secs = (Utc::now() - started_at).num_seconds().max(0) as u64;
        let _ = events.try_send(SessionEvent::Tick {
            elapsed_secs,
            level: level.get(),
        });
    }
}

/// Forward supervisor/rotation notifications to the session event stream.
///
/// Recovery moves the canonical path; a fatal supervisor exit tears the whole
/// session down and forces the controller back to idle. Only events from the
/// supervisor currently occupying the slot are honored: a rotated-out
/// supervisor stays alive through the overlap window and may still crash,
/// recover, or report fatal, and none of that concerns the live segment.
/// The loop ends when both senders are gone (normal teardown).
async fn pump_events(
    mut sup_rx: mpsc::Receiver<SupervisorEvent>,
    mut rotated_rx: mpsc::Receiver<PathBuf>,
    path_tx: Arc<watch::Sender<PathBuf>>,
    slot: Arc<Mutex<Option<CaptureSupervisor>>>,
    events: mpsc::Sender<SessionEvent>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    metadata: Arc<MetadataTracker>,
    session_id: Uuid,
) {
    let mut sup_closed = false;
    let mut rotated_closed = false;

    while !(sup_closed && rotated_closed) {
        tokio::select! {
            event = sup_rx.recv(), if !sup_closed => match event {
                Some(SupervisorEvent::Recovered { supervisor, path }) => {
                    let live = slot.lock().await.as_ref().map(CaptureSupervisor::id);
                    if live != Some(supervisor) {
                        debug!(
                            %session_id,
                            path = %path.display(),
                            "ignoring recovery from a rotated-out capture"
                        );
                        continue;
                    }
                    let _ = path_tx.send(path.clone());
                    let _ = events.send(SessionEvent::CaptureRecovered { path }).await;
                }
                Some(SupervisorEvent::Fatal { supervisor, error: message }) => {
                    let live = slot.lock().await.as_ref().map(CaptureSupervisor::id);
                    if live != Some(supervisor) {
                        debug!(
                            %session_id,
                            "ignoring fatal report from a rotated-out capture: {message}"
                        );
                        continue;
                    }
                    error!(%session_id, "capture failed beyond recovery: {message}");
                    let session = {
                        let mut guard = active.lock().await;
                        guard.take()
                    };
                    // A concurrent clean stop() may have emptied the session
                    // already; its outcome stands and no Failed follows it.
                    if let Some(session) = session {
                        if let Err(e) = metadata.record_stop(&session.original_path) {
                            warn!("failed to finalize metadata after fatal capture: {e}");
                        }
                        session.teardown().await;
                        let _ = events.send(SessionEvent::Failed { message }).await;
                    }
                    return;
                }
                None => sup_closed = true,
            },

            rotated = rotated_rx.recv(), if !rotated_closed => match rotated {
                Some(path) => {
                    let _ = events.send(SessionEvent::SegmentRotated { path }).await;
                }
                None => rotated_closed = true,
            },
        }
    }
}
