//! Live loudness monitor.
//!
//! Owns a long-lived metering subprocess streaming raw PCM, frames the byte
//! stream into fixed windows, and publishes the smoothed level into a
//! single-writer cell. Metering is best-effort UX feedback: every stream
//! failure is absorbed and the monitor restarts itself; nothing here ever
//! surfaces an error to the session.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::analyzer::LevelAnalyzer;
use crate::capture::backend::{CaptureBackend, MonitorStream};

/// Samples per analysis frame (~23ms at 44.1kHz).
const FRAME_SAMPLES: usize = 1024;
const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// WAV container header length to discard from the stream head.
const WAV_HEADER_BYTES: usize = 44;

/// Delay before respawning a failed metering stream.
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// A live stream that produces no data for this long is treated as dead.
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Latest smoothed loudness, single writer (the monitor task), any number of
/// readers. Reads 0 whenever no session is recording.
#[derive(Debug, Clone, Default)]
pub struct LevelState(Arc<AtomicU32>);

impl LevelState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0f32.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.set(0.0);
    }
}

pub struct LevelMonitor {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: LevelState,
}

impl LevelMonitor {
    /// Spawn the metering loop. Never fails: if the backend cannot spawn a
    /// stream right now, the loop keeps retrying in the background.
    pub fn start(backend: Arc<dyn CaptureBackend>, state: LevelState) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(backend, state.clone(), stop_rx));

        Self {
            stop_tx,
            task: Some(task),
            state,
        }
    }

    /// Kill the metering subprocess and zero the meter.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("level monitor task panicked: {e}");
            }
        }
        self.state.reset();
    }
}

async fn run(
    backend: Arc<dyn CaptureBackend>,
    state: LevelState,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut analyzer = LevelAnalyzer::new();

    loop {
        if *stop_rx.borrow() {
            state.reset();
            return;
        }

        let mut stream = match backend.spawn_monitor().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("monitor stream spawn failed, retrying: {e}");
                if sleep_or_stop(&mut stop_rx, RESTART_DELAY).await {
                    state.reset();
                    return;
                }
                continue;
            }
        };

        if consume_stream(stream.as_mut(), &state, &mut analyzer, &mut stop_rx).await {
            stream.terminate().await;
            state.reset();
            return;
        }

        // Stream died or stalled; meter restarts silently.
        stream.terminate().await;
        analyzer.reset();
        state.reset();
        warn!("level monitor stream failed, restarting");
        if sleep_or_stop(&mut stop_rx, RESTART_DELAY).await {
            return;
        }
    }
}

/// Pump one stream until it fails. Returns true if a stop was requested.
async fn consume_stream(
    stream: &mut dyn MonitorStream,
    state: &LevelState,
    analyzer: &mut LevelAnalyzer,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    let mut pending: Vec<u8> = Vec::with_capacity(FRAME_BYTES * 2);
    let mut header_remaining = WAV_HEADER_BYTES;

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A closed channel means the handle was dropped without a
                // stop call; wind down rather than spin on the dead receiver.
                if changed.is_err() || *stop_rx.borrow() {
                    return true;
                }
            }

            chunk = tokio::time::timeout(STALL_TIMEOUT, stream.next_chunk()) => {
                let mut bytes = match chunk {
                    Ok(Some(bytes)) => bytes,
                    // Stream ended/errored, or the watchdog tripped on a
                    // process that is alive but silent.
                    Ok(None) | Err(_) => return false,
                };

                // Container header arrives at the head of the stream only.
                if header_remaining > 0 {
                    let skip = header_remaining.min(bytes.len());
                    bytes.drain(..skip);
                    header_remaining -= skip;
                }

                pending.extend_from_slice(&bytes);

                while pending.len() >= FRAME_BYTES {
                    let frame: Vec<i16> = pending[..FRAME_BYTES]
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]]))
                        .collect();
                    pending.drain(..FRAME_BYTES);

                    let level = analyzer.process(&frame);
                    state.set(level);
                }
            }
        }
    }
}

/// Sleep, waking early on stop. Returns true if a stop was requested or the
/// stop channel is gone.
async fn sleep_or_stop(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop_rx.borrow(),
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}
