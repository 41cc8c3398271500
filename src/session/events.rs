use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Notifications pushed to collaborators over the session event channel.
///
/// Lifecycle events are delivered reliably (bounded channel, awaited sends);
/// `Tick` is best-effort and dropped when the receiver lags.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session began writing to `path`.
    Started {
        session_id: uuid::Uuid,
        path: PathBuf,
        started_at: DateTime<Utc>,
    },
    /// Periodic progress: elapsed wall-clock seconds and current loudness.
    Tick { elapsed_secs: u64, level: f32 },
    /// Size rotation switched the live segment to `path`.
    SegmentRotated { path: PathBuf },
    /// The capture process crashed and was restarted into `path`.
    CaptureRecovered { path: PathBuf },
    /// Clean stop with the final segment path and the full-session duration.
    Stopped { path: PathBuf, duration: Duration },
    /// The session measured zero whole seconds and its output was discarded.
    Discarded { path: PathBuf },
    /// Unrecoverable capture failure; the session was forced back to idle.
    Failed { message: String },
}

/// Result of a successful `stop()` call.
#[derive(Debug, Clone)]
pub enum StopOutcome {
    /// Recording kept; `path` is the most recent (canonical) segment.
    Stopped { path: PathBuf, duration: Duration },
    /// Zero measured seconds: the artifact was deleted, by policy, so that
    /// accidental taps do not clutter storage.
    Discarded { path: PathBuf },
}
