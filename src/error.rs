use thiserror::Error;

/// Errors surfaced by the capture subsystem.
///
/// Only failures that affect the recorded artifact appear here. Metering
/// failures are absorbed and retried inside the level monitor and never
/// reach the caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The external capture executable could not be located or is not
    /// executable. Checked before any spawn, so a session never half-starts.
    #[error("capture executable '{0}' not found on PATH or not executable")]
    CaptureUnavailable(String),

    /// `start()` called while a session is already recording.
    #[error("a recording session is already active")]
    AlreadyRecording,

    /// `stop()` called with no active session.
    #[error("no recording session is active")]
    NotRecording,

    /// The capture process died abnormally and the recovery budget is spent.
    #[error("capture process died {consecutive} times in a row, giving up")]
    CaptureProcessDied { consecutive: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
