use anyhow::Result;
use std::path::Path;

/// How a capture process ended, as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    /// Exit status zero.
    Clean,
    /// Non-zero exit status, or the status could not be read at all.
    Abnormal(Option<i32>),
}

/// Typed handle over one running capture process.
///
/// Narrow on purpose: the supervisor only ever waits for exit, terminates
/// gracefully, or asks for the pid for logging.
#[async_trait::async_trait]
pub trait CaptureChild: Send {
    /// Wait for the process to exit. Cancel-safe; the supervisor races this
    /// against its stop signal.
    async fn wait(&mut self) -> CaptureExit;

    /// Ask the process to stop writing and release its output file, waiting
    /// until it has exited. Escalates to a hard kill if the process ignores
    /// the graceful request.
    async fn terminate(&mut self) -> Result<()>;

    fn id(&self) -> Option<u32>;
}

/// One live metering stream: raw interleaved PCM chunks from a subprocess.
#[async_trait::async_trait]
pub trait MonitorStream: Send {
    /// Next chunk of raw bytes. `None` means the stream ended or errored;
    /// the level monitor treats both the same way and restarts.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;

    /// Kill the subprocess behind the stream.
    async fn terminate(&mut self);
}

/// Capture backend seam.
///
/// The real implementation spawns external processes (ffmpeg); tests plug in
/// scripted mocks with spawn/stop spies.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Precondition probe: can this backend spawn at all? Checked before
    /// every capture spawn so a missing executable is a clean refusal, not a
    /// crash halfway into a session.
    fn is_available(&self) -> bool;

    /// Spawn a process that writes encoded audio to `output` until stopped.
    async fn spawn_capture(&self, output: &Path) -> Result<Box<dyn CaptureChild>>;

    /// Spawn a process that streams raw PCM to its stdout for metering.
    async fn spawn_monitor(&self) -> Result<Box<dyn MonitorStream>>;

    /// Backend name for logging and error messages.
    fn name(&self) -> &str;
}
