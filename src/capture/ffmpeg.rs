//! ffmpeg-backed implementation of the capture seam.
//!
//! Two process shapes:
//! - capture: records the default input device into an encoded file, with a
//!   graceful stop by writing `q` to ffmpeg's stdin (escalating to kill).
//! - monitor: streams the same input as WAV over stdout for the level meter.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::backend::{CaptureBackend, CaptureChild, CaptureExit, MonitorStream};
use crate::config::CaptureConfig;

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(2);
const MONITOR_CHUNK_BYTES: usize = 4096;

pub struct FfmpegBackend {
    config: CaptureConfig,
}

impl FfmpegBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Platform-specific input arguments for the default audio device.
    fn input_args(&self) -> Vec<String> {
        #[cfg(target_os = "macos")]
        {
            vec!["-f".into(), "avfoundation".into(), "-i".into(), ":0".into()]
        }
        #[cfg(target_os = "linux")]
        {
            vec!["-f".into(), "pulse".into(), "-i".into(), "default".into()]
        }
        #[cfg(target_os = "windows")]
        {
            vec![
                "-f".into(),
                "dshow".into(),
                "-i".into(),
                "audio=default".into(),
            ]
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            vec![]
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.capture_bin);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        for arg in self.input_args() {
            cmd.arg(arg);
        }
        cmd.arg("-ac")
            .arg(self.config.channels.to_string())
            .arg("-ar")
            .arg(self.config.sample_rate.to_string());
        cmd
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FfmpegBackend {
    fn is_available(&self) -> bool {
        resolve_on_path(&self.config.capture_bin).is_some()
    }

    async fn spawn_capture(&self, output: &Path) -> Result<Box<dyn CaptureChild>> {
        let mut cmd = self.base_command();
        cmd.arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {} for capture into {}",
                self.config.capture_bin,
                output.display()
            )
        })?;

        // Held outside the Child so wait() can run without closing it.
        let stdin = child.stdin.take();

        debug!(
            pid = child.id(),
            output = %output.display(),
            "capture process spawned"
        );

        Ok(Box::new(FfmpegCapture { child, stdin }))
    }

    async fn spawn_monitor(&self) -> Result<Box<dyn MonitorStream>> {
        let mut cmd = self.base_command();
        cmd.arg("-f")
            .arg("wav")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {} for level monitoring",
                self.config.capture_bin
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .context("monitor process has no stdout pipe")?;

        debug!(pid = child.id(), "monitor process spawned");

        Ok(Box::new(FfmpegMonitor { child, stdout }))
    }

    fn name(&self) -> &str {
        &self.config.capture_bin
    }
}

struct FfmpegCapture {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait::async_trait]
impl CaptureChild for FfmpegCapture {
    async fn wait(&mut self) -> CaptureExit {
        match self.child.wait().await {
            Ok(status) if status.success() => CaptureExit::Clean,
            Ok(status) => CaptureExit::Abnormal(status.code()),
            Err(e) => {
                warn!("failed to wait on capture process: {e}");
                CaptureExit::Abnormal(None)
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        // ffmpeg finalizes the container and releases the file on `q`.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                status.context("waiting for capture process exit")?;
                Ok(())
            }
            Err(_) => {
                warn!(
                    pid = self.child.id(),
                    "capture process ignored graceful stop, killing"
                );
                self.child
                    .kill()
                    .await
                    .context("killing capture process")?;
                Ok(())
            }
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

struct FfmpegMonitor {
    child: Child,
    stdout: ChildStdout,
}

#[async_trait::async_trait]
impl MonitorStream for FfmpegMonitor {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MONITOR_CHUNK_BYTES];
        match self.stdout.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(e) => {
                debug!("monitor stream read failed: {e}");
                None
            }
        }
    }

    async fn terminate(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Look the executable up on PATH, requiring the execute bit on unix.
fn resolve_on_path(bin: &str) -> Option<PathBuf> {
    let bin_path = Path::new(bin);
    if bin_path.is_absolute() {
        return is_executable(bin_path).then(|| bin_path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(bin))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
