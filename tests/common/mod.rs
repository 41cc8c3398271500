// Shared test doubles for the capture seam.
//
// MockBackend records every spawn/terminate as a SpyEvent so tests can assert
// ordering properties (rotation hand-off, recovery), and plays back scripted
// process exits and metering streams.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vocalog::config::{CaptureConfig, Config, RotationSettings, SessionSettings};
use vocalog::{CaptureBackend, CaptureChild, CaptureExit, MonitorStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpyEvent {
    CaptureSpawned(PathBuf),
    CaptureTerminated(PathBuf),
    MonitorSpawned,
}

/// Scripted behavior for one spawned capture process.
pub enum ExitScript {
    /// Runs until terminated.
    Hold,
    /// Dies abnormally after the delay.
    AbnormalAfter(Duration, Option<i32>),
}

/// Scripted behavior for one metering stream.
pub enum MonitorScript {
    /// Delivers the chunks in order, then ends the stream.
    Chunks(Vec<(Duration, Vec<u8>)>),
    /// Delivers the same chunk forever.
    Repeat { delay: Duration, chunk: Vec<u8> },
    /// Never delivers anything (exercises the stall watchdog).
    Stall,
}

#[derive(Default)]
pub struct MockBackend {
    available: AtomicBool,
    fail_spawn: AtomicBool,
    events: Arc<Mutex<Vec<SpyEvent>>>,
    capture_scripts: Mutex<VecDeque<ExitScript>>,
    monitor_scripts: Mutex<VecDeque<MonitorScript>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.available.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn push_capture(&self, script: ExitScript) {
        self.capture_scripts.lock().unwrap().push_back(script);
    }

    pub fn push_monitor(&self, script: MonitorScript) {
        self.monitor_scripts.lock().unwrap().push_back(script);
    }

    pub fn events(&self) -> Vec<SpyEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn capture_spawns(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SpyEvent::CaptureSpawned(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn monitor_spawn_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SpyEvent::MonitorSpawned))
            .count()
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MockBackend {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn spawn_capture(&self, output: &Path) -> Result<Box<dyn CaptureChild>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            bail!("scripted capture spawn failure");
        }

        self.events
            .lock()
            .unwrap()
            .push(SpyEvent::CaptureSpawned(output.to_path_buf()));

        let script = self
            .capture_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ExitScript::Hold);

        Ok(Box::new(MockCaptureChild {
            path: output.to_path_buf(),
            script: Some(script),
            events: self.events.clone(),
        }))
    }

    async fn spawn_monitor(&self) -> Result<Box<dyn MonitorStream>> {
        self.events.lock().unwrap().push(SpyEvent::MonitorSpawned);

        let script = self
            .monitor_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MonitorScript::Repeat {
                delay: Duration::from_millis(50),
                chunk: pcm_chunk(0, 2048),
            });

        Ok(Box::new(MockMonitorStream { script }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockCaptureChild {
    path: PathBuf,
    script: Option<ExitScript>,
    events: Arc<Mutex<Vec<SpyEvent>>>,
}

#[async_trait::async_trait]
impl CaptureChild for MockCaptureChild {
    async fn wait(&mut self) -> CaptureExit {
        match self.script.take() {
            Some(ExitScript::AbnormalAfter(delay, code)) => {
                tokio::time::sleep(delay).await;
                CaptureExit::Abnormal(code)
            }
            Some(ExitScript::Hold) | None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(SpyEvent::CaptureTerminated(self.path.clone()));
        Ok(())
    }

    fn id(&self) -> Option<u32> {
        None
    }
}

struct MockMonitorStream {
    script: MonitorScript,
}

#[async_trait::async_trait]
impl MonitorStream for MockMonitorStream {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        match &mut self.script {
            MonitorScript::Chunks(chunks) => {
                if chunks.is_empty() {
                    return None;
                }
                let (delay, chunk) = chunks.remove(0);
                tokio::time::sleep(delay).await;
                Some(chunk)
            }
            MonitorScript::Repeat { delay, chunk } => {
                tokio::time::sleep(*delay).await;
                Some(chunk.clone())
            }
            MonitorScript::Stall => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn terminate(&mut self) {}
}

/// Little-endian PCM bytes: `count` copies of `sample`.
pub fn pcm_chunk(sample: i16, count: usize) -> Vec<u8> {
    std::iter::repeat(sample.to_le_bytes())
        .take(count)
        .flatten()
        .collect()
}

/// 44 placeholder bytes standing in for a WAV container header.
pub fn wav_header() -> Vec<u8> {
    vec![0u8; 44]
}

/// Like [`test_config`] but with a 1MB rotation threshold a test can cross
/// by writing a file, and a caller-chosen overlap window.
pub fn rotating_test_config(recordings_dir: &Path, overlap_ms: u64) -> Config {
    Config {
        capture: CaptureConfig {
            recordings_dir: recordings_dir.display().to_string(),
            capture_bin: "mock".to_string(),
            extension: "m4a".to_string(),
            sample_rate: 44100,
            channels: 1,
        },
        rotation: RotationSettings {
            max_segment_mb: 1,
            check_interval_secs: 1,
            overlap_ms,
        },
        session: SessionSettings {
            tick_interval_ms: 200,
        },
    }
}

/// Controller configuration pointed at a temp directory, with a fast tick
/// and a rotation threshold no test file will ever reach.
pub fn test_config(recordings_dir: &Path) -> Config {
    Config {
        capture: CaptureConfig {
            recordings_dir: recordings_dir.display().to_string(),
            capture_bin: "mock".to_string(),
            extension: "m4a".to_string(),
            sample_rate: 44100,
            channels: 1,
        },
        rotation: RotationSettings {
            max_segment_mb: 1024,
            check_interval_secs: 1,
            overlap_ms: 10,
        },
        session: SessionSettings {
            tick_interval_ms: 50,
        },
    }
}
