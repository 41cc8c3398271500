use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub rotation: RotationSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Directory where recordings land when the caller does not pick one.
    pub recordings_dir: String,
    /// Name of the external capture executable (resolved on PATH).
    pub capture_bin: String,
    /// Container extension for capture output files. The capture executable
    /// picks the encoder from the extension.
    pub extension: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotationSettings {
    /// Segment size ceiling in megabytes before a new segment is started.
    pub max_segment_mb: u64,
    pub check_interval_secs: u64,
    /// How long the old and new segment captures overlap during hand-off.
    pub overlap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Interval between duration/level tick events, in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                recordings_dir: default_recordings_dir(),
                capture_bin: "ffmpeg".to_string(),
                extension: "m4a".to_string(),
                sample_rate: 44100,
                channels: 1,
            },
            rotation: RotationSettings {
                max_segment_mb: 25,
                check_interval_secs: 1,
                overlap_ms: 500,
            },
            session: SessionSettings {
                tick_interval_ms: 1000,
            },
        }
    }
}

impl Config {
    /// Load configuration from a file, layered over compiled-in defaults.
    /// A missing file is fine; every key falls back to its default.
    pub fn load(path: &str) -> Result<Self> {
        let defaults = Config::default();

        let settings = config::Config::builder()
            .set_default("capture.recordings_dir", defaults.capture.recordings_dir)?
            .set_default("capture.capture_bin", defaults.capture.capture_bin)?
            .set_default("capture.extension", defaults.capture.extension)?
            .set_default("capture.sample_rate", defaults.capture.sample_rate)?
            .set_default("capture.channels", defaults.capture.channels as u32)?
            .set_default("rotation.max_segment_mb", defaults.rotation.max_segment_mb)?
            .set_default(
                "rotation.check_interval_secs",
                defaults.rotation.check_interval_secs,
            )?
            .set_default("rotation.overlap_ms", defaults.rotation.overlap_ms)?
            .set_default(
                "session.tick_interval_ms",
                defaults.session.tick_interval_ms,
            )?
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl RotationSettings {
    pub fn max_segment_bytes(&self) -> u64 {
        self.max_segment_mb * 1024 * 1024
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn overlap(&self) -> Duration {
        Duration::from_millis(self.overlap_ms)
    }
}

fn default_recordings_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join("Recordings")
        .display()
        .to_string()
}
