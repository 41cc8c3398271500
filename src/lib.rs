pub mod capture;
pub mod config;
pub mod error;
pub mod level;
pub mod session;

pub use capture::{
    CaptureBackend, CaptureChild, CaptureExit, CaptureSupervisor, FfmpegBackend, MonitorStream,
    RotationConfig, RotationGuard, SupervisorEvent,
};
pub use config::Config;
pub use error::CaptureError;
pub use level::{LevelAnalyzer, LevelMonitor, LevelState};
pub use session::{SessionController, SessionEvent, SessionMetadata, StopOutcome};
