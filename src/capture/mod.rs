pub mod backend;
pub mod ffmpeg;
pub mod rotation;
pub mod supervisor;

pub use backend::{CaptureBackend, CaptureChild, CaptureExit, MonitorStream};
pub use ffmpeg::FfmpegBackend;
pub use rotation::{rotated_path, RotationConfig, RotationGuard};
pub use supervisor::{recovered_path, CaptureSupervisor, SupervisorEvent};
