pub mod analyzer;
pub mod monitor;

pub use analyzer::{rms_level, LevelAnalyzer};
pub use monitor::{LevelMonitor, LevelState};
