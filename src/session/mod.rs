//! Recording session management
//!
//! This module provides the public-facing pieces of the capture subsystem:
//! - `SessionController`: the start/stop state machine, one active session
//! - `SessionEvent`/`StopOutcome`: collaborator notifications and outcomes
//! - `MetadataTracker`: start-time index and persisted per-recording records

mod controller;
mod events;
mod metadata;

pub use controller::SessionController;
pub use events::{SessionEvent, StopOutcome};
pub use metadata::{metadata_path, MetadataTracker, SessionMetadata};
