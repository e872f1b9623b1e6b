//! Capture session orchestration
//!
//! This module provides the `SyncOrchestrator` state machine that:
//! - Primes the reference asset and validates its duration
//! - Acquires the camera and arms the recorder before starting playback
//! - Stops recording and playback together when the reference duration elapses
//! - Releases the live stream exactly once, on success or failure
//! - Hands the finished recording to the scoring client
//!
//! `SessionHandle` is the message-passing front end used by the HTTP API.

mod config;
mod handle;
mod orchestrator;
mod state;

pub use config::SessionConfig;
pub use handle::{SessionCommand, SessionHandle};
pub use orchestrator::SyncOrchestrator;
pub use state::{ArtifactSummary, SessionSnapshot, SessionState, StopTrigger};
