use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::CaptureConstraints;
use crate::recording::EncodingHint;

/// Configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Camera resolution and track constraints
    pub constraints: CaptureConstraints,

    /// Requested recording container/codec
    pub encoding: EncodingHint,

    /// Also stop when the reference reports its natural end, whichever
    /// comes first with the duration timer
    pub stop_on_media_end: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            constraints: CaptureConstraints::default(),
            encoding: EncodingHint::default(),
            stop_on_media_end: true,
        }
    }
}
