use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::SessionError;
use crate::media::ReferenceAsset;
use crate::recording::RecordingArtifact;

/// Orchestration state of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Primed,
    DeviceAcquiring,
    Recording,
    Finalizing,
    AwaitingScore,
    Scored,
    Errored,
}

impl SessionState {
    /// No transition leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Scored | SessionState::Errored)
    }

    /// States in which the device may be held
    pub fn holds_device(self) -> bool {
        matches!(
            self,
            SessionState::DeviceAcquiring | SessionState::Recording | SessionState::Finalizing
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Primed => "primed",
            SessionState::DeviceAcquiring => "acquiring device",
            SessionState::Recording => "recording",
            SessionState::Finalizing => "finalizing",
            SessionState::AwaitingScore => "awaiting score",
            SessionState::Scored => "scored",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// What ended the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Duration timer armed at recording start fired
    Timer,
    /// Reference asset reported its natural end first
    MediaEnded,
}

/// Summary of the finished recording (the bytes stay with the session)
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub mime_type: String,
    pub bytes: usize,
    pub chunk_count: usize,
}

impl From<&RecordingArtifact> for ArtifactSummary {
    fn from(artifact: &RecordingArtifact) -> Self {
        Self {
            mime_type: artifact.mime_type.clone(),
            bytes: artifact.len(),
            chunk_count: artifact.chunk_count,
        }
    }
}

/// Observable view of a session, published on every change
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    /// Every state entered, in order, starting with `Idle`
    pub history: Vec<SessionState>,
    pub reference: Option<ReferenceAsset>,
    /// Whether the duration auto-stop timer was ever armed
    pub timer_armed: bool,
    pub stop_trigger: Option<StopTrigger>,
    /// Time from entering `Recording` to the stop trigger
    pub recorded_ms: Option<u64>,
    pub chunks_received: usize,
    pub bytes_received: usize,
    pub artifact: Option<ArtifactSummary>,
    pub scoring_enabled: bool,
    pub score: Option<f64>,
    pub error: Option<SessionError>,
    pub error_kind: Option<&'static str>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(session_id: Uuid, scoring_enabled: bool) -> Self {
        Self {
            session_id,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            reference: None,
            timer_armed: false,
            stop_trigger: None,
            recorded_ms: None,
            chunks_received: 0,
            bytes_received: 0,
            artifact: None,
            scoring_enabled,
            score: None,
            error: None,
            error_kind: None,
            updated_at: Utc::now(),
        }
    }

    /// Nothing further will happen without another command
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal()
            || (self.state == SessionState::AwaitingScore && !self.scoring_enabled)
    }
}
