use serde::Serialize;

/// Result type for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Everything that can end (or refuse) a capture session
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Reference duration is zero, negative, infinite or NaN
    #[error("Invalid reference duration: {0}")]
    InvalidDuration(f64),

    /// Camera/microphone could not be opened (permission, missing device, constraints)
    #[error("Device acquisition failed: {0}")]
    DeviceAcquisition(String),

    /// None of the requested container/codec combinations is available
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// Recorder stopped without ever delivering a chunk
    #[error("Recording is empty: no chunks were received")]
    EmptyRecording,

    /// Device-level failure reported by the recorder mid-recording
    #[error("Capture interrupted: {0}")]
    CaptureInterrupted(String),

    /// Reference transport failed after recording started
    #[error("Playback error: {0}")]
    Playback(String),

    /// Upload boundary rejected the reference or recording
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Scoring service unreachable or returned an unusable response
    #[error("Scoring failed: {0}")]
    Scoring(String),

    /// Invalid call ordering (double start, start before priming, busy device)
    #[error("{0}")]
    User(String),
}

impl SessionError {
    /// User errors are refused calls; they never move the session to `Errored`
    pub fn is_user_error(&self) -> bool {
        matches!(self, SessionError::User(_))
    }

    /// Short machine-readable kind, used by the HTTP API and event messages
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidDuration(_) => "invalid_duration",
            SessionError::DeviceAcquisition(_) => "device_acquisition",
            SessionError::UnsupportedEncoding(_) => "unsupported_encoding",
            SessionError::EmptyRecording => "empty_recording",
            SessionError::CaptureInterrupted(_) => "capture_interrupted",
            SessionError::Playback(_) => "playback",
            SessionError::Upload(_) => "upload",
            SessionError::Scoring(_) => "scoring",
            SessionError::User(_) => "user",
        }
    }
}

// Serialized as the display string so snapshots can carry it to clients
impl Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}
