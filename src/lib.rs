pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod nats;
pub mod recording;
pub mod scoring;
pub mod session;

pub use capture::{
    CaptureConstraints, CaptureDevice, CaptureDeviceFactory, DeviceLock, LiveStream, MediaTrack,
    RecorderEvent, ReplayCaptureDevice, StreamSource, TrackKind,
};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use media::{FileMediaSource, MediaSourceHandle, ReferenceAsset};
pub use nats::{NatsClient, SessionStateMessage};
pub use recording::{CaptureBuffer, EncodingHint, RecordingArtifact, RecordingSession};
pub use scoring::{HttpScoringClient, ScoringClient, UploadChannel};
pub use session::{SessionConfig, SessionHandle, SessionSnapshot, SessionState, SyncOrchestrator};
