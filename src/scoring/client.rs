use crate::error::{SessionError, SessionResult};
use crate::media::ReferenceAsset;
use crate::recording::RecordingArtifact;

/// External similarity scoring service
#[async_trait::async_trait]
pub trait ScoringClient: Send + Sync {
    /// Score the recording against the reference, in [0, 100]
    async fn score(
        &self,
        reference: &ReferenceAsset,
        recording: &RecordingArtifact,
    ) -> SessionResult<f64>;
}

/// Channel that ships the session's media to the scoring side
#[async_trait::async_trait]
pub trait UploadChannel: Send + Sync {
    async fn upload_reference(&self, reference: &ReferenceAsset) -> SessionResult<()>;

    async fn upload_recording(&self, recording: &RecordingArtifact) -> SessionResult<()>;
}

/// Reject scores outside [0, 100] or not finite
pub fn validate_score(score: f64) -> SessionResult<f64> {
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(score)
    } else {
        Err(SessionError::Scoring(format!("Score out of range: {}", score)))
    }
}
