use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{SessionError, SessionResult};

/// Fires once when playback reaches the end of the asset.
///
/// A receiver whose sender was dropped (playback paused or restarted) never
/// signals an end.
pub type PlaybackEnded = oneshot::Receiver<()>;

/// Reference media transport
///
/// Implementations:
/// - `FileMediaSource`: local file, duration probed from the container, clock-driven playback
/// - Test doubles with scripted durations
#[async_trait::async_trait]
pub trait MediaSourceHandle: Send {
    /// Identity of the bound asset (file path or caller-chosen name)
    fn identity(&self) -> &str;

    /// Local file backing the asset, if any
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Force metadata resolution and return the duration in seconds
    ///
    /// Fails with `InvalidDuration` when the value is not finite or not positive.
    async fn prime_duration(&mut self) -> SessionResult<f64>;

    /// Start (or resume) playback; restarts from zero if the asset already ended
    async fn play(&mut self) -> SessionResult<PlaybackEnded>;

    /// Pause playback, keeping the current position
    fn pause(&mut self);
}

/// Check that a resolved duration can bound a recording
pub fn validate_duration(seconds: f64) -> SessionResult<f64> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(SessionError::InvalidDuration(seconds))
    }
}

/// A primed reference asset. Only constructible with a valid duration.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceAsset {
    pub identity: String,
    pub path: Option<PathBuf>,
    pub duration_seconds: f64,
}

impl ReferenceAsset {
    pub fn new(
        identity: impl Into<String>,
        path: Option<PathBuf>,
        duration_seconds: f64,
    ) -> SessionResult<Self> {
        Ok(Self {
            identity: identity.into(),
            path,
            duration_seconds: validate_duration(duration_seconds)?,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_seconds)
    }
}
