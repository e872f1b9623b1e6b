use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::SessionResult;

/// Kind of a captured media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// A single track of a live stream
#[derive(Debug, Clone, Serialize)]
pub struct MediaTrack {
    pub kind: TrackKind,
    /// Device label (e.g. "/dev/video0")
    pub label: String,
    pub stopped: bool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            stopped: false,
        }
    }
}

/// Events delivered by an encoding stream, strictly in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Encoded bytes for the next slice of the recording
    Chunk(Vec<u8>),
    /// Encoder flushed everything after a stop request
    Stopped,
    /// Device-level failure; no further events follow
    Failed(String),
}

/// Platform encoder attached to a live stream
#[async_trait::async_trait]
pub trait StreamSource: Send {
    /// Whether the encoder can produce the given mime type
    fn supports_mime_type(&self, mime_type: &str) -> bool;

    /// Mime type used when the caller accepts the platform default
    fn default_mime_type(&self) -> &str;

    /// Begin encoding, emitting a chunk roughly every `timeslice`
    async fn start_encoding(
        &mut self,
        mime_type: &str,
        timeslice: Duration,
    ) -> SessionResult<mpsc::Receiver<RecorderEvent>>;

    /// Ask the encoder to flush and stop. Returns immediately; completion is
    /// signalled by `RecorderEvent::Stopped`.
    fn request_stop(&mut self);

    /// Stop the underlying tracks (camera/microphone). Must be idempotent.
    fn stop_tracks(&mut self);
}

/// Live camera/microphone capture handle
pub struct LiveStream {
    pub id: Uuid,
    pub tracks: Vec<MediaTrack>,
    pub acquired_at: DateTime<Utc>,
    source: Box<dyn StreamSource>,
}

impl LiveStream {
    pub fn new(tracks: Vec<MediaTrack>, source: Box<dyn StreamSource>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
            acquired_at: Utc::now(),
            source,
        }
    }

    /// True while at least one track is still running
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.stopped)
    }

    pub fn source(&self) -> &dyn StreamSource {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn StreamSource {
        self.source.as_mut()
    }

    /// Stop every track. Stopping an already stopped stream is a no-op.
    ///
    /// Returns whether anything was actually stopped.
    pub fn stop_all_tracks(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }

        self.source.stop_tracks();
        for track in &mut self.tracks {
            track.stopped = true;
        }

        info!("Live stream {} stopped ({} tracks)", self.id, self.tracks.len());
        true
    }
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Strip codec parameters and whitespace: "video/webm; codecs=vp9" -> "video/webm"
pub fn base_mime_type(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
