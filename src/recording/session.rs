use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::buffer::{CaptureBuffer, RecordingArtifact};
use crate::capture::{LiveStream, RecorderEvent};
use crate::error::{SessionError, SessionResult};

/// Requested container/codec for the recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingHint {
    /// Preferred mime type (e.g. "video/webm;codecs=vp9")
    pub preferred: String,
    /// Tried in order when the preferred type is unavailable
    pub fallbacks: Vec<String>,
    /// Use the platform default when nothing requested is available
    pub accept_platform_default: bool,
    /// Interval between encoded chunks
    pub timeslice: Duration,
}

impl Default for EncodingHint {
    fn default() -> Self {
        Self {
            preferred: "video/webm;codecs=vp9".to_string(),
            fallbacks: vec!["video/webm".to_string()],
            accept_platform_default: true,
            timeslice: Duration::from_secs(1),
        }
    }
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Recording,
    Stopping,
    Inactive,
}

/// Accumulates the encoded chunks of one recording
pub struct RecordingSession {
    mime_type: String,
    buffer: CaptureBuffer,
    events: mpsc::Receiver<RecorderEvent>,
    state: RecorderState,
}

impl RecordingSession {
    /// Attach an encoder to the stream and begin capturing chunks
    pub async fn start(stream: &mut LiveStream, hint: &EncodingHint) -> SessionResult<Self> {
        let mime_type = negotiate_mime_type(stream, hint)?;
        let events = stream
            .source_mut()
            .start_encoding(&mime_type, hint.timeslice)
            .await?;

        info!(
            "Recording started on stream {} ({}, timeslice {}ms)",
            stream.id,
            mime_type,
            hint.timeslice.as_millis()
        );

        Ok(Self {
            mime_type,
            buffer: CaptureBuffer::new(),
            events,
            state: RecorderState::Recording,
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn chunk_count(&self) -> usize {
        self.buffer.chunk_count()
    }

    pub fn bytes_recorded(&self) -> usize {
        self.buffer.total_bytes()
    }

    /// Append a chunk delivered by the encoder. Zero-length chunks are discarded.
    pub fn on_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if self.state == RecorderState::Inactive {
            debug!("Chunk after recorder stopped ignored");
            return false;
        }
        self.buffer.append(chunk)
    }

    /// Wait for the next encoder event and apply it.
    ///
    /// Returns `Ok(true)` while the encoder is running and `Ok(false)` once it
    /// has stopped. A device-level failure is `CaptureInterrupted`.
    /// Cancel safe: the only suspension point is the channel receive.
    pub async fn pump(&mut self) -> SessionResult<bool> {
        if self.state == RecorderState::Inactive {
            return Ok(false);
        }

        match self.events.recv().await {
            Some(RecorderEvent::Chunk(chunk)) => {
                self.on_chunk(chunk);
                Ok(true)
            }
            Some(RecorderEvent::Stopped) => {
                self.state = RecorderState::Inactive;
                self.buffer.seal();
                Ok(false)
            }
            Some(RecorderEvent::Failed(reason)) => {
                self.state = RecorderState::Inactive;
                self.buffer.seal();
                Err(SessionError::CaptureInterrupted(reason))
            }
            None => {
                warn!("Encoder channel closed without a stop event");
                self.state = RecorderState::Inactive;
                self.buffer.seal();
                Ok(false)
            }
        }
    }

    /// Ask the encoder to flush and stop. Returns immediately.
    pub fn request_stop(&mut self, stream: &mut LiveStream) {
        if self.state == RecorderState::Recording {
            self.state = RecorderState::Stopping;
            stream.source_mut().request_stop();
            debug!("Recorder stop requested on stream {}", stream.id);
        }
    }

    /// Drain the encoder until it stops, then seal the buffer into an artifact
    pub async fn finish(mut self) -> SessionResult<RecordingArtifact> {
        while self.pump().await? {}

        let artifact = self.buffer.into_artifact(&self.mime_type)?;
        info!(
            "Recording finalized: {} bytes in {} chunks ({})",
            artifact.len(),
            artifact.chunk_count,
            artifact.mime_type
        );
        Ok(artifact)
    }

    /// Request stop and wait for the artifact
    pub async fn stop(mut self, stream: &mut LiveStream) -> SessionResult<RecordingArtifact> {
        self.request_stop(stream);
        self.finish().await
    }
}

/// First requested mime type the stream supports, else the platform default if accepted
fn negotiate_mime_type(stream: &LiveStream, hint: &EncodingHint) -> SessionResult<String> {
    let source = stream.source();
    let requested = std::iter::once(&hint.preferred).chain(hint.fallbacks.iter());

    for mime_type in requested {
        if source.supports_mime_type(mime_type) {
            return Ok(mime_type.clone());
        }
        debug!("Encoder does not support {}", mime_type);
    }

    if hint.accept_platform_default {
        let default = source.default_mime_type().to_string();
        warn!(
            "None of the requested encodings available, using platform default {}",
            default
        );
        return Ok(default);
    }

    Err(SessionError::UnsupportedEncoding(format!(
        "{} (fallbacks: {})",
        hint.preferred,
        hint.fallbacks.join(", ")
    )))
}
