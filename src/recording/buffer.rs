use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::capture::stream::base_mime_type;
use crate::error::{SessionError, SessionResult};

/// Ordered, append-only sequence of encoded chunks
///
/// Zero-length chunks are dropped. Once sealed the buffer refuses further
/// appends.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
    sealed: bool,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk in arrival order. Returns whether it was kept.
    pub fn append(&mut self, chunk: Vec<u8>) -> bool {
        if self.sealed {
            debug!("Late chunk ({} bytes) ignored: buffer sealed", chunk.len());
            return false;
        }
        if chunk.is_empty() {
            return false;
        }

        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    /// Freeze the buffer; later appends are ignored
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenate the chunks in arrival order into the finished artifact
    pub fn into_artifact(mut self, mime_type: &str) -> SessionResult<RecordingArtifact> {
        self.seal();
        if self.chunks.is_empty() {
            return Err(SessionError::EmptyRecording);
        }

        let chunk_count = self.chunks.len();
        let mut data = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            data.extend_from_slice(&chunk);
        }

        Ok(RecordingArtifact {
            data: Arc::new(data),
            mime_type: mime_type.to_string(),
            chunk_count,
            created_at: Utc::now(),
        })
    }
}

/// Finished recording, immutable once created
#[derive(Debug, Clone, Serialize)]
pub struct RecordingArtifact {
    #[serde(skip)]
    data: Arc<Vec<u8>>,
    pub mime_type: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

impl RecordingArtifact {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension matching the container ("webm", "mp4", ...)
    pub fn file_extension(&self) -> &'static str {
        match base_mime_type(&self.mime_type).as_str() {
            "video/webm" | "audio/webm" => "webm",
            "video/mp4" | "audio/mp4" => "mp4",
            "video/x-matroska" => "mkv",
            "video/quicktime" => "mov",
            _ => "bin",
        }
    }
}
