use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::device::{CaptureConstraints, CaptureDevice};
use super::stream::{base_mime_type, LiveStream, MediaTrack, RecorderEvent, StreamSource, TrackKind};
use crate::error::{SessionError, SessionResult};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Replays a pre-recorded file as if it were a live camera
///
/// One chunk of the file is emitted per timeslice. Once the file is
/// exhausted the stream idles until stopped; a stop request flushes whatever
/// has not been emitted yet.
pub struct ReplayCaptureDevice {
    path: PathBuf,
    chunk_size: usize,
}

impl ReplayCaptureDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ReplayCaptureDevice {
    async fn acquire(&mut self, _constraints: &CaptureConstraints) -> SessionResult<LiveStream> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            SessionError::DeviceAcquisition(format!("Cannot open {}: {}", self.path.display(), e))
        })?;

        if data.is_empty() {
            return Err(SessionError::DeviceAcquisition(format!(
                "Replay file is empty: {}",
                self.path.display()
            )));
        }

        let mime_type = mime_type_for_path(&self.path);
        info!(
            "Replay stream acquired: {} ({} bytes, {})",
            self.path.display(),
            data.len(),
            mime_type
        );

        let source = ReplayStream {
            data: Arc::new(data),
            mime_type,
            chunk_size: self.chunk_size,
            stop_tx: None,
            task: None,
        };

        Ok(LiveStream::new(
            vec![MediaTrack::new(TrackKind::Video, self.path.display().to_string())],
            Box::new(source),
        ))
    }

    fn name(&self) -> &str {
        "replay"
    }
}

struct ReplayStream {
    data: Arc<Vec<u8>>,
    mime_type: String,
    chunk_size: usize,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl StreamSource for ReplayStream {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        base_mime_type(mime_type) == base_mime_type(&self.mime_type)
    }

    fn default_mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn start_encoding(
        &mut self,
        mime_type: &str,
        timeslice: Duration,
    ) -> SessionResult<mpsc::Receiver<RecorderEvent>> {
        if !self.supports_mime_type(mime_type) {
            return Err(SessionError::UnsupportedEncoding(format!(
                "{} (replay file is {})",
                mime_type, self.mime_type
            )));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = oneshot::channel();

        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(replay(
            Arc::clone(&self.data),
            self.chunk_size,
            timeslice,
            event_tx,
            stop_rx,
        )));

        Ok(event_rx)
    }

    fn request_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn stop_tracks(&mut self) {
        self.stop_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn replay(
    data: Arc<Vec<u8>>,
    chunk_size: usize,
    timeslice: Duration,
    events: mpsc::Sender<RecorderEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut offset = 0;
    let mut slicer = tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);

    loop {
        tokio::select! {
            _ = slicer.tick(), if offset < data.len() => {
                let end = (offset + chunk_size).min(data.len());
                if events.send(RecorderEvent::Chunk(data[offset..end].to_vec())).await.is_err() {
                    return;
                }
                offset = end;
            }
            _ = &mut stop_rx => break,
        }
    }

    if offset < data.len() {
        let _ = events.send(RecorderEvent::Chunk(data[offset..].to_vec())).await;
    }

    debug!("Replay stopped after {} bytes", data.len());
    let _ = events.send(RecorderEvent::Stopped).await;
}

/// Container mime type from a file extension
pub fn mime_type_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "webm" => "video/webm",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
    .to_string()
}
