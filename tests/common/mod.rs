// Scripted devices, references and scorers shared by the integration tests
#![allow(dead_code)]

use dance_sync::capture::{
    CaptureConstraints, CaptureDevice, LiveStream, MediaTrack, RecorderEvent, StreamSource,
    TrackKind,
};
use dance_sync::media::{MediaSourceHandle, PlaybackEnded};
use dance_sync::recording::RecordingArtifact;
use dance_sync::scoring::{ScoringClient, UploadChannel};
use dance_sync::{ReferenceAsset, SessionError, SessionResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Capture device
// ============================================================================

#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub acquire_calls: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub tracks_stopped: AtomicUsize,
}

impl DeviceCounters {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn tracks_stopped(&self) -> usize {
        self.tracks_stopped.load(Ordering::SeqCst)
    }
}

/// What the scripted encoder does once started
#[derive(Debug, Clone)]
pub struct EncoderScript {
    /// Total chunks in the recording; whatever is left is flushed on stop
    pub chunks: usize,
    pub chunk_size: usize,
    /// Report a device failure after this many chunks
    pub fail_after: Option<usize>,
    pub supported: Vec<String>,
    pub default_mime_type: String,
}

impl Default for EncoderScript {
    fn default() -> Self {
        Self {
            chunks: 20,
            chunk_size: 1024,
            fail_after: None,
            supported: vec!["video/webm;codecs=vp9".to_string(), "video/webm".to_string()],
            default_mime_type: "video/webm".to_string(),
        }
    }
}

/// Camera double with counters for acquisition and release
pub struct ScriptedDevice {
    pub counters: Arc<DeviceCounters>,
    script: EncoderScript,
    acquire_delay: Duration,
    deny: Option<String>,
}

impl ScriptedDevice {
    pub fn new(script: EncoderScript) -> Self {
        Self {
            counters: Arc::new(DeviceCounters::default()),
            script,
            acquire_delay: Duration::ZERO,
            deny: None,
        }
    }

    /// Acquisition fails with a permission error
    pub fn denied(reason: &str) -> Self {
        let mut device = Self::new(EncoderScript::default());
        device.deny = Some(reason.to_string());
        device
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    pub fn counters(&self) -> Arc<DeviceCounters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait::async_trait]
impl CaptureDevice for ScriptedDevice {
    async fn acquire(&mut self, _constraints: &CaptureConstraints) -> SessionResult<LiveStream> {
        self.counters.acquire_calls.fetch_add(1, Ordering::SeqCst);

        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }

        if let Some(reason) = &self.deny {
            return Err(SessionError::DeviceAcquisition(reason.clone()));
        }

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let source = ScriptedStream {
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
            stop: None,
            task: None,
        };

        Ok(LiveStream::new(
            vec![
                MediaTrack::new(TrackKind::Video, "scripted-camera"),
                MediaTrack::new(TrackKind::Audio, "scripted-mic"),
            ],
            Box::new(source),
        ))
    }

    fn release(&mut self, stream: &mut LiveStream) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        stream.stop_all_tracks();
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedStream {
    script: EncoderScript,
    counters: Arc<DeviceCounters>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl StreamSource for ScriptedStream {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        self.script.supported.iter().any(|m| m == mime_type)
    }

    fn default_mime_type(&self) -> &str {
        &self.script.default_mime_type
    }

    async fn start_encoding(
        &mut self,
        _mime_type: &str,
        timeslice: Duration,
    ) -> SessionResult<mpsc::Receiver<RecorderEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let script = self.script.clone();

        self.stop = Some(stop_tx);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
            let mut sent = 0;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        while sent < script.chunks {
                            let _ = tx.send(RecorderEvent::Chunk(vec![0xAB; script.chunk_size])).await;
                            sent += 1;
                        }
                        let _ = tx.send(RecorderEvent::Stopped).await;
                        return;
                    }
                    _ = ticker.tick(), if sent < script.chunks => {
                        if script.fail_after == Some(sent) {
                            let _ = tx.send(RecorderEvent::Failed("camera unplugged".to_string())).await;
                            return;
                        }
                        let _ = tx.send(RecorderEvent::Chunk(vec![0xAB; script.chunk_size])).await;
                        sent += 1;
                    }
                }
            }
        }));

        Ok(rx)
    }

    fn request_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    fn stop_tracks(&mut self) {
        self.counters.tracks_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Reference media
// ============================================================================

#[derive(Debug, Default)]
pub struct MediaCounters {
    pub plays: AtomicUsize,
    pub pauses: AtomicUsize,
}

impl MediaCounters {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

/// Reference with a scripted duration and, optionally, an early natural end
pub struct ScriptedMedia {
    pub counters: Arc<MediaCounters>,
    duration: f64,
    ends_after: Option<Duration>,
    ended: Option<oneshot::Sender<()>>,
    timer: Option<JoinHandle<()>>,
}

impl ScriptedMedia {
    pub fn new(duration: f64) -> Self {
        Self {
            counters: Arc::new(MediaCounters::default()),
            duration,
            ends_after: None,
            ended: None,
            timer: None,
        }
    }

    /// Report the natural end after `after` of playback
    pub fn ending_after(mut self, after: Duration) -> Self {
        self.ends_after = Some(after);
        self
    }

    pub fn counters(&self) -> Arc<MediaCounters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait::async_trait]
impl MediaSourceHandle for ScriptedMedia {
    fn identity(&self) -> &str {
        "reference.mp4"
    }

    async fn prime_duration(&mut self) -> SessionResult<f64> {
        dance_sync::media::validate_duration(self.duration)
    }

    async fn play(&mut self) -> SessionResult<PlaybackEnded> {
        self.counters.plays.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        match self.ends_after {
            Some(after) => {
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(());
                }));
            }
            None => self.ended = Some(tx),
        }

        Ok(rx)
    }

    fn pause(&mut self) {
        self.counters.pauses.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.ended = None;
    }
}

// ============================================================================
// Scoring
// ============================================================================

pub struct ScriptedScorer {
    result: SessionResult<f64>,
    pub calls: AtomicUsize,
}

impl ScriptedScorer {
    pub fn returning(result: SessionResult<f64>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ScoringClient for ScriptedScorer {
    async fn score(
        &self,
        _reference: &ReferenceAsset,
        recording: &RecordingArtifact,
    ) -> SessionResult<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!recording.is_empty());
        self.result.clone()
    }
}

pub struct ScriptedUploader {
    fail: Option<String>,
    pub uploads: AtomicUsize,
}

impl ScriptedUploader {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            fail: None,
            uploads: AtomicUsize::new(0),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail: Some(reason.to_string()),
            uploads: AtomicUsize::new(0),
        })
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> SessionResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        match &self.fail {
            Some(reason) => Err(SessionError::Upload(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl UploadChannel for ScriptedUploader {
    async fn upload_reference(&self, _reference: &ReferenceAsset) -> SessionResult<()> {
        self.outcome()
    }

    async fn upload_recording(&self, _recording: &RecordingArtifact) -> SessionResult<()> {
        self.outcome()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write a silent mono WAV of the given length
pub fn write_wav(path: &std::path::Path, seconds: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(16000.0 * seconds) as usize {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}
