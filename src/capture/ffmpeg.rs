// Camera + microphone capture through an ffmpeg child process
//
// ffmpeg opens the camera, encodes to a streamable container and writes it
// to stdout. The output is sliced into chunks by wall-clock timeslice. A stop
// request sends "q" on stdin so ffmpeg finalizes the container; any exit
// before that is a device-level failure.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::device::{CaptureConstraints, CaptureDevice};
use super::stream::{LiveStream, MediaTrack, RecorderEvent, StreamSource, TrackKind};
use crate::error::{SessionError, SessionResult};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const STDERR_TAIL_CHARS: usize = 512;
const OPEN_TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Container/codec combinations the ffmpeg encoder can produce
const SUPPORTED_MIME_TYPES: &[&str] = &[
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    "video/mp4",
];

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct FfmpegCaptureConfig {
    /// ffmpeg binary (name on PATH or absolute path)
    pub ffmpeg_path: String,
    /// Camera input format ("v4l2", "avfoundation", "dshow")
    pub input_format: String,
    /// Camera device (e.g. "/dev/video0")
    pub video_device: String,
    /// Microphone input format ("alsa", "pulse", ...)
    pub audio_format: String,
    /// Microphone device; no audio track when unset
    pub audio_device: Option<String>,
}

impl Default for FfmpegCaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            input_format: "v4l2".to_string(),
            video_device: "/dev/video0".to_string(),
            audio_format: "alsa".to_string(),
            audio_device: None,
        }
    }
}

pub struct FfmpegCaptureDevice {
    config: FfmpegCaptureConfig,
}

impl FfmpegCaptureDevice {
    pub fn new(config: FfmpegCaptureConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FfmpegCaptureDevice {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> SessionResult<LiveStream> {
        info!(
            "Acquiring camera {} ({}x{}, audio={})",
            self.config.video_device, constraints.width, constraints.height, constraints.audio
        );

        if self.config.input_format == "v4l2" && !Path::new(&self.config.video_device).exists() {
            return Err(SessionError::DeviceAcquisition(format!(
                "No camera at {}",
                self.config.video_device
            )));
        }

        let with_audio = constraints.audio && self.config.audio_device.is_some();
        open_test(&self.config, constraints, with_audio).await?;

        let mut tracks = vec![MediaTrack::new(TrackKind::Video, &self.config.video_device)];
        if constraints.audio {
            match &self.config.audio_device {
                Some(mic) => tracks.push(MediaTrack::new(TrackKind::Audio, mic)),
                None => warn!("Audio requested but no microphone configured, capturing video only"),
            }
        }

        let source = FfmpegStream {
            config: self.config.clone(),
            constraints: constraints.clone(),
            with_audio,
            stop_tx: None,
            task: None,
        };

        Ok(LiveStream::new(tracks, Box::new(source)))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

struct FfmpegStream {
    config: FfmpegCaptureConfig,
    constraints: CaptureConstraints,
    with_audio: bool,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl StreamSource for FfmpegStream {
    fn supports_mime_type(&self, mime_type: &str) -> bool {
        codec_args(mime_type, self.with_audio).is_some()
    }

    fn default_mime_type(&self) -> &str {
        "video/webm"
    }

    async fn start_encoding(
        &mut self,
        mime_type: &str,
        timeslice: Duration,
    ) -> SessionResult<mpsc::Receiver<RecorderEvent>> {
        let args = build_args(&self.config, &self.constraints, self.with_audio, mime_type)
            .ok_or_else(|| SessionError::UnsupportedEncoding(mime_type.to_string()))?;

        debug!("Spawning ffmpeg with args: {:?}", args);

        let child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::DeviceAcquisition(format!("Failed to spawn ffmpeg: {}", e)))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = oneshot::channel();

        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(pump_output(child, event_tx, stop_rx, timeslice)));

        info!("ffmpeg encoder started ({})", mime_type);
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
            if !task.is_finished() {
                // Dropping the child kills ffmpeg
                task.abort();
                warn!("ffmpeg encoder killed while tracks were stopped");
            }
        }
    }
}

/// Read ffmpeg's stdout, slice it into chunks and report how it ended
async fn pump_output(
    mut child: Child,
    events: mpsc::Sender<RecorderEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    timeslice: Duration,
) {
    let Some(mut stdout) = child.stdout.take() else {
        let _ = events
            .send(RecorderEvent::Failed("ffmpeg stdout unavailable".to_string()))
            .await;
        return;
    };
    let mut stdin = child.stdin.take();
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut slicer = tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) => {
                    error!("Failed to read ffmpeg output: {}", e);
                    let _ = events.send(RecorderEvent::Failed(format!("read error: {}", e))).await;
                    return;
                }
            },
            _ = slicer.tick() => {
                if !pending.is_empty() {
                    let chunk = std::mem::take(&mut pending);
                    if events.send(RecorderEvent::Chunk(chunk)).await.is_err() {
                        debug!("Recorder gone, stopping ffmpeg pump");
                        return;
                    }
                }
            },
            _ = &mut stop_rx, if !stop_requested => {
                stop_requested = true;
                if let Some(mut stdin) = stdin.take() {
                    if let Err(e) = stdin.write_all(b"q").await {
                        warn!("Failed to send quit to ffmpeg: {}", e);
                    }
                }
            },
        }
    }

    if !pending.is_empty() {
        let _ = events.send(RecorderEvent::Chunk(pending)).await;
    }

    let status = child.wait().await;
    let tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if stop_requested {
        debug!("ffmpeg exited after stop request: {:?}", status);
        let _ = events.send(RecorderEvent::Stopped).await;
    } else {
        let reason = match status {
            Ok(status) => format!("ffmpeg exited unexpectedly ({}): {}", status, tail.trim()),
            Err(e) => format!("ffmpeg wait failed: {}", e),
        };
        error!("{}", reason);
        let _ = events.send(RecorderEvent::Failed(reason)).await;
    }
}

/// Open the camera (and microphone) for a single frame, so permission and
/// busy-device failures surface before recording starts
async fn open_test(
    config: &FfmpegCaptureConfig,
    constraints: &CaptureConstraints,
    with_audio: bool,
) -> SessionResult<()> {
    let args = open_test_args(config, constraints, with_audio);
    debug!("Camera open test: {} {:?}", config.ffmpeg_path, args);

    let child = Command::new(&config.ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            SessionError::DeviceAcquisition(format!(
                "ffmpeg not available at {}: {}",
                config.ffmpeg_path, e
            ))
        })?;

    let output = tokio::time::timeout(OPEN_TEST_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            SessionError::DeviceAcquisition(format!(
                "Camera {} did not open within {}s",
                config.video_device,
                OPEN_TEST_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| SessionError::DeviceAcquisition(format!("ffmpeg open test failed: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let skip = stderr.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    let tail: String = stderr.chars().skip(skip).collect();
    Err(SessionError::DeviceAcquisition(format!(
        "Cannot open camera {} ({}): {}",
        config.video_device,
        output.status,
        tail.trim()
    )))
}

/// Input arguments shared by the open test and the capture process
fn input_args(
    config: &FfmpegCaptureConfig,
    constraints: &CaptureConstraints,
    with_audio: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        config.input_format.clone(),
        "-video_size".into(),
        format!("{}x{}", constraints.width, constraints.height),
    ];

    if let Some(fps) = constraints.frame_rate {
        args.extend(["-framerate".into(), fps.to_string()]);
    }
    args.extend(["-i".into(), config.video_device.clone()]);

    if with_audio {
        if let Some(mic) = &config.audio_device {
            args.extend([
                "-f".into(),
                config.audio_format.clone(),
                "-i".into(),
                mic.clone(),
            ]);
        }
    }

    args
}

fn open_test_args(
    config: &FfmpegCaptureConfig,
    constraints: &CaptureConstraints,
    with_audio: bool,
) -> Vec<String> {
    let mut args = input_args(config, constraints, with_audio);
    args.extend(["-frames:v", "1", "-f", "null", "-"].map(String::from));
    args
}

/// Collect the last few hundred characters of a stream
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut output = String::new();
    let _ = reader.read_to_string(&mut output).await;
    let skip = output.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    output.chars().skip(skip).collect()
}

/// Encoder arguments for a mime type, `None` when unsupported
fn codec_args(mime_type: &str, with_audio: bool) -> Option<Vec<&'static str>> {
    let normalized: String = mime_type
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    if !SUPPORTED_MIME_TYPES.contains(&normalized.as_str()) {
        return None;
    }

    let mut args = match normalized.as_str() {
        "video/webm;codecs=vp9" => vec!["-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8"],
        "video/mp4" => vec!["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"],
        _ => vec!["-c:v", "libvpx", "-deadline", "realtime"],
    };

    let webm = normalized.starts_with("video/webm");
    if with_audio {
        args.extend(if webm { ["-c:a", "libopus"] } else { ["-c:a", "aac"] });
    }

    if webm {
        args.extend(["-f", "webm"]);
    } else {
        args.extend(["-movflags", "frag_keyframe+empty_moov", "-f", "mp4"]);
    }

    Some(args)
}

/// Full ffmpeg command line for capturing to stdout
fn build_args(
    config: &FfmpegCaptureConfig,
    constraints: &CaptureConstraints,
    with_audio: bool,
    mime_type: &str,
) -> Option<Vec<String>> {
    let codec = codec_args(mime_type, with_audio)?;

    let mut args = input_args(config, constraints, with_audio);
    args.extend(codec.into_iter().map(String::from));
    args.push("pipe:1".into());

    Some(args)
}
