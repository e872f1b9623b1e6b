use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ffmpeg::{FfmpegCaptureConfig, FfmpegCaptureDevice};
use super::replay::ReplayCaptureDevice;
use super::stream::LiveStream;
use crate::config::{CaptureConfig, CaptureSourceKind};
use crate::error::SessionResult;

/// Resolution and track constraints for camera acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Ideal frame width in pixels
    pub width: u32,
    /// Ideal frame height in pixels
    pub height: u32,
    /// Requested frame rate, device default if unset
    pub frame_rate: Option<u32>,
    /// Capture a microphone track alongside the camera
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: None,
            audio: true,
        }
    }
}

/// Camera + microphone acquisition
///
/// Implementations:
/// - `FfmpegCaptureDevice`: V4L2/AVFoundation/DirectShow camera through an ffmpeg child process
/// - `ReplayCaptureDevice`: replays a pre-recorded file (headless runs, testing)
#[async_trait::async_trait]
pub trait CaptureDevice: Send {
    /// Open the device. Either a fully usable stream or an error; never partial.
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> SessionResult<LiveStream>;

    /// Stop every track of the stream. Idempotent.
    fn release(&mut self, stream: &mut LiveStream) {
        stream.stop_all_tracks();
    }

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Capture device factory
pub struct CaptureDeviceFactory;

impl CaptureDeviceFactory {
    /// Create the capture device selected by configuration
    pub fn create(config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
        match config.source {
            CaptureSourceKind::Camera => {
                let device = FfmpegCaptureDevice::new(FfmpegCaptureConfig {
                    ffmpeg_path: config.ffmpeg_path.clone(),
                    input_format: config.input_format.clone(),
                    video_device: config.video_device.clone(),
                    audio_format: config.audio_format.clone(),
                    audio_device: config.audio_device.clone(),
                });
                info!("Using camera capture device: {}", config.video_device);
                Ok(Box::new(device))
            }

            CaptureSourceKind::Replay => {
                let path = config
                    .replay_path
                    .as_ref()
                    .context("capture.replay_path is required for replay capture")?;
                info!("Using replay capture device: {}", path);
                Ok(Box::new(ReplayCaptureDevice::new(path)))
            }
        }
    }
}
