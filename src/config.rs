use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::capture::CaptureConstraints;
use crate::recording::EncodingHint;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    Camera,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSourceKind,
    pub ffmpeg_path: String,
    /// Measures references symphonia cannot read
    pub ffprobe_path: String,
    pub input_format: String,
    pub video_device: String,
    pub audio_format: String,
    pub audio_device: Option<String>,
    pub replay_path: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<u32>,
    pub audio: bool,
    pub mime_type: String,
    pub fallback_mime_types: Vec<String>,
    pub timeslice_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSourceKind::Camera,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            input_format: "v4l2".to_string(),
            video_device: "/dev/video0".to_string(),
            audio_format: "alsa".to_string(),
            audio_device: None,
            replay_path: None,
            width: 1280,
            height: 720,
            frame_rate: None,
            audio: true,
            mime_type: "video/webm;codecs=vp9".to_string(),
            fallback_mime_types: vec!["video/webm".to_string()],
            timeslice_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            audio: self.audio,
        }
    }

    pub fn encoding(&self) -> EncodingHint {
        EncodingHint {
            preferred: self.mime_type.clone(),
            fallbacks: self.fallback_mime_types.clone(),
            accept_platform_default: true,
            timeslice: Duration::from_millis(self.timeslice_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Scoring disabled when unset
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_url: Some("http://localhost:5000".to_string()),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Session state events are published here when set
    pub nats_url: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
