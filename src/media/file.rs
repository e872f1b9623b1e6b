use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::handle::{validate_duration, MediaSourceHandle, PlaybackEnded};
use crate::error::{SessionError, SessionResult};

const DEFAULT_FFPROBE: &str = "ffprobe";
const FFPROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reference asset backed by a local file
///
/// Duration is unknown (NaN) until `prime_duration` probes the container.
/// Containers symphonia cannot read (most video-only files) are measured
/// with ffprobe instead. Playback is clock-driven: the ended signal fires once the remaining
/// duration has elapsed without a pause.
pub struct FileMediaSource {
    path: PathBuf,
    identity: String,
    duration_seconds: f64,
    ffprobe_path: Option<String>,
    position: Duration,
    playing_since: Option<Instant>,
    playback_task: Option<JoinHandle<()>>,
}

impl FileMediaSource {
    /// Bind a local file as a playable source. Does not read the duration.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SessionError::Playback(format!(
                "Reference file not found: {}",
                path.display()
            )));
        }

        info!("Loaded reference asset: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            identity: path.display().to_string(),
            duration_seconds: f64::NAN,
            ffprobe_path: Some(DEFAULT_FFPROBE.to_string()),
            position: Duration::ZERO,
            playing_since: None,
            playback_task: None,
        })
    }

    /// ffprobe binary used when the container is not one symphonia reads
    pub fn with_ffprobe(mut self, ffprobe_path: impl Into<String>) -> Self {
        self.ffprobe_path = Some(ffprobe_path.into());
        self
    }

    /// Duration resolved by the last priming, NaN before that
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Playback position, advancing while playing
    pub fn position(&self) -> Duration {
        let total = self.total();
        match self.playing_since {
            Some(since) => (self.position + since.elapsed()).min(total),
            None => self.position,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing_since.is_some() && self.position() < self.total()
    }

    fn total(&self) -> Duration {
        if self.duration_seconds.is_finite() && self.duration_seconds > 0.0 {
            Duration::from_secs_f64(self.duration_seconds)
        } else {
            Duration::ZERO
        }
    }

    fn cancel_playback_task(&mut self) {
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
    }
}

#[async_trait::async_trait]
impl MediaSourceHandle for FileMediaSource {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn prime_duration(&mut self) -> SessionResult<f64> {
        let path = self.path.clone();
        let mut probed = tokio::task::spawn_blocking(move || probe_duration(&path))
            .await
            .unwrap_or_else(|e| {
                warn!("Duration probe task failed: {}", e);
                f64::NAN
            });

        if validate_duration(probed).is_err() {
            if let Some(ffprobe) = &self.ffprobe_path {
                debug!("Falling back to {} for {}", ffprobe, self.identity);
                probed = ffprobe_duration(ffprobe, &self.path).await;
            }
        }

        self.duration_seconds = probed;
        let duration = validate_duration(probed)?;

        info!("Reference duration resolved: {:.3}s ({})", duration, self.identity);
        Ok(duration)
    }

    async fn play(&mut self) -> SessionResult<PlaybackEnded> {
        let total = self.total();
        if total.is_zero() {
            return Err(SessionError::Playback(format!(
                "Cannot play unprimed asset: {}",
                self.identity
            )));
        }

        let mut position = self.position();
        if position >= total {
            debug!("Asset already ended, restarting from zero");
            position = Duration::ZERO;
        }

        self.cancel_playback_task();
        self.position = position;
        self.playing_since = Some(Instant::now());

        let remaining = total - position;
        let (ended_tx, ended_rx) = oneshot::channel();
        self.playback_task = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = ended_tx.send(());
        }));

        debug!(
            "Playing {} from {:.3}s ({:.3}s remaining)",
            self.identity,
            position.as_secs_f64(),
            remaining.as_secs_f64()
        );

        Ok(ended_rx)
    }

    fn pause(&mut self) {
        self.position = self.position();
        self.playing_since = None;
        self.cancel_playback_task();
        debug!("Paused {} at {:.3}s", self.identity, self.position.as_secs_f64());
    }
}

impl Drop for FileMediaSource {
    fn drop(&mut self) {
        self.cancel_playback_task();
    }
}

/// Probe a media container for the duration of its primary track.
///
/// Returns NaN when the container cannot be read or carries no timing.
fn probe_duration(path: &Path) -> f64 {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            return f64::NAN;
        }
    };

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            warn!("Failed to probe {}: {}", path.display(), e);
            return f64::NAN;
        }
    };

    let format = probed.format;
    let track = match format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        Some(track) => track,
        None => return f64::NAN,
    };

    let params = &track.codec_params;
    match (params.n_frames, params.time_base, params.sample_rate) {
        (Some(frames), Some(time_base), _) => {
            let time = time_base.calc_time(frames);
            time.seconds as f64 + time.frac
        }
        (Some(frames), None, Some(rate)) if rate > 0 => frames as f64 / rate as f64,
        _ => f64::NAN,
    }
}

/// Ask ffprobe for the container duration. NaN when it cannot tell.
async fn ffprobe_duration(ffprobe: &str, path: &Path) -> f64 {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(FFPROBE_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Failed to run {}: {}", ffprobe, e);
            return f64::NAN;
        }
        Err(_) => {
            warn!("{} timed out on {}", ffprobe, path.display());
            return f64::NAN;
        }
    };

    if !output.status.success() {
        warn!(
            "{} could not read {}: {}",
            ffprobe,
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return f64::NAN;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.trim().parse().unwrap_or(f64::NAN)
}
