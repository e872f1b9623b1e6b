use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::handle::{SessionCommand, SessionHandle};
use super::state::{ArtifactSummary, SessionSnapshot, SessionState, StopTrigger};
use crate::capture::{CaptureDevice, DeviceLock, LiveStream};
use crate::error::{SessionError, SessionResult};
use crate::media::{MediaSourceHandle, ReferenceAsset};
use crate::recording::{RecordingArtifact, RecordingSession};
use crate::scoring::{validate_score, ScoringClient, UploadChannel};

/// What woke the recording loop
enum Wake {
    Stop(StopTrigger),
    Pumped(SessionResult<bool>),
    Command(SessionCommand),
}

/// Binds a live recording to the playback of a reference asset
///
/// One orchestrator drives one session through
/// `Idle -> Primed -> DeviceAcquiring -> Recording -> Finalizing -> AwaitingScore -> Scored`,
/// with `Errored` reachable from every non-terminal state. Any error releases
/// the live stream exactly once; a session in `Errored` is never resumed.
///
/// While an operation is suspended (priming, acquisition, recording,
/// finalization, scoring) commands arriving through a `SessionHandle` are
/// answered with a `UserError` instead of being queued.
pub struct SyncOrchestrator {
    config: SessionConfig,
    device: Box<dyn CaptureDevice>,
    device_lock: DeviceLock,
    device_claimed: bool,
    scorer: Option<Arc<dyn ScoringClient>>,
    uploader: Option<Arc<dyn UploadChannel>>,
    media: Option<Box<dyn MediaSourceHandle>>,
    reference: Option<ReferenceAsset>,
    stream: Option<LiveStream>,
    artifact: Option<RecordingArtifact>,
    snapshot: SessionSnapshot,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    commands: mpsc::Receiver<SessionCommand>,
}

impl SyncOrchestrator {
    /// Create an idle session and the handle that talks to it
    pub fn new(config: SessionConfig, device: Box<dyn CaptureDevice>) -> (Self, SessionHandle) {
        let snapshot = SessionSnapshot::new(config.session_id, false);
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot.clone());
        let (command_tx, commands) = mpsc::channel(16);
        let handle = SessionHandle::new(config.session_id, command_tx, snapshot_rx);

        info!("Created capture session {} ({})", config.session_id, device.name());

        let orchestrator = Self {
            config,
            device,
            device_lock: DeviceLock::new(),
            device_claimed: false,
            scorer: None,
            uploader: None,
            media: None,
            reference: None,
            stream: None,
            artifact: None,
            snapshot,
            snapshot_tx,
            commands,
        };

        (orchestrator, handle)
    }

    /// Share the device with other sessions of the same user context
    pub fn with_device_lock(mut self, lock: DeviceLock) -> Self {
        self.device_lock = lock;
        self
    }

    /// Score automatically once the recording is finalized (actor mode)
    pub fn with_scorer(mut self, scorer: Arc<dyn ScoringClient>) -> Self {
        self.scorer = Some(scorer);
        self.snapshot.scoring_enabled = true;
        self.publish();
        self
    }

    /// Ship reference and recording through this channel before scoring
    pub fn with_uploader(mut self, uploader: Arc<dyn UploadChannel>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn id(&self) -> Uuid {
        self.config.session_id
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn reference(&self) -> Option<&ReferenceAsset> {
        self.reference.as_ref()
    }

    /// The finished recording; kept after a scoring failure so callers can retry
    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }

    /// Bind the reference asset and resolve its duration (Idle -> Primed)
    pub async fn select_reference(
        &mut self,
        mut media: Box<dyn MediaSourceHandle>,
    ) -> SessionResult<ReferenceAsset> {
        if self.snapshot.state != SessionState::Idle {
            return Err(SessionError::User(format!(
                "Reference already selected ({})",
                self.snapshot.state
            )));
        }

        info!("Priming reference asset: {}", media.identity());

        let primed = await_answering(
            &mut self.commands,
            self.snapshot.state,
            None,
            media.prime_duration(),
        )
        .await;

        let asset = primed.and_then(|duration| {
            ReferenceAsset::new(
                media.identity(),
                media.path().map(Path::to_path_buf),
                duration,
            )
        });

        match asset {
            Ok(asset) => {
                self.media = Some(media);
                self.reference = Some(asset.clone());
                self.snapshot.reference = Some(asset.clone());
                self.transition(SessionState::Primed);
                Ok(asset)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run capture from the user's start action through `AwaitingScore`
    pub async fn start(&mut self) -> SessionResult<()> {
        self.begin()?;
        self.capture().await
    }

    /// Accept the start action (Primed -> DeviceAcquiring).
    ///
    /// Refusals are `UserError`s and leave the state untouched.
    pub fn begin(&mut self) -> SessionResult<()> {
        match self.snapshot.state {
            SessionState::Primed => {}
            SessionState::Idle => {
                return Err(SessionError::User("No reference selected".to_string()));
            }
            other => {
                return Err(SessionError::User(format!("Session already started ({})", other)));
            }
        }

        if let Err(holder) = self.device_lock.try_claim(self.config.session_id) {
            return Err(SessionError::User(format!(
                "Capture device is in use by session {}",
                holder
            )));
        }
        self.device_claimed = true;

        self.transition(SessionState::DeviceAcquiring);
        Ok(())
    }

    /// Acquire the device, record for the reference duration and finalize
    pub async fn capture(&mut self) -> SessionResult<()> {
        if self.snapshot.state != SessionState::DeviceAcquiring {
            return Err(SessionError::User(format!(
                "Capture not accepted ({})",
                self.snapshot.state
            )));
        }

        let Some(mut media) = self.media.take() else {
            return Err(self.fail(SessionError::Playback("No reference bound".to_string())));
        };

        let result = self.run_capture(media.as_mut()).await;
        self.media = Some(media);
        result
    }

    async fn run_capture(&mut self, media: &mut dyn MediaSourceHandle) -> SessionResult<()> {
        let duration = match &self.reference {
            Some(reference) => reference.duration(),
            None => return Err(self.fail(SessionError::Playback("No reference primed".to_string()))),
        };

        info!("Acquiring capture device: {}", self.device.name());
        let acquired = await_answering(
            &mut self.commands,
            self.snapshot.state,
            None,
            self.device.acquire(&self.config.constraints),
        )
        .await;

        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e)),
        };
        info!(
            "Live stream {} acquired ({} tracks)",
            stream.id,
            stream.tracks.len()
        );

        // Arm the recorder before playback so no initial frames are lost
        let stream = self.stream.insert(stream);
        let started = await_answering(
            &mut self.commands,
            self.snapshot.state,
            None,
            RecordingSession::start(stream, &self.config.encoding),
        )
        .await;

        let mut recorder = match started {
            Ok(recorder) => recorder,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::Recording);
        let recording_started = Instant::now();

        let ended = match media.play().await {
            Ok(ended) => ended,
            Err(e) => return Err(self.fail(e)),
        };

        // Timer baseline is the moment recording started
        let timer = tokio::time::sleep_until(recording_started + duration);
        tokio::pin!(timer);
        self.snapshot.timer_armed = true;
        self.publish();
        info!(
            "Auto-stop armed for {:.3}s (mime {})",
            duration.as_secs_f64(),
            recorder.mime_type()
        );

        let watch_ended = self.config.stop_on_media_end;
        let ended = async move {
            // A dropped sender means playback was restarted or paused, not ended
            if ended.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(ended);

        let trigger = loop {
            let wake = tokio::select! {
                _ = &mut timer => Wake::Stop(StopTrigger::Timer),
                _ = &mut ended, if watch_ended => Wake::Stop(StopTrigger::MediaEnded),
                pumped = recorder.pump() => Wake::Pumped(pumped),
                Some(command) = self.commands.recv() => Wake::Command(command),
            };

            match wake {
                Wake::Stop(trigger) => break trigger,
                Wake::Pumped(Ok(true)) => {
                    self.snapshot.chunks_received = recorder.chunk_count();
                    self.snapshot.bytes_received = recorder.bytes_recorded();
                    self.publish();
                }
                Wake::Pumped(Ok(false)) => {
                    media.pause();
                    return Err(self.fail(SessionError::CaptureInterrupted(
                        "Recorder stopped before the reference ended".to_string(),
                    )));
                }
                Wake::Pumped(Err(e)) => {
                    media.pause();
                    return Err(self.fail(e));
                }
                Wake::Command(command) => command.refuse(self.snapshot.state, None),
            }
        };

        // Coordinated stop: recorder stop and reference pause in the same tick
        let elapsed = recording_started.elapsed();
        if let Some(stream) = self.stream.as_mut() {
            recorder.request_stop(stream);
        }
        media.pause();

        info!(
            "Stop triggered by {:?} after {:.3}s",
            trigger,
            elapsed.as_secs_f64()
        );
        self.snapshot.stop_trigger = Some(trigger);
        self.snapshot.recorded_ms = Some(elapsed.as_millis() as u64);
        self.transition(SessionState::Finalizing);

        let finished = await_answering(
            &mut self.commands,
            self.snapshot.state,
            None,
            recorder.finish(),
        )
        .await;

        // Released whether or not finalization succeeded
        self.release_stream();

        match finished {
            Ok(artifact) => {
                self.snapshot.chunks_received = artifact.chunk_count;
                self.snapshot.bytes_received = artifact.len();
                self.snapshot.artifact = Some(ArtifactSummary::from(&artifact));
                self.artifact = Some(artifact);
                self.transition(SessionState::AwaitingScore);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Hand the recording to the scoring client (AwaitingScore -> Scored)
    pub async fn score(&mut self) -> SessionResult<f64> {
        if self.snapshot.state != SessionState::AwaitingScore {
            return Err(SessionError::User(format!(
                "Nothing to score ({})",
                self.snapshot.state
            )));
        }

        let Some(scorer) = self.scorer.clone() else {
            return Err(SessionError::User("No scoring client configured".to_string()));
        };

        let (reference, artifact) = match (&self.reference, &self.artifact) {
            (Some(reference), Some(artifact)) => (reference.clone(), artifact.clone()),
            _ => {
                return Err(self.fail(SessionError::Scoring(
                    "Reference or recording missing".to_string(),
                )))
            }
        };

        if let Some(uploader) = self.uploader.clone() {
            info!("Uploading reference and recording");
            let uploads = async {
                futures::try_join!(
                    uploader.upload_reference(&reference),
                    uploader.upload_recording(&artifact)
                )
                .map(|_| ())
            };

            let uploaded = await_answering(
                &mut self.commands,
                self.snapshot.state,
                self.artifact.as_ref(),
                uploads,
            )
            .await;

            if let Err(e) = uploaded {
                return Err(self.fail(e));
            }
        }

        let scoring = async {
            scorer
                .score(&reference, &artifact)
                .await
                .and_then(validate_score)
        };

        let scored = await_answering(
            &mut self.commands,
            self.snapshot.state,
            self.artifact.as_ref(),
            scoring,
        )
        .await;

        match scored {
            Ok(score) => {
                self.snapshot.score = Some(score);
                self.transition(SessionState::Scored);
                info!("Session {} scored {:.2}", self.config.session_id, score);
                Ok(score)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Serve commands from the session handles until all of them are dropped
    pub async fn run(mut self) {
        debug!("Session {} waiting for commands", self.config.session_id);

        while let Some(command) = self.commands.recv().await {
            match command {
                SessionCommand::SelectReference { media, reply } => {
                    let result = self.select_reference(media).await;
                    let _ = reply.send(result);
                }
                SessionCommand::Start { reply } => {
                    if let Err(e) = self.begin() {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    let _ = reply.send(Ok(()));

                    if self.capture().await.is_ok() && self.scorer.is_some() {
                        let _ = self.score().await;
                    }
                }
                SessionCommand::Artifact { reply } => {
                    let _ = reply.send(self.artifact.clone());
                }
            }
        }

        debug!("Session {} closed", self.config.session_id);
    }

    /// Run the session on the tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn transition(&mut self, next: SessionState) {
        info!(
            "Session {}: {} -> {}",
            self.config.session_id, self.snapshot.state, next
        );
        self.snapshot.state = next;
        self.snapshot.history.push(next);
        self.publish();
    }

    fn publish(&mut self) {
        self.snapshot.updated_at = Utc::now();
        self.snapshot_tx.send_replace(self.snapshot.clone());
    }

    /// Stop the live stream (at most once) and give the device back
    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Releasing live stream {}", stream.id);
            self.device.release(&mut stream);
        }

        if self.device_claimed {
            self.device_lock.release(self.config.session_id);
            self.device_claimed = false;
        }
    }

    /// Release everything and move to `Errored`
    fn fail(&mut self, err: SessionError) -> SessionError {
        self.release_stream();

        if self.snapshot.state.is_terminal() {
            warn!("Error after terminal state ignored: {}", err);
            return err;
        }

        error!(
            "Session {} failed in {}: {}",
            self.config.session_id, self.snapshot.state, err
        );
        self.snapshot.error_kind = Some(err.kind());
        self.snapshot.error = Some(err.clone());
        self.transition(SessionState::Errored);
        err
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        if self.stream.is_some() {
            warn!("Session {} dropped with a live stream", self.config.session_id);
        }
        self.release_stream();
    }
}

/// Await `work`, refusing any command that arrives in the meantime
async fn await_answering<F: Future>(
    commands: &mut mpsc::Receiver<SessionCommand>,
    state: SessionState,
    artifact: Option<&RecordingArtifact>,
    work: F,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return output,
            Some(command) = commands.recv() => command.refuse(state, artifact),
        }
    }
}
