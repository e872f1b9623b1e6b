use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::state::{SessionSnapshot, SessionState};
use crate::error::{SessionError, SessionResult};
use crate::media::{MediaSourceHandle, ReferenceAsset};
use crate::recording::RecordingArtifact;

/// Messages accepted by a running session
pub enum SessionCommand {
    SelectReference {
        media: Box<dyn MediaSourceHandle>,
        reply: oneshot::Sender<SessionResult<ReferenceAsset>>,
    },
    Start {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Artifact {
        reply: oneshot::Sender<Option<RecordingArtifact>>,
    },
}

impl SessionCommand {
    /// Answer a command the session cannot act on right now
    pub(crate) fn refuse(self, state: SessionState, artifact: Option<&RecordingArtifact>) {
        let busy = || SessionError::User(format!("Session is busy ({})", state));
        match self {
            SessionCommand::SelectReference { reply, .. } => {
                let _ = reply.send(Err(busy()));
            }
            SessionCommand::Start { reply } => {
                let _ = reply.send(Err(busy()));
            }
            SessionCommand::Artifact { reply } => {
                let _ = reply.send(artifact.cloned());
            }
        }
    }
}

/// Cloneable front end to a session: sends commands, observes snapshots
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: Uuid,
        commands: mpsc::Sender<SessionCommand>,
        snapshots: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            session_id,
            commands,
            snapshots,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshots.borrow().state
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Bind and prime the reference asset (Idle -> Primed)
    pub async fn select_reference(
        &self,
        media: Box<dyn MediaSourceHandle>,
    ) -> SessionResult<ReferenceAsset> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::SelectReference { media, reply }).await?;
        rx.await.map_err(|_| closed())?
    }

    /// Request the start of capture. Resolves once the request is accepted
    /// (device acquisition underway) or refused with a `UserError`.
    pub async fn start(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Start { reply }).await?;
        rx.await.map_err(|_| closed())?
    }

    /// The finished recording, once available
    pub async fn artifact(&self) -> Option<RecordingArtifact> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Artifact { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Wait until the session stops making progress on its own
    pub async fn wait_until_settled(&self) -> SessionSnapshot {
        let mut snapshots = self.snapshots.clone();
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if snapshot.is_settled() {
                    return snapshot.clone();
                }
            }
            if snapshots.changed().await.is_err() {
                return snapshots.borrow().clone();
            }
        }
    }

    async fn send(&self, command: SessionCommand) -> SessionResult<()> {
        self.commands.send(command).await.map_err(|_| closed())
    }
}

fn closed() -> SessionError {
    SessionError::User("Session is no longer running".to_string())
}
