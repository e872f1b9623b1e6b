use anyhow::{Context, Result};
use async_nats::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::SessionStateMessage;
use crate::session::SessionSnapshot;

#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Subject carrying state changes of one session
    pub fn state_subject(session_id: &str) -> String {
        format!("dance.session.{}.state", session_id)
    }

    /// Publish a session snapshot to NATS
    pub async fn publish_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let message = SessionStateMessage::from(snapshot);
        let subject = Self::state_subject(&message.session_id);
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish session state")?;

        debug!(
            "Published session state to {} (state={}, chunks={})",
            subject, message.state, message.chunks_received
        );

        Ok(())
    }

    /// Publish every state change of a session until it settles
    pub fn forward_snapshots(
        &self,
        mut snapshots: watch::Receiver<SessionSnapshot>,
    ) -> JoinHandle<()> {
        let client = self.clone();

        tokio::spawn(async move {
            let mut last_state = None;
            loop {
                let snapshot = snapshots.borrow_and_update().clone();

                // Chunk progress is not worth an event
                if last_state != Some(snapshot.state) {
                    last_state = Some(snapshot.state);
                    if let Err(e) = client.publish_snapshot(&snapshot).await {
                        warn!("Failed to publish session state: {:#}", e);
                    }
                }

                if snapshot.is_settled() || snapshots.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
