use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Exclusive claim on the capture device for one user context
///
/// A session claims the lock before acquiring the device and gives it back
/// when its live stream is released. Contending sessions are rejected, never
/// queued.
#[derive(Debug, Clone, Default)]
pub struct DeviceLock {
    holder: Arc<Mutex<Option<Uuid>>>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device for `session_id`. Returns the current holder on contention.
    pub fn try_claim(&self, session_id: Uuid) -> Result<(), Uuid> {
        let mut holder = self.holder.lock().unwrap_or_else(|p| p.into_inner());
        match *holder {
            Some(current) if current != session_id => {
                warn!("Device busy: held by session {}", current);
                Err(current)
            }
            _ => {
                *holder = Some(session_id);
                debug!("Device claimed by session {}", session_id);
                Ok(())
            }
        }
    }

    /// Give the device back. Only the holder can release; returns whether it did.
    pub fn release(&self, session_id: Uuid) -> bool {
        let mut holder = self.holder.lock().unwrap_or_else(|p| p.into_inner());
        if *holder == Some(session_id) {
            *holder = None;
            debug!("Device released by session {}", session_id);
            true
        } else {
            false
        }
    }

    pub fn holder(&self) -> Option<Uuid> {
        *self.holder.lock().unwrap_or_else(|p| p.into_inner())
    }
}
