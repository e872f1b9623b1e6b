use crate::capture::{CaptureDevice, DeviceLock};
use crate::nats::NatsClient;
use crate::scoring::{ScoringClient, UploadChannel};
use crate::session::{SessionConfig, SessionHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Builds a fresh capture device for each session
pub type DeviceFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn CaptureDevice>> + Send + Sync>;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Known sessions (session_id → handle)
    pub sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,

    /// One camera per server: sessions contend for it through this lock
    pub device_lock: DeviceLock,

    pub device_factory: DeviceFactory,

    /// Template for new sessions (session_id is replaced)
    pub session_template: SessionConfig,

    /// Duration fallback for references symphonia cannot read
    pub ffprobe_path: String,

    pub scorer: Option<Arc<dyn ScoringClient>>,

    pub uploader: Option<Arc<dyn UploadChannel>>,

    /// Publishes session state changes when connected
    pub events: Option<NatsClient>,
}

impl AppState {
    pub fn new(device_factory: DeviceFactory, session_template: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            device_lock: DeviceLock::new(),
            device_factory,
            session_template,
            ffprobe_path: "ffprobe".to_string(),
            scorer: None,
            uploader: None,
            events: None,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ScoringClient>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn UploadChannel>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_ffprobe(mut self, ffprobe_path: impl Into<String>) -> Self {
        self.ffprobe_path = ffprobe_path.into();
        self
    }

    pub fn with_events(mut self, events: NatsClient) -> Self {
        self.events = Some(events);
        self
    }
}
