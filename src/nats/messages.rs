use serde::{Deserialize, Serialize};

use crate::session::SessionSnapshot;

/// Session state change published to NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStateMessage {
    pub session_id: String,
    pub state: String,
    pub history: Vec<String>,
    pub stop_trigger: Option<String>,
    pub chunks_received: usize,
    pub bytes_received: usize,
    pub score: Option<f64>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub timestamp: String, // RFC3339 timestamp
}

impl From<&SessionSnapshot> for SessionStateMessage {
    fn from(snapshot: &SessionSnapshot) -> Self {
        // Same lowercase names the HTTP API uses
        let name = |value: serde_json::Value| value.as_str().map(str::to_string);

        Self {
            session_id: snapshot.session_id.to_string(),
            state: name(serde_json::json!(snapshot.state)).unwrap_or_default(),
            history: snapshot
                .history
                .iter()
                .filter_map(|state| name(serde_json::json!(state)))
                .collect(),
            stop_trigger: snapshot
                .stop_trigger
                .and_then(|trigger| name(serde_json::json!(trigger))),
            chunks_received: snapshot.chunks_received,
            bytes_received: snapshot.bytes_received,
            score: snapshot.score,
            error: snapshot.error.as_ref().map(ToString::to_string),
            error_kind: snapshot.error_kind.map(str::to_string),
            timestamp: snapshot.updated_at.to_rfc3339(),
        }
    }
}
