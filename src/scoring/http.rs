//! HTTP client for the pose-comparison backend
//!
//! Endpoints:
//! - POST /upload         multipart field `video`: the reference video
//! - POST /upload_webcam  multipart field `video`: the webcam recording
//! - GET  /compare        `{"score": 87.5}` or `{"error": "..."}`
//! - GET  /health
//!
//! The backend keeps a single reference and a single webcam recording, so an
//! upload/compare exchange holds `exchange` from the first upload until the
//! score is read.

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::client::{validate_score, ScoringClient, UploadChannel};
use crate::error::{SessionError, SessionResult};
use crate::media::ReferenceAsset;
use crate::recording::RecordingArtifact;

const USER_AGENT: &str = concat!("dance-sync/", env!("CARGO_PKG_VERSION"));

/// Body shape shared by every backend endpoint
#[derive(Debug, Default, Deserialize)]
struct BackendResponse {
    score: Option<f64>,
    error: Option<String>,
    message: Option<String>,
}

pub struct HttpScoringClient {
    http_client: reqwest::Client,
    base_url: String,
    exchange: Mutex<()>,
}

impl HttpScoringClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SessionResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Scoring(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            exchange: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /health
    pub async fn health(&self) -> SessionResult<()> {
        let response = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| SessionError::Scoring(format!("Backend unreachable: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SessionError::Scoring(format!(
                "Backend unhealthy: {}",
                response.status()
            )))
        }
    }

    async fn send_reference(&self, reference: &ReferenceAsset) -> SessionResult<()> {
        let path = reference.path.as_ref().ok_or_else(|| {
            SessionError::Upload(format!("Reference {} has no local file", reference.identity))
        })?;

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| SessionError::Upload(format!("Cannot read {}: {}", path.display(), e)))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "reference.mp4".to_string());

        self.post_video("upload", Part::bytes(data).file_name(file_name))
            .await
    }

    async fn send_recording(&self, recording: &RecordingArtifact) -> SessionResult<()> {
        let part = Part::bytes(recording.bytes().to_vec())
            .file_name(format!("webcam.{}", recording.file_extension()))
            .mime_str(&recording.mime_type)
            .map_err(|e| SessionError::Upload(format!("Invalid mime type: {}", e)))?;

        self.post_video("upload_webcam", part).await
    }

    async fn post_video(&self, endpoint: &str, part: Part) -> SessionResult<()> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!("Uploading to {}", url);

        let response = self
            .http_client
            .post(&url)
            .multipart(Form::new().part("video", part))
            .send()
            .await
            .map_err(|e| SessionError::Upload(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::Upload(format!("{}: {}", url, e)))?;

        if status.is_success() {
            let parsed: BackendResponse = serde_json::from_slice(&body).unwrap_or_default();
            info!(
                "Upload to {} accepted: {}",
                endpoint,
                parsed.message.unwrap_or_else(|| status.to_string())
            );
            Ok(())
        } else {
            Err(SessionError::Upload(format!(
                "{} returned {}: {}",
                endpoint,
                status,
                backend_error(&body)
            )))
        }
    }
}

#[async_trait::async_trait]
impl UploadChannel for HttpScoringClient {
    async fn upload_reference(&self, reference: &ReferenceAsset) -> SessionResult<()> {
        let _exchange = self.exchange.lock().await;
        self.send_reference(reference).await
    }

    async fn upload_recording(&self, recording: &RecordingArtifact) -> SessionResult<()> {
        let _exchange = self.exchange.lock().await;
        self.send_recording(recording).await
    }
}

#[async_trait::async_trait]
impl ScoringClient for HttpScoringClient {
    /// Upload both videos, then ask for the comparison. Nothing else talks to
    /// the backend in between.
    async fn score(
        &self,
        reference: &ReferenceAsset,
        recording: &RecordingArtifact,
    ) -> SessionResult<f64> {
        let _exchange = self.exchange.lock().await;
        debug!(
            reference = %reference.identity,
            recording_bytes = recording.len(),
            "Requesting comparison score"
        );

        self.send_reference(reference).await?;
        self.send_recording(recording).await?;

        let response = self
            .http_client
            .get(format!("{}/compare", self.base_url))
            .send()
            .await
            .map_err(|e| SessionError::Scoring(format!("Compare request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SessionError::Scoring(format!("Compare response unreadable: {}", e)))?;

        let score = parse_compare_response(status, &body)?;
        info!("Comparison score: {:.2}", score);
        Ok(score)
    }
}

/// Interpret a /compare response
fn parse_compare_response(status: StatusCode, body: &[u8]) -> SessionResult<f64> {
    if !status.is_success() {
        return Err(SessionError::Scoring(format!(
            "compare returned {}: {}",
            status,
            backend_error(body)
        )));
    }

    let parsed: BackendResponse = serde_json::from_slice(body)
        .map_err(|e| SessionError::Scoring(format!("Malformed compare response: {}", e)))?;

    match parsed.score {
        Some(score) => validate_score(score),
        None => Err(SessionError::Scoring(
            parsed
                .error
                .unwrap_or_else(|| "No score in compare response".to_string()),
        )),
    }
}

/// Error text from a backend body, falling back to the raw body
fn backend_error(body: &[u8]) -> String {
    match serde_json::from_slice::<BackendResponse>(body) {
        Ok(BackendResponse { error: Some(error), .. }) => error,
        _ => String::from_utf8_lossy(body).trim().to_string(),
    }
}
