use super::state::AppState;
use crate::error::SessionError;
use crate::media::FileMediaSource;
use crate::session::{SessionConfig, SessionSnapshot, SessionState, SyncOrchestrator};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Local path of the reference video
    pub reference_path: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub duration_seconds: f64,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteSessionResponse {
    pub session_id: Uuid,
    pub final_state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            kind: None,
        }),
    )
        .into_response()
}

fn session_error_response(status: StatusCode, err: &SessionError) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: Some(err.kind().to_string()),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a session and prime its reference video
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    info!("Creating session for reference: {}", req.reference_path);

    let media = match FileMediaSource::load(&req.reference_path) {
        Ok(media) => media.with_ffprobe(state.ffprobe_path.clone()),
        Err(e) => return session_error_response(StatusCode::NOT_FOUND, &e),
    };

    let device = match (state.device_factory)() {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to create capture device: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create capture device: {}", e),
            );
        }
    };

    let config = SessionConfig {
        session_id: Uuid::new_v4(),
        ..state.session_template.clone()
    };
    let session_id = config.session_id;

    let (mut orchestrator, handle) = SyncOrchestrator::new(config, device);
    orchestrator = orchestrator.with_device_lock(state.device_lock.clone());
    if let Some(scorer) = &state.scorer {
        orchestrator = orchestrator.with_scorer(Arc::clone(scorer));
    }
    if let Some(uploader) = &state.uploader {
        orchestrator = orchestrator.with_uploader(Arc::clone(uploader));
    }
    orchestrator.spawn();

    if let Some(events) = &state.events {
        events.forward_snapshots(handle.subscribe());
    }

    // Store first so failed sessions stay inspectable
    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(session_id, handle.clone());
    }

    match handle.select_reference(Box::new(media)).await {
        Ok(reference) => {
            info!(
                "Session {} primed ({:.3}s reference)",
                session_id, reference.duration_seconds
            );
            (
                StatusCode::CREATED,
                Json(CreateSessionResponse {
                    session_id,
                    duration_seconds: reference.duration_seconds,
                    snapshot: handle.snapshot(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Session {} could not be primed: {}", session_id, e);
            session_error_response(StatusCode::UNPROCESSABLE_ENTITY, &e)
        }
    }
}

/// POST /sessions/:session_id/start
/// Start capture: camera on, recorder armed, reference playing
pub async fn start_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let handle = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).cloned()
    };

    let Some(handle) = handle else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        );
    };

    match handle.start().await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(StartSessionResponse {
                session_id,
                status: handle.state().to_string(),
                message: format!("Capture started for session {}", session_id),
            }),
        )
            .into_response(),
        Err(e) if e.is_user_error() => session_error_response(StatusCode::CONFLICT, &e),
        Err(e) => {
            error!("Failed to start session {}: {}", session_id, e);
            session_error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// GET /sessions/:session_id/status
/// Current snapshot of a session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(handle) => (StatusCode::OK, Json(handle.snapshot())).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /sessions/:session_id/recording
/// The finished recording, served with its mime type
pub async fn get_session_recording(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let handle = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).cloned()
    };

    let Some(handle) = handle else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        );
    };

    match handle.artifact().await {
        Some(artifact) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, artifact.mime_type.clone())],
            artifact.bytes().to_vec(),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} has no recording yet", session_id),
        ),
    }
}

/// DELETE /sessions/:session_id
/// Forget a session. Dropping the last handle shuts its actor down, which
/// frees the recording held in memory.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;

    let Some(handle) = sessions.get(&session_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        );
    };

    let snapshot = handle.snapshot();
    let idle = matches!(snapshot.state, SessionState::Idle | SessionState::Primed);
    if !idle && !snapshot.is_settled() {
        let err = SessionError::User(format!(
            "Session {} is {}, wait until it settles",
            session_id, snapshot.state
        ));
        return session_error_response(StatusCode::CONFLICT, &err);
    }

    sessions.remove(&session_id);
    info!("Session {} removed ({})", session_id, snapshot.state);

    (
        StatusCode::OK,
        Json(DeleteSessionResponse {
            session_id,
            final_state: snapshot.state,
            message: format!("Session {} removed", session_id),
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
