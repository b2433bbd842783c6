use super::state::AppState;
use crate::error::SessionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Optional topic shown in the session document
    pub topic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub self_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct SetMediaRequest {
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: &SessionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SessionError::SessionFull { .. } => StatusCode::CONFLICT,
        SessionError::SessionEnded(_) => StatusCode::GONE,
        SessionError::MediaAccessDenied(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::SignalingDeliveryFailed(_) => StatusCode::BAD_GATEWAY,
        SessionError::PeerNegotiationFailed(_)
        | SessionError::SpeechServiceUnavailable
        | SessionError::TranslationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Host a new mesh session
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let topic = req.topic.unwrap_or_else(|| "Untitled meeting".to_string());
    info!("Creating session: {}", topic);

    {
        let active = state.active.read().await;
        if let Some(handle) = active.as_ref() {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("already in session {}", handle.session_id()),
                }),
            )
                .into_response();
        }
    }

    match state.orchestrator.create_session(&topic).await {
        Ok(handle) => {
            let response = SessionResponse {
                session_id: handle.session_id().to_string(),
                self_id: handle.self_id().to_string(),
                status: "hosting".to_string(),
            };
            *state.active.write().await = Some(handle);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            error!("Failed to create session: {}", e);
            error_response(&e).into_response()
        }
    }
}

/// POST /sessions/:session_id/join
/// Join an existing session
pub async fn join_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Joining session: {}", session_id);

    {
        let active = state.active.read().await;
        if let Some(handle) = active.as_ref() {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("already in session {}", handle.session_id()),
                }),
            )
                .into_response();
        }
    }

    match state.orchestrator.join_session(&session_id).await {
        Ok(handle) => {
            let response = SessionResponse {
                session_id: handle.session_id().to_string(),
                self_id: handle.self_id().to_string(),
                status: "joined".to_string(),
            };
            *state.active.write().await = Some(handle);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            error!("Failed to join session {}: {}", session_id, e);
            error_response(&e).into_response()
        }
    }
}

/// POST /sessions/leave
/// Leave the current session. Idempotent: leaving with no active session
/// succeeds.
pub async fn leave_session(State(state): State<AppState>) -> impl IntoResponse {
    let handle = state.active.write().await.take();

    match handle {
        Some(handle) => {
            info!("Leaving session: {}", handle.session_id());
            handle.leave().await;
            (
                StatusCode::OK,
                Json(SessionResponse {
                    session_id: handle.session_id().to_string(),
                    self_id: handle.self_id().to_string(),
                    status: "left".to_string(),
                }),
            )
                .into_response()
        }
        None => (StatusCode::OK, Json(serde_json::json!({ "status": "idle" }))).into_response(),
    }
}

/// PUT /media
/// Toggle local audio/video flags
pub async fn set_media(
    State(state): State<AppState>,
    Json(req): Json<SetMediaRequest>,
) -> impl IntoResponse {
    let active = state.active.read().await;
    let Some(handle) = active.as_ref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no active session".to_string(),
            }),
        )
            .into_response();
    };

    if let Some(enabled) = req.audio_enabled {
        handle.set_audio_enabled(enabled).await;
    }
    if let Some(enabled) = req.video_enabled {
        handle.set_video_enabled(enabled).await;
    }

    StatusCode::NO_CONTENT.into_response()
}

/// GET /state
/// Full read-model snapshot (session, participants, subtitles)
pub async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.active.read().await;
    match active.as_ref() {
        Some(handle) => {
            let snapshot = handle.store().snapshot().await;
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no active session".to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /subtitles
/// Current subtitles only
pub async fn get_subtitles(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.active.read().await;
    match active.as_ref() {
        Some(handle) => {
            let snapshot = handle.store().snapshot().await;
            (StatusCode::OK, Json(snapshot.subtitles)).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no active session".to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
