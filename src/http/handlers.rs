use super::state::AppState;
use crate::call::{CallState, CallView};
use crate::dialogue::DialogueTurn;
use crate::error::CallError;
use crate::translate::Language;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub accepted: bool,
    pub state: CallState,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,

    /// Language code: en, zh-CN, ms, ta or hi
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub target: Language,
    pub translated: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

fn engine_stopped(e: anyhow::Error) -> Response {
    error!("Call engine unavailable: {}", e);
    error_response(StatusCode::SERVICE_UNAVAILABLE, format!("Call engine unavailable: {}", e))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /call
/// Snapshot of the call view
pub async fn get_call(State(state): State<AppState>) -> Json<CallView> {
    Json(state.call.view())
}

/// GET /call/transcript
/// Dialogue turns of the current or most recent call
pub async fn get_transcript(State(state): State<AppState>) -> Json<Vec<DialogueTurn>> {
    Json(state.call.transcript())
}

/// POST /call/dial
/// Place a call. Only accepted from READY or ENDED.
pub async fn dial(State(state): State<AppState>) -> Response {
    let current = state.call.view().state;
    if !current.can_dial() {
        warn!("Dial rejected in {}", current);
        return (
            StatusCode::CONFLICT,
            Json(CommandResponse {
                accepted: false,
                state: current,
                message: format!("Cannot dial while {}", current),
            }),
        )
            .into_response();
    }

    if let Err(e) = state.call.dial().await {
        return engine_stopped(e);
    }

    info!("Dial requested");
    (
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            accepted: true,
            state: current,
            message: "Dialling".to_string(),
        }),
    )
        .into_response()
}

/// POST /call/hangup
pub async fn hang_up(State(state): State<AppState>) -> Response {
    let current = state.call.view().state;
    if current != CallState::Connected {
        return (
            StatusCode::CONFLICT,
            Json(CommandResponse {
                accepted: false,
                state: current,
                message: "No call in progress".to_string(),
            }),
        )
            .into_response();
    }

    if let Err(e) = state.call.hang_up().await {
        return engine_stopped(e);
    }

    (
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            accepted: true,
            state: current,
            message: "Hanging up".to_string(),
        }),
    )
        .into_response()
}

/// POST /call/keypad/:key
/// Tap one dial-pad key (0-9, *, #)
pub async fn press_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let mut chars = key.chars();
    let key = match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() || c == '*' || c == '#' => c,
        _ => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid dial-pad key {:?}", key));
        }
    };

    if let Err(e) = state.call.press_key(key).await {
        return engine_stopped(e);
    }
    StatusCode::ACCEPTED.into_response()
}

/// DELETE /call/keypad
/// Remove the last dial-pad key
pub async fn backspace(State(state): State<AppState>) -> Response {
    if let Err(e) = state.call.backspace().await {
        return engine_stopped(e);
    }
    StatusCode::ACCEPTED.into_response()
}

/// POST /translate
pub async fn translate(State(state): State<AppState>, Json(req): Json<TranslateRequest>) -> Response {
    let target: Language = match req.target.parse() {
        Ok(lang) => lang,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.translator.translate(&req.text, target).await {
        Ok(translated) => (StatusCode::OK, Json(TranslateResponse { target, translated })).into_response(),
        Err(e @ CallError::TextTooLong { .. }) => error_response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
        Err(e) => {
            error!("Translation failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, format!("Translation failed: {}", e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
