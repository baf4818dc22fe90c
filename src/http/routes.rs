use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Call control
        .route("/call", get(handlers::get_call))
        .route("/call/transcript", get(handlers::get_transcript))
        .route("/call/dial", post(handlers::dial))
        .route("/call/hangup", post(handlers::hang_up))
        .route("/call/keypad/:key", post(handlers::press_key))
        .route("/call/keypad", delete(handlers::backspace))
        .route("/translate", post(handlers::translate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
