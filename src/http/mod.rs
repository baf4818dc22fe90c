//! HTTP control surface for a running call engine
//!
//! - GET /health - Health check
//! - GET /call - Current call view
//! - GET /call/transcript - Dialogue transcript of the current or last call
//! - POST /call/dial - Place a call
//! - POST /call/hangup - Hang up
//! - POST /call/keypad/:key - Tap a dial-pad key
//! - DELETE /call/keypad - Dial-pad backspace
//! - POST /translate - Translate text into a supported language

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
