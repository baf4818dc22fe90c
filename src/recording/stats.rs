use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a recorder (one transport connection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderStats {
    /// Whether audio chunks are currently being transmitted
    pub is_recording: bool,

    /// Whether the recognition service acknowledged preload for the current session
    pub is_listening: bool,

    /// When the transport was opened
    pub started_at: DateTime<Utc>,

    /// Audio chunks transmitted so far
    pub frames_sent: u64,

    /// Sessions created on this connection
    pub sessions_created: u64,
}
