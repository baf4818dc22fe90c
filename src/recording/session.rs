use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// One listening turn, created after the preload handshake completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingSession {
    /// Millisecond timestamp, strictly increasing across the process
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

impl RecordingSession {
    pub(crate) fn new() -> Self {
        let created_at = Utc::now();
        Self {
            id: next_session_id(created_at.timestamp_millis().max(0) as u64),
            created_at,
        }
    }
}

fn next_session_id(now_ms: u64) -> u64 {
    let mut last = LAST_SESSION_ID.load(Ordering::SeqCst);
    loop {
        let id = now_ms.max(last + 1);
        match LAST_SESSION_ID.compare_exchange(last, id, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return id,
            Err(current) => last = current,
        }
    }
}
