use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::CallState;
use crate::recording::RecorderStats;

/// Read-only snapshot of everything a caller-facing surface would render
#[derive(Debug, Clone, Serialize)]
pub struct CallView {
    pub state: CallState,

    /// Whole seconds since the call connected; reset when the cooldown ends
    pub duration_secs: u64,

    /// Interim/final transcript, the reply being revealed, or a notice
    pub transcript: String,

    /// False while showing an interim transcript
    pub transcript_final: bool,

    pub dial_pad_visible: bool,
    pub dial_pad: String,

    /// The dialogue is waiting for dial-pad digits
    pub awaiting_input: bool,

    /// The recognizer acknowledged preload and audio is flowing
    pub listening: bool,

    /// A reply is being played
    pub speaking: bool,

    /// Last end-of-call or failure notice
    pub notice: Option<String>,

    pub call_started_at: Option<DateTime<Utc>>,
    pub sessions_created: u64,
    pub recorder: Option<RecorderStats>,
}

impl Default for CallView {
    fn default() -> Self {
        Self {
            state: CallState::NotReady,
            duration_secs: 0,
            transcript: String::new(),
            transcript_final: true,
            dial_pad_visible: false,
            dial_pad: String::new(),
            awaiting_input: false,
            listening: false,
            speaking: false,
            notice: None,
            call_started_at: None,
            sessions_created: 0,
            recorder: None,
        }
    }
}
