use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the single call an engine drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// Still loading
    NotReady,
    /// Idle, waiting for a dial
    Ready,
    /// In a call
    Connected,
    /// Torn down, cooling off before Ready
    Ended,
}

impl CallState {
    pub fn can_dial(&self) -> bool {
        matches!(self, CallState::Ready | CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::NotReady => "NOT_READY",
            CallState::Ready => "READY",
            CallState::Connected => "CONNECTED",
            CallState::Ended => "ENDED",
        };
        f.write_str(name)
    }
}
