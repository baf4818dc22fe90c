//! Caller-visible failure taxonomy
//!
//! Plumbing inside components uses `anyhow`; these are the conditions the call
//! engine has to tell apart when deciding whether a turn stalls, the call ends,
//! or the input is simply refused.

use thiserror::Error;

/// Texts at or above this many characters are never sent for synthesis or translation
pub const MAX_TEXT_CHARS: usize = 1000;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("text is {len} characters, limit is {MAX_TEXT_CHARS}")]
    TextTooLong { len: usize },

    #[error("dialogue bridge is not registered")]
    NotRegistered,

    #[error("dialogue backend returned status {0}")]
    BackendStatus(u16),

    #[error("dial-pad reply is missing its input id")]
    MissingInputId,

    #[error("no dial-pad input is pending")]
    NoPendingInput,

    #[error("recognition service did not acknowledge preload within {0}ms")]
    PreloadTimeout(u64),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type CallResult<T> = Result<T, CallError>;

/// Reject text that is too long for the synthesis or translation backends.
pub fn guard_text(text: &str) -> CallResult<()> {
    let len = text.chars().count();
    if len >= MAX_TEXT_CHARS {
        return Err(CallError::TextTooLong { len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_accepts_short_text() {
        assert!(guard_text("hello").is_ok());
        assert!(guard_text(&"a".repeat(999)).is_ok());
    }

    #[test]
    fn guard_rejects_at_limit() {
        let err = guard_text(&"a".repeat(1000)).unwrap_err();
        assert!(matches!(err, CallError::TextTooLong { len: 1000 }));
    }
}
