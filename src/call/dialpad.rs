use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

/// Seven digits, `#`, seven digits, `#`
pub const COMPLETION_PATTERN: &str = r"^\d{7}#\d{7}#$";

/// Taps beyond this length are ignored
pub const MAX_DIAL_PAD_LEN: usize = 32;

/// Keypad buffer with a one-shot completion per capture phase
#[derive(Debug, Clone)]
pub struct DialPad {
    pattern: Regex,
    buffer: String,
    armed: bool,
}

impl DialPad {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(COMPLETION_PATTERN).context("Invalid dial-pad pattern")?,
            buffer: String::new(),
            armed: false,
        })
    }

    pub fn is_complete(&self, input: &str) -> bool {
        self.pattern.is_match(input)
    }

    /// Clear the buffer and arm the completion for a new capture phase
    pub fn begin_capture(&mut self) {
        self.buffer.clear();
        self.armed = true;
        debug!("Dial-pad capture armed");
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    /// Append a key. Returns the digits when this tap completes the armed capture.
    pub fn press(&mut self, key: char) -> Option<String> {
        if !(key.is_ascii_digit() || key == '*' || key == '#') {
            warn!("Ignoring invalid dial-pad key {:?}", key);
            return None;
        }
        if self.buffer.len() >= MAX_DIAL_PAD_LEN {
            warn!("Dial-pad buffer full, ignoring {:?}", key);
            return None;
        }

        self.buffer.push(key);
        self.check()
    }

    /// Remove the last key. Returns the digits when the shortened buffer completes the capture.
    pub fn backspace(&mut self) -> Option<String> {
        self.buffer.pop()?;
        self.check()
    }

    fn check(&mut self) -> Option<String> {
        if self.armed && self.pattern.is_match(&self.buffer) {
            self.armed = false;
            return Some(self.buffer.clone());
        }
        None
    }
}
