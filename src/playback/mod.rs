//! Speech playback: synthesis request, streaming or buffered delivery, decode and output

pub mod media;
pub mod player;
pub mod synthesis;

pub use media::{MediaBuffer, MediaReader};
pub use player::{PlaybackOutcome, SpeechPlayer};
pub use synthesis::SynthesisClient;
