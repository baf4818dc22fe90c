//! Recording session management
//!
//! A [`Recorder`] owns one capture source and one transport connection. Each
//! listening turn is a [`RecordingSession`] created through the preload handshake;
//! transcripts and connection loss come back as [`RecorderEvent`]s.

pub mod recorder;
pub mod session;
pub mod stats;

pub use recorder::{Recorder, RecorderEvent};
pub use session::RecordingSession;
pub use stats::RecorderStats;
