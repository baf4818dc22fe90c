pub mod audio;
pub mod call;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod http;
pub mod playback;
pub mod recording;
pub mod translate;
pub mod transport;

pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource};
pub use call::{CallDeps, CallHandle, CallMachine, CallState, CallView, DialPad};
pub use config::Config;
pub use dialogue::{BridgeReply, DialogueBridge, DialogueTurn};
pub use error::{CallError, CallResult};
pub use http::{create_router, AppState};
pub use playback::{PlaybackOutcome, SpeechPlayer, SynthesisClient};
pub use recording::{Recorder, RecorderEvent, RecorderStats, RecordingSession};
pub use translate::{Language, Translator};
pub use transport::{Transport, TransportConnector, TransportEvent};
