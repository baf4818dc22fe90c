pub mod backend;
pub mod decode;
pub mod file;
pub mod gate;
pub mod output;
pub mod resample;
pub mod silence;

#[cfg(feature = "device-audio")]
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use decode::{decode_into, DecodeStats};
pub use file::{AudioFile, FileBackend};
pub use gate::{EnergyGate, GateReading, SpeechBandFilter};
pub use output::{output_factory, AudioOutput, NullOutputFactory, OutputFactory, WavOutputFactory};
pub use silence::SilenceBackend;
