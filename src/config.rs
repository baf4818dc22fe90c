use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub call: CallConfig,
    pub dialogue: DialogueConfig,
    pub synthesis: SynthesisConfig,
    pub translation: TranslationConfig,
    pub recognition: RecognitionConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Call lifecycle timings and behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Delay before the engine leaves NotReady
    pub loading_delay_ms: u64,
    /// Hard limit on a single call
    pub max_duration_secs: u64,
    /// Time spent in Ended before returning to Ready
    pub cooldown_ms: u64,
    /// Delay before an end-of-call notice replaces the cleared transcript
    pub notice_delay_ms: u64,
    /// Word reveal cadence for spoken replies
    pub typewriter_interval_ms: u64,
    /// Start listening while a reply is still playing
    pub listen_during_playback: bool,
    /// Consecutive transcription failures recovered before giving up
    pub max_recoveries: u32,
    pub greeting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    pub url: String,
    /// Header carrying the key issued by `/chat/new`
    pub key_header: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Use streaming when the output supports it
    Auto,
    Streaming,
    Buffered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub url: String,
    pub mode: PlaybackMode,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Nats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub transport: TransportKind,
    /// `ws://` URL for the WebSocket transport, `nats://` URL for NATS
    pub url: String,
    /// Subject prefix used by the NATS transport
    pub subject_prefix: String,
    pub preload_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// `mic`, `silence`, or a path to a WAV file
    pub input: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Chunk emission period while recording
    pub chunk_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Discard audio, paced in real time
    Null,
    /// Write each reply to a WAV file
    Wav,
    /// Default output device (requires the `device-audio` feature)
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub output: OutputKind,
    pub wav_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "voicecall".to_string(),
                http: HttpConfig {
                    bind: "127.0.0.1".to_string(),
                    port: 8090,
                },
            },
            call: CallConfig::default(),
            dialogue: DialogueConfig {
                url: "http://localhost:3000".to_string(),
                key_header: "x-chat-key".to_string(),
                request_timeout_secs: 300,
            },
            synthesis: SynthesisConfig {
                url: "http://localhost:3001/synth".to_string(),
                mode: PlaybackMode::Auto,
                request_timeout_secs: 60,
            },
            translation: TranslationConfig {
                url: "https://translation.googleapis.com/language/translate/v2".to_string(),
                api_key: None,
            },
            recognition: RecognitionConfig {
                transport: TransportKind::Websocket,
                url: "ws://localhost:8765".to_string(),
                subject_prefix: "asr".to_string(),
                preload_timeout_ms: 10_000,
            },
            audio: AudioConfig {
                input: if cfg!(feature = "device-audio") { "mic" } else { "silence" }.to_string(),
                sample_rate: 16000,
                channels: 1,
                chunk_ms: 500,
            },
            playback: PlaybackConfig {
                output: if cfg!(feature = "device-audio") {
                    OutputKind::Device
                } else {
                    OutputKind::Wav
                },
                wav_dir: "replies".to_string(),
            },
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            loading_delay_ms: 50,
            max_duration_secs: 360,
            cooldown_ms: 6000,
            notice_delay_ms: 500,
            typewriter_interval_ms: 150,
            listen_during_playback: false,
            max_recoveries: 2,
            greeting: "Hello, how may I help you today?".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then an optional config file, then `VOICECALL_*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("VOICECALL").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.http.port == 0 {
            anyhow::bail!("HTTP port cannot be 0");
        }
        if self.call.max_duration_secs == 0 {
            anyhow::bail!("Maximum call duration must be greater than 0");
        }
        if self.call.typewriter_interval_ms == 0 {
            anyhow::bail!("Typewriter interval must be greater than 0");
        }
        if self.audio.chunk_ms == 0 {
            anyhow::bail!("Audio chunk period must be greater than 0");
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            anyhow::bail!(
                "Invalid audio format: {}Hz, {} channels",
                self.audio.sample_rate,
                self.audio.channels
            );
        }
        if self.dialogue.key_header.trim().is_empty() {
            anyhow::bail!("Dialogue key header cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.call.max_duration_secs, 360);
        assert_eq!(cfg.call.cooldown_ms, 6000);
        assert_eq!(cfg.audio.chunk_ms, 500);
    }

    #[test]
    fn zero_duration_rejected() {
        let mut cfg = Config::default();
        cfg.call.max_duration_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.recognition.transport, TransportKind::Websocket);
        assert_eq!(cfg.synthesis.mode, PlaybackMode::Auto);
    }
}
