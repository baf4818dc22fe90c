use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Length of the little-endian sequence id prefixed to binary audio frames
pub const SEQUENCE_PREFIX_LEN: usize = 8;

/// Client → recognition service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Ask the service to warm up a recognizer for the next utterance
    Preload,
    /// One captured chunk of PCM16LE audio
    Audio { sequence: u64, pcm: Vec<u8> },
}

/// Control events carried as JSON text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ControlMessage {
    Preload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Interim,
    End,
}

/// Recognition service → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    PreloadReady,
    Transcription {
        #[serde(rename = "type")]
        kind: TranscriptKind,
        content: String,
        /// Spoken duration in seconds
        #[serde(default)]
        duration: f64,
    },
    TranscriptionFailure,
    Disconnect,
}

/// Prefix `pcm` with its sequence id
pub fn encode_audio_frame(sequence: u64, pcm: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(SEQUENCE_PREFIX_LEN + pcm.len());
    data.extend_from_slice(&sequence.to_le_bytes());
    data.extend_from_slice(pcm);
    data
}

/// Split a binary audio frame into its sequence id and PCM payload
pub fn decode_audio_frame(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < SEQUENCE_PREFIX_LEN {
        bail!("Audio frame too short: {} bytes", data.len());
    }
    let (prefix, pcm) = data.split_at(SEQUENCE_PREFIX_LEN);
    let mut id = [0u8; SEQUENCE_PREFIX_LEN];
    id.copy_from_slice(prefix);
    Ok((u64::from_le_bytes(id), pcm))
}

/// Audio frame message published to NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub connection_id: String,
    pub sequence: u64,
    pub pcm: String, // Base64-encoded PCM bytes
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String, // RFC3339 timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transcription_event() {
        let json = r#"{"event":"transcription","type":"end","content":"hello there","duration":1.5}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Transcription {
                kind: TranscriptKind::End,
                content: "hello there".to_string(),
                duration: 1.5,
            }
        );
    }

    #[test]
    fn parses_bare_events() {
        let ready: ServerMessage = serde_json::from_str(r#"{"event":"preload-ready"}"#).unwrap();
        assert_eq!(ready, ServerMessage::PreloadReady);

        let failed: ServerMessage = serde_json::from_str(r#"{"event":"transcription-failure"}"#).unwrap();
        assert_eq!(failed, ServerMessage::TranscriptionFailure);
    }

    #[test]
    fn preload_serializes_as_event() {
        let json = serde_json::to_string(&ControlMessage::Preload).unwrap();
        assert_eq!(json, r#"{"event":"preload"}"#);
    }

    #[test]
    fn audio_frame_prefix() {
        let data = encode_audio_frame(258, &[9, 8, 7]);
        assert_eq!(&data[..8], &[2, 1, 0, 0, 0, 0, 0, 0]);

        let (sequence, pcm) = decode_audio_frame(&data).unwrap();
        assert_eq!(sequence, 258);
        assert_eq!(pcm, &[9, 8, 7]);

        assert!(decode_audio_frame(&[1, 2, 3]).is_err());
    }
}
