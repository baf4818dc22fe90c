//! Streaming link to the recognition service
//!
//! Audio chunks and the preload request go out, transcription events come back.
//! Two wire encodings are supported:
//! - WebSocket: JSON text frames for events, binary frames for audio
//! - NATS: per-connection subjects with JSON payloads

pub mod messages;
pub mod nats;
pub mod websocket;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{Config, TransportKind};

pub use messages::{ClientMessage, ServerMessage, TranscriptKind};
pub use nats::NatsConnector;
pub use websocket::WebSocketConnector;

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded event from the recognition service
    Message(ServerMessage),
    /// The connection was lost without `close()` being called
    Disconnected(String),
}

/// An open connection to the recognition service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<()>;

    /// Close the connection. No `Disconnected` event is produced afterwards.
    async fn close(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn name(&self) -> &str;
}

/// Opens new transports, returning the transport and its event stream.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}

/// Build the connector selected by `recognition.transport`
pub fn connector_for(config: &Config) -> Arc<dyn TransportConnector> {
    let recognition = &config.recognition;
    match recognition.transport {
        TransportKind::Websocket => Arc::new(WebSocketConnector::new(recognition.url.clone())),
        TransportKind::Nats => Arc::new(NatsConnector::new(
            recognition.url.clone(),
            recognition.subject_prefix.clone(),
            config.audio.sample_rate,
            config.audio.channels,
        )),
    }
}
