use anyhow::{Context, Result};
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{AudioFrameMessage, ClientMessage, ControlMessage, ServerMessage};
use super::{Transport, TransportConnector, TransportEvent};

/// Subjects for one connection: `{prefix}.{connection_id}.{preload|audio|events}`
#[derive(Debug, Clone)]
pub struct Subjects {
    pub preload: String,
    pub audio: String,
    pub events: String,
}

impl Subjects {
    pub fn new(prefix: &str, connection_id: &str) -> Self {
        Self {
            preload: format!("{}.{}.preload", prefix, connection_id),
            audio: format!("{}.{}.audio", prefix, connection_id),
            events: format!("{}.{}.events", prefix, connection_id),
        }
    }
}

pub struct NatsTransport {
    client: Client,
    connection_id: String,
    subjects: Subjects,
    sample_rate: u32,
    channels: u16,
    connected: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for NatsTransport {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        let (subject, payload) = match message {
            ClientMessage::Preload => (
                self.subjects.preload.clone(),
                serde_json::to_vec(&ControlMessage::Preload)?,
            ),
            ClientMessage::Audio { sequence, pcm } => {
                let message = AudioFrameMessage {
                    connection_id: self.connection_id.clone(),
                    sequence,
                    pcm: base64::engine::general_purpose::STANDARD.encode(&pcm),
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                debug!("Publishing audio frame {} ({} bytes)", sequence, pcm.len());
                (self.subjects.audio.clone(), serde_json::to_vec(&message)?)
            }
        };

        self.client
            .publish(subject, payload.into())
            .await
            .context("Failed to publish to NATS")?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing NATS connection {}", self.connection_id);
        self.connected.store(false, Ordering::SeqCst);

        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }

        // async-nats handles cleanup on drop; flush whatever is still buffered
        if let Err(e) = self.client.flush().await {
            debug!("NATS flush on close: {}", e);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Connects to the recognition service through a NATS server
pub struct NatsConnector {
    url: String,
    subject_prefix: String,
    sample_rate: u32,
    channels: u16,
}

impl NatsConnector {
    pub fn new(url: String, subject_prefix: String, sample_rate: u32, channels: u16) -> Self {
        Self {
            url,
            subject_prefix,
            sample_rate,
            channels,
        }
    }
}

#[async_trait]
impl TransportConnector for NatsConnector {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        info!("Connecting to NATS at {}", self.url);

        let (event_tx, event_rx) = mpsc::channel(100);
        let connected = Arc::new(AtomicBool::new(true));

        let callback_tx = event_tx.clone();
        let callback_connected = Arc::clone(&connected);
        let client = ConnectOptions::new()
            .event_callback(move |event| {
                let tx = callback_tx.clone();
                let connected = Arc::clone(&callback_connected);
                async move {
                    if let Event::Disconnected = event {
                        if connected.swap(false, Ordering::SeqCst) {
                            let _ = tx
                                .send(TransportEvent::Disconnected("NATS server disconnected".to_string()))
                                .await;
                        }
                    }
                }
            })
            .connect(self.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        let connection_id = uuid::Uuid::new_v4().to_string();
        let subjects = Subjects::new(&self.subject_prefix, &connection_id);

        let mut subscriber = client
            .subscribe(subjects.events.clone())
            .await
            .context("Failed to subscribe to recognition events")?;

        info!("Subscribed to {}", subjects.events);

        let reader_connected = Arc::clone(&connected);
        let reader = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(message) => {
                        if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Failed to parse recognition event: {}", e),
                }
            }

            if reader_connected.swap(false, Ordering::SeqCst) {
                let _ = event_tx
                    .send(TransportEvent::Disconnected("subscription ended".to_string()))
                    .await;
            }
        });

        let transport = Arc::new(NatsTransport {
            client,
            connection_id,
            subjects,
            sample_rate: self.sample_rate,
            channels: self.channels,
            connected,
            reader: std::sync::Mutex::new(Some(reader)),
        });

        info!("Connected to NATS successfully");
        Ok((transport, event_rx))
    }
}
