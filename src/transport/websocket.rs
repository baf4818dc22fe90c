use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{encode_audio_frame, ClientMessage, ControlMessage, ServerMessage};
use super::{Transport, TransportConnector, TransportEvent};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

pub struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
    connected: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(|| anyhow!("Socket is closed"))?;

        let frame = match message {
            ClientMessage::Preload => Message::Text(serde_json::to_string(&ControlMessage::Preload)?),
            ClientMessage::Audio { sequence, pcm } => {
                debug!("--> audio frame {} ({} bytes)", sequence, pcm.len());
                Message::Binary(encode_audio_frame(sequence, &pcm))
            }
        };

        sink.send(frame)
            .await
            .map_err(|e| anyhow!("WebSocket send error: {}", e))
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        // Stop the read pump first so the close handshake is not reported as a disconnect
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("WebSocket close: {}", e);
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Dials the recognition service over WebSocket
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        info!("Dialing {}", self.url);

        let (client, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("WebSocket connect to {} failed", self.url))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(100);
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_pump(stream, event_tx, Arc::clone(&connected)));

        let transport = Arc::new(WebSocketTransport {
            sink: Mutex::new(Some(sink)),
            connected,
            reader: std::sync::Mutex::new(Some(reader)),
        });

        info!("Connected to recognition service");
        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>, connected: Arc<AtomicBool>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => {
                    debug!("<-- {:?}", message);
                    if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Ignoring unrecognised event {:?}: {}", text, e),
            },
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "stream ended".to_string(),
        }
    };

    connected.store(false, Ordering::SeqCst);
    info!("Recognition socket disconnected: {}", reason);
    let _ = event_tx.send(TransportEvent::Disconnected(reason)).await;
}
