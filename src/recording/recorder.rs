use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::RecordingSession;
use super::stats::RecorderStats;
use crate::audio::{AudioBackend, AudioFrame, EnergyGate};
use crate::error::CallError;
use crate::transport::{ClientMessage, ServerMessage, TranscriptKind, Transport, TransportConnector, TransportEvent};

/// Events raised towards the call layer
#[derive(Debug)]
pub enum RecorderEvent {
    /// Partial transcript; the session stays active
    Interim { text: String },

    /// End of utterance. Reply `true` on `preserve` to keep the session, anything
    /// else (including dropping it) stops recording and clears the session.
    Final {
        text: String,
        duration_secs: f64,
        preserve: oneshot::Sender<bool>,
    },

    /// The recognizer gave up on this session; it has already been torn down
    TranscriptionFailed,

    /// The connection closed without `cleanup()`. Raised at most once.
    Quit { reason: String },
}

/// Owns one capture source and one transport connection
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    backend: Mutex<Box<dyn AudioBackend>>,
    preload_timeout: Duration,
    started_at: DateTime<Utc>,

    session: Mutex<Option<RecordingSession>>,
    preload_waiter: Mutex<Option<oneshot::Sender<()>>>,

    is_recording: AtomicBool,
    is_listening: AtomicBool,
    closing: AtomicBool,
    quit_raised: AtomicBool,

    sequence: Arc<AtomicU64>,
    frames_sent: Arc<AtomicU64>,
    sessions_created: AtomicU64,

    pump_task: Mutex<Option<JoinHandle<()>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Open the transport and take ownership of an acquired capture source
    pub async fn connect(
        connector: &dyn TransportConnector,
        capture: Box<dyn AudioBackend>,
        preload_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<RecorderEvent>)> {
        let (transport, transport_rx) = connector
            .connect()
            .await
            .context("Failed to connect to recognition service")?;

        info!("Recorder connected via {} (capture: {})", transport.name(), capture.name());

        let inner = Arc::new(Inner {
            transport,
            backend: Mutex::new(capture),
            preload_timeout,
            started_at: Utc::now(),
            session: Mutex::new(None),
            preload_waiter: Mutex::new(None),
            is_recording: AtomicBool::new(false),
            is_listening: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            quit_raised: AtomicBool::new(false),
            sequence: Arc::new(AtomicU64::new(0)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            sessions_created: AtomicU64::new(0),
            pump_task: Mutex::new(None),
            event_task: Mutex::new(None),
        });

        let (events_tx, events_rx) = mpsc::channel(32);
        let task = tokio::spawn(handle_transport_events(Arc::clone(&inner), transport_rx, events_tx));
        *inner.event_task.lock().await = Some(task);

        Ok((Self { inner }, events_rx))
    }

    /// Send `preload` and wait for `preload-ready` before handing out a new session
    pub async fn create_session(&self) -> Result<RecordingSession> {
        let inner = &self.inner;
        inner.is_listening.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        *inner.preload_waiter.lock().await = Some(ready_tx);

        debug!("Preloading recognizer");
        inner
            .transport
            .send(ClientMessage::Preload)
            .await
            .context("Failed to send preload")?;

        match tokio::time::timeout(inner.preload_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(CallError::TransportClosed("connection lost during preload".to_string()).into());
            }
            Err(_) => {
                inner.preload_waiter.lock().await.take();
                return Err(CallError::PreloadTimeout(inner.preload_timeout.as_millis() as u64).into());
            }
        }

        let session = RecordingSession::new();
        *inner.session.lock().await = Some(session.clone());
        inner.sessions_created.fetch_add(1, Ordering::SeqCst);
        inner.is_listening.store(true, Ordering::SeqCst);

        info!("Recording session {} ready", session.id);
        Ok(session)
    }

    /// Begin emitting audio chunks. No-op while recording or without a session.
    pub async fn start_recording(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.is_recording.load(Ordering::SeqCst) {
            warn!("start_recording called while already recording");
            return Ok(());
        }
        if inner.session.lock().await.is_none() {
            warn!("start_recording called without an active session");
            return Ok(());
        }

        let frames = {
            let mut backend = inner.backend.lock().await;
            backend.start().await.context("Failed to start audio capture")?
        };

        inner.is_recording.store(true, Ordering::SeqCst);

        let pump = tokio::spawn(pump_frames(
            frames,
            Arc::clone(&inner.transport),
            Arc::clone(&inner.sequence),
            Arc::clone(&inner.frames_sent),
        ));
        *inner.pump_task.lock().await = Some(pump);

        info!("Recording started");
        Ok(())
    }

    /// Halt chunk emission. No-op when not recording.
    pub async fn stop_recording(&self) {
        self.inner.stop_recording().await;
    }

    /// Release capture and close the transport without raising `Quit`
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        inner.closing.store(true, Ordering::SeqCst);

        if let Some(task) = inner.event_task.lock().await.take() {
            task.abort();
        }
        inner.preload_waiter.lock().await.take();

        inner.is_recording.store(false, Ordering::SeqCst);
        inner.is_listening.store(false, Ordering::SeqCst);
        if let Some(pump) = inner.pump_task.lock().await.take() {
            pump.abort();
        }

        if let Err(e) = inner.backend.lock().await.stop().await {
            error!("Failed to release capture source: {}", e);
        }
        if let Err(e) = inner.transport.close().await {
            error!("Failed to close transport: {}", e);
        }

        inner.session.lock().await.take();
        info!("Recorder released");
    }

    pub async fn session(&self) -> Option<RecordingSession> {
        self.inner.session.lock().await.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.inner.is_recording.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.inner.is_listening.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RecorderStats {
        let inner = &self.inner;
        RecorderStats {
            is_recording: self.is_recording(),
            is_listening: self.is_listening(),
            started_at: inner.started_at,
            frames_sent: inner.frames_sent.load(Ordering::SeqCst),
            sessions_created: inner.sessions_created.load(Ordering::SeqCst),
        }
    }
}

impl Inner {
    async fn stop_recording(&self) {
        if !self.is_recording.swap(false, Ordering::SeqCst) {
            warn!("stop_recording called while not recording");
            return;
        }
        self.is_listening.store(false, Ordering::SeqCst);

        if let Some(pump) = self.pump_task.lock().await.take() {
            pump.abort();
        }
        if let Err(e) = self.backend.lock().await.stop().await {
            error!("Failed to stop audio capture: {}", e);
        }

        info!("Recording stopped");
    }

    async fn clear_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            debug!("Cleared recording session {}", session.id);
        }
    }

    async fn quit(&self, reason: String, events: &mpsc::Sender<RecorderEvent>) {
        self.is_listening.store(false, Ordering::SeqCst);
        // A pending create_session fails with TransportClosed instead of timing out
        self.preload_waiter.lock().await.take();
        if self.closing.load(Ordering::SeqCst) || self.quit_raised.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("Recognition service disconnected: {}", reason);
        let _ = events.send(RecorderEvent::Quit { reason }).await;
    }
}

async fn pump_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    transport: Arc<dyn Transport>,
    next_sequence: Arc<AtomicU64>,
    frames_sent: Arc<AtomicU64>,
) {
    let mut gate: Option<EnergyGate> = None;

    while let Some(frame) = frames.recv().await {
        if !transport.is_connected() {
            warn!("Transport not connected, dropping capture");
            break;
        }

        let sequence = next_sequence.fetch_add(1, Ordering::SeqCst);

        // Advisory only: every chunk is transmitted regardless of the reading
        let gate = gate.get_or_insert_with(|| EnergyGate::new(frame.sample_rate));
        let reading = gate.observe(&frame.samples);
        debug!(
            "chunk {}: energy={:.2} moving_average={:.2} speech={}",
            sequence, reading.energy, reading.moving_average, reading.speech
        );

        let message = ClientMessage::Audio {
            sequence,
            pcm: frame.to_pcm_bytes(),
        };
        if let Err(e) = transport.send(message).await {
            error!("Failed to send audio chunk {}: {}", sequence, e);
            break;
        }

        frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    debug!("Audio pump stopped");
}

async fn handle_transport_events(
    inner: Arc<Inner>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<RecorderEvent>,
) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::Message(ServerMessage::PreloadReady) => {
                match inner.preload_waiter.lock().await.take() {
                    Some(waiter) => {
                        let _ = waiter.send(());
                    }
                    None => debug!("Unsolicited preload-ready"),
                }
            }

            TransportEvent::Message(ServerMessage::Transcription { kind, content, duration }) => {
                if content.is_empty() {
                    debug!("Ignoring empty {:?} transcription", kind);
                    continue;
                }
                if inner.session.lock().await.is_none() {
                    debug!("Transcription with no active session: {:?}", content);
                    continue;
                }

                match kind {
                    TranscriptKind::Interim => {
                        let _ = events.send(RecorderEvent::Interim { text: content }).await;
                    }
                    TranscriptKind::End => {
                        let (preserve_tx, preserve_rx) = oneshot::channel();
                        let final_event = RecorderEvent::Final {
                            text: content,
                            duration_secs: duration,
                            preserve: preserve_tx,
                        };
                        if events.send(final_event).await.is_err() {
                            break;
                        }

                        if !preserve_rx.await.unwrap_or(false) {
                            inner.stop_recording().await;
                            inner.clear_session().await;
                        }
                    }
                }
            }

            TransportEvent::Message(ServerMessage::TranscriptionFailure) => {
                warn!("Recognition service reported a transcription failure");
                if inner.is_recording.load(Ordering::SeqCst) {
                    inner.stop_recording().await;
                }
                inner.clear_session().await;
                let _ = events.send(RecorderEvent::TranscriptionFailed).await;
            }

            TransportEvent::Message(ServerMessage::Disconnect) => {
                inner.quit("server requested disconnect".to_string(), &events).await;
            }

            TransportEvent::Disconnected(reason) => {
                inner.quit(reason, &events).await;
            }
        }
    }

    debug!("Transport event task finished");
}
