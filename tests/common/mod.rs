#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voicecall::audio::{AudioSource, NullOutputFactory};
use voicecall::config::{Config, PlaybackMode};
use voicecall::transport::{ClientMessage, ServerMessage, TranscriptKind, Transport, TransportConnector, TransportEvent};
use voicecall::{CallDeps, CallHandle, CallMachine};

pub const CHAT_KEY: &str = "test-key";

// ============================================================================
// In-memory recognizer
// ============================================================================

#[derive(Default)]
struct Connection {
    events: Option<mpsc::Sender<TransportEvent>>,
    preloaded: bool,
}

#[derive(Default)]
struct RecognizerState {
    connections: Vec<Connection>,
    preloads: usize,
    audio_frames: usize,
    audio_before_preload: bool,
    last_sequence: Option<u64>,
    sequence_regressed: bool,
}

/// Recognition service stand-in. Acknowledges every preload and records what it receives.
#[derive(Clone, Default)]
pub struct MockRecognizer {
    state: Arc<Mutex<RecognizerState>>,
    silent: Arc<AtomicBool>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering preloads
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    pub fn preloads(&self) -> usize {
        self.state.lock().unwrap().preloads
    }

    pub fn audio_frames(&self) -> usize {
        self.state.lock().unwrap().audio_frames
    }

    pub fn audio_before_preload(&self) -> bool {
        self.state.lock().unwrap().audio_before_preload
    }

    pub fn sequence_regressed(&self) -> bool {
        self.state.lock().unwrap().sequence_regressed
    }

    pub async fn say_interim(&self, text: &str) {
        self.emit(TransportEvent::Message(ServerMessage::Transcription {
            kind: TranscriptKind::Interim,
            content: text.to_string(),
            duration: 0.0,
        }))
        .await;
    }

    pub async fn say_final(&self, text: &str) {
        self.emit(TransportEvent::Message(ServerMessage::Transcription {
            kind: TranscriptKind::End,
            content: text.to_string(),
            duration: 1.5,
        }))
        .await;
    }

    pub async fn fail_transcription(&self) {
        self.emit(TransportEvent::Message(ServerMessage::TranscriptionFailure)).await;
    }

    /// Acknowledge a preload by hand, for use after `go_silent`
    pub async fn answer_preload(&self) {
        self.emit(TransportEvent::Message(ServerMessage::PreloadReady)).await;
    }

    /// Connections not yet closed by the client
    pub fn open_connections(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.connections.iter().filter(|c| c.events.is_some()).count()
    }

    pub async fn drop_connection(&self) {
        self.emit(TransportEvent::Disconnected("connection reset".to_string())).await;
    }

    /// Deliver an event on the most recent connection
    async fn emit(&self, event: TransportEvent) {
        let sender = {
            let state = self.state.lock().unwrap();
            state.connections.last().and_then(|c| c.events.clone())
        };
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

struct MockTransport {
    index: usize,
    recognizer: MockRecognizer,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            anyhow::bail!("closed");
        }

        let reply = {
            let mut state = self.recognizer.state.lock().unwrap();
            match message {
                ClientMessage::Preload => {
                    state.preloads += 1;
                    state.connections[self.index].preloaded = true;
                    if self.recognizer.silent.load(Ordering::SeqCst) {
                        None
                    } else {
                        state.connections[self.index].events.clone()
                    }
                }
                ClientMessage::Audio { sequence, .. } => {
                    state.audio_frames += 1;
                    if !state.connections[self.index].preloaded {
                        state.audio_before_preload = true;
                    }
                    if let Some(last) = state.last_sequence {
                        if sequence <= last {
                            state.sequence_regressed = true;
                        }
                    }
                    state.last_sequence = Some(sequence);
                    None
                }
            }
        };

        if let Some(events) = reply {
            tokio::spawn(async move {
                let _ = events.send(TransportEvent::Message(ServerMessage::PreloadReady)).await;
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.recognizer.state.lock().unwrap();
        state.connections[self.index].events = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl TransportConnector for MockRecognizer {
    async fn connect(&self) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        let (tx, rx) = mpsc::channel(32);
        let index = {
            let mut state = self.state.lock().unwrap();
            state.connections.push(Connection {
                events: Some(tx),
                preloaded: false,
            });
            state.connections.len() - 1
        };

        let transport = MockTransport {
            index,
            recognizer: self.clone(),
            connected: AtomicBool::new(true),
        };
        Ok((Arc::new(transport), rx))
    }
}

// ============================================================================
// Dialogue and synthesis backend
// ============================================================================

#[derive(Default)]
pub struct BackendState {
    pub register_fails: AtomicBool,
    pub slow_synthesis: AtomicBool,
    pub replies: Mutex<VecDeque<serde_json::Value>>,
    pub chats: Mutex<Vec<String>>,
    pub supplies: Mutex<Vec<(u64, String)>>,
    pub synth_requests: AtomicUsize,
    pub bad_keys: AtomicUsize,
}

/// Axum server standing in for the chat and synthesis backends
#[derive(Clone)]
pub struct MockBackend {
    pub url: String,
    pub state: Arc<BackendState>,
}

impl MockBackend {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(BackendState::default());

        let app = Router::new()
            .route("/chat/new", get(chat_new))
            .route("/chat", post(chat))
            .route("/chat/supply/:id", post(supply))
            .route("/synth", post(synth))
            .route("/translate", post(translate))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            url: format!("http://{}", addr),
            state,
        })
    }

    /// Queue a chat reply, served in order by `/chat` and `/chat/supply/:id`
    pub fn reply(&self, kind: i64, text: &str, input_id: Option<u64>) {
        let mut body = serde_json::json!({ "type": kind, "spokenResponse": text });
        if let Some(id) = input_id {
            body["inputId"] = serde_json::json!(id);
        }
        self.state.replies.lock().unwrap().push_back(body);
    }

    pub fn chats(&self) -> Vec<String> {
        self.state.chats.lock().unwrap().clone()
    }

    pub fn supplies(&self) -> Vec<(u64, String)> {
        self.state.supplies.lock().unwrap().clone()
    }

    pub fn synth_requests(&self) -> usize {
        self.state.synth_requests.load(Ordering::SeqCst)
    }
}

async fn chat_new(State(state): State<Arc<BackendState>>) -> Response {
    if state.register_fails.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(serde_json::json!({ "key": CHAT_KEY })).into_response()
}

fn next_reply(state: &BackendState, headers: &HeaderMap) -> Response {
    if headers.get("x-chat-key").and_then(|v| v.to_str().ok()) != Some(CHAT_KEY) {
        state.bad_keys.fetch_add(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let reply = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| serde_json::json!({ "type": 1, "spokenResponse": "Okay." }));
    Json(reply).into_response()
}

async fn chat(State(state): State<Arc<BackendState>>, headers: HeaderMap, body: String) -> Response {
    state.chats.lock().unwrap().push(body);
    next_reply(&state, &headers)
}

async fn supply(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.supplies.lock().unwrap().push((id, body));
    next_reply(&state, &headers)
}

async fn synth(State(state): State<Arc<BackendState>>, _text: String) -> Response {
    state.synth_requests.fetch_add(1, Ordering::SeqCst);
    let audio = wav_bytes(1600);

    if !state.slow_synthesis.load(Ordering::SeqCst) {
        return ([("content-type", "audio/mpeg")], audio).into_response();
    }

    // Dribble the body out so a player can be stopped mid-stream
    let chunks: Vec<Bytes> = audio.chunks(256).map(Bytes::copy_from_slice).collect();
    let stream = futures::stream::unfold(chunks.into_iter(), |mut chunks| async move {
        let chunk = chunks.next()?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, std::io::Error>(chunk), chunks))
    });
    Response::new(Body::from_stream(stream))
}

async fn translate(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    let q = body["q"].as_str().unwrap_or_default();
    let target = body["target"].as_str().unwrap_or_default();
    Json(serde_json::json!({
        "data": { "translations": [ { "translatedText": format!("[{}] {}", target, q) } ] }
    }))
}

/// A short mono 16 kHz WAV of a quiet tone
pub fn wav_bytes(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(((i % 40) as i16 - 20) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

// ============================================================================
// Engine setup
// ============================================================================

/// Configuration with short timings, pointed at the mock backend
pub fn test_config(backend: &MockBackend) -> Config {
    let mut cfg = Config::default();
    cfg.dialogue.url = backend.url.clone();
    cfg.synthesis.url = format!("{}/synth", backend.url);
    cfg.synthesis.mode = PlaybackMode::Buffered;
    cfg.translation.url = format!("{}/translate", backend.url);
    cfg.call.loading_delay_ms = 10;
    cfg.call.cooldown_ms = 300;
    cfg.call.notice_delay_ms = 50;
    cfg.call.typewriter_interval_ms = 5;
    cfg.audio.chunk_ms = 20;
    cfg.recognition.preload_timeout_ms = 500;
    cfg
}

pub struct Harness {
    pub call: CallHandle,
    pub recognizer: MockRecognizer,
    pub backend: MockBackend,
}

impl Harness {
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with<F>(configure: F) -> Result<Self>
    where
        F: FnOnce(&mut Config),
    {
        let backend = MockBackend::start().await?;
        Self::start_on(backend, configure).await
    }

    pub async fn start_on<F>(backend: MockBackend, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = test_config(&backend);
        configure(&mut config);

        let recognizer = MockRecognizer::new();
        let call = CallMachine::spawn(CallDeps {
            config,
            connector: Arc::new(recognizer.clone()),
            capture: AudioSource::Silence,
            outputs: Arc::new(NullOutputFactory::instant()),
        })?;

        Ok(Self {
            call,
            recognizer,
            backend,
        })
    }

    /// Dial once ready and wait until the greeting has played and a session is listening
    pub async fn connect_and_listen(&self) -> Result<()> {
        self.call
            .wait_for(Duration::from_secs(2), |v| v.state.can_dial())
            .await?;
        self.call.dial().await?;
        self.wait_listening().await
    }

    pub async fn wait_listening(&self) -> Result<()> {
        self.call.wait_for(Duration::from_secs(3), |v| v.listening).await?;
        Ok(())
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
