use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dialpad::DialPad;
use super::state::CallState;
use super::typewriter::Typewriter;
use super::view::CallView;
use crate::audio::{output_factory, AudioBackendConfig, AudioBackendFactory, AudioSource, OutputFactory};
use crate::config::Config;
use crate::dialogue::{BridgeReply, DialogueBridge, DialogueTurn};
use crate::error::{CallError, CallResult};
use crate::playback::{PlaybackOutcome, SpeechPlayer, SynthesisClient};
use crate::recording::{Recorder, RecorderEvent, RecordingSession};
use crate::transport::{connector_for, TransportConnector};

pub const NOTICE_DISCONNECTED: &str = "Speech service disconnected abruptly";
pub const NOTICE_SPEECH_FAILED: &str = "Speech service failed";
pub const NOTICE_DIALOGUE_UNAVAILABLE: &str = "Dialogue service unavailable";
pub const NOTICE_TURN_FAILED: &str = "Dialogue turn failed";

/// Caller commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Dial,
    HangUp,
    Key(char),
    Backspace,
}

/// What the engine is built from
pub struct CallDeps {
    pub config: Config,
    pub connector: Arc<dyn TransportConnector>,
    pub capture: AudioSource,
    pub outputs: Arc<dyn OutputFactory>,
}

impl CallDeps {
    /// Wire up the transport, capture source and output named in the configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let connector = connector_for(&config);
        let capture = AudioSource::parse(&config.audio.input);
        let outputs: Arc<dyn OutputFactory> = Arc::from(output_factory(&config.playback)?);

        Ok(Self {
            config,
            connector,
            capture,
            outputs,
        })
    }
}

/// Cloneable handle to a running call engine
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<CallView>,
    bridge: Arc<Mutex<Option<DialogueBridge>>>,
}

impl CallHandle {
    pub async fn dial(&self) -> Result<()> {
        self.send(Command::Dial).await
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.send(Command::HangUp).await
    }

    pub async fn press_key(&self, key: char) -> Result<()> {
        self.send(Command::Key(key)).await
    }

    pub async fn backspace(&self) -> Result<()> {
        self.send(Command::Backspace).await
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    /// Wait until the view satisfies `predicate`, up to `timeout`
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Result<CallView>
    where
        F: FnMut(&CallView) -> bool,
    {
        let mut view = self.view.clone();
        let snapshot = tokio::time::timeout(timeout, view.wait_for(predicate))
            .await
            .context("Timed out waiting for call view")?
            .context("Call engine stopped")?;
        Ok(snapshot.clone())
    }

    /// Dialogue transcript of the current or most recent call
    pub fn transcript(&self) -> Vec<DialogueTurn> {
        match self.bridge.lock() {
            Ok(bridge) => bridge.as_ref().map(|b| b.transcript()).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Call engine stopped"))
    }
}

/// What happens once a reply finishes playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterPlayback {
    Listen,
    Wait,
    EndCall,
}

/// Events from tasks the machine spawned. Everything call-scoped carries the
/// generation it was started under; stale generations are dropped.
enum Internal {
    Loaded,
    Tick {
        generation: u64,
        elapsed_secs: u64,
    },
    Registered {
        generation: u64,
        ok: bool,
    },
    PlaybackDone {
        generation: u64,
        /// None when nothing was played
        player_id: Option<u64>,
        outcome: PlaybackOutcome,
        after: AfterPlayback,
    },
    RecorderReady {
        generation: u64,
        recorder: Recorder,
        session: RecordingSession,
    },
    RecorderFailed {
        generation: u64,
        error: String,
        /// The connection dropped during the handshake
        disconnected: bool,
    },
    Recorder {
        generation: u64,
        session_id: u64,
        event: RecorderEvent,
    },
    Reply {
        generation: u64,
        result: CallResult<BridgeReply>,
    },
    Notice {
        generation: u64,
        text: String,
    },
    CooldownElapsed {
        generation: u64,
    },
}

struct ActiveRecorder {
    recorder: Recorder,
    session_id: u64,
}

/// The call state machine. Runs as a single task that owns all call state.
pub struct CallMachine {
    config: Config,
    connector: Arc<dyn TransportConnector>,
    capture: AudioSource,
    outputs: Arc<dyn OutputFactory>,
    synthesis: SynthesisClient,

    state: CallState,
    generation: u64,
    view: Arc<watch::Sender<CallView>>,
    internal_tx: mpsc::Sender<Internal>,
    phase: CancellationToken,

    bridge: Option<DialogueBridge>,
    shared_bridge: Arc<Mutex<Option<DialogueBridge>>>,
    recorder: Option<ActiveRecorder>,
    recorder_pending: bool,
    player: Option<Arc<SpeechPlayer>>,
    typewriter: Typewriter,
    dial_pad: DialPad,

    recoveries: u32,
    duration_limited: bool,
}

impl CallMachine {
    /// Start the engine from configuration
    pub fn spawn_from_config(config: Config) -> Result<CallHandle> {
        Self::spawn(CallDeps::from_config(config)?)
    }

    /// Start the engine. It becomes Ready after the loading delay.
    pub fn spawn(deps: CallDeps) -> Result<CallHandle> {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::channel(64);
        let (view_tx, view_rx) = watch::channel(CallView::default());
        let shared_bridge = Arc::new(Mutex::new(None));

        let machine = CallMachine {
            synthesis: SynthesisClient::new(&deps.config.synthesis),
            typewriter: Typewriter::new(Duration::from_millis(deps.config.call.typewriter_interval_ms)),
            dial_pad: DialPad::new()?,
            config: deps.config,
            connector: deps.connector,
            capture: deps.capture,
            outputs: deps.outputs,
            state: CallState::NotReady,
            generation: 0,
            view: Arc::new(view_tx),
            internal_tx,
            phase: CancellationToken::new(),
            bridge: None,
            shared_bridge: Arc::clone(&shared_bridge),
            recorder: None,
            recorder_pending: false,
            player: None,
            recoveries: 0,
            duration_limited: false,
        };

        let loading_delay = Duration::from_millis(machine.config.call.loading_delay_ms);
        let loaded_tx = machine.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(loading_delay).await;
            let _ = loaded_tx.send(Internal::Loaded).await;
        });

        tokio::spawn(machine.run(command_rx, internal_rx));

        Ok(CallHandle {
            commands: command_tx,
            view: view_rx,
            bridge: shared_bridge,
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut internal: mpsc::Receiver<Internal>) {
        info!("Call engine started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
            }
        }

        self.end_call(None).await;
        self.phase.cancel();
        info!("Call engine stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: Command) {
        debug!("Command {:?} in {}", command, self.state);

        match command {
            Command::Dial => self.dial(),
            Command::HangUp => {
                if self.state == CallState::Connected {
                    info!("Caller hung up");
                    self.end_call(None).await;
                } else {
                    warn!("Hang up ignored in {}", self.state);
                }
            }
            Command::Key(key) => {
                if self.state != CallState::Connected {
                    warn!("Key {:?} ignored in {}", key, self.state);
                    return;
                }
                let completed = self.dial_pad.press(key);
                self.publish_dial_pad();
                if let Some(digits) = completed {
                    self.supply_digits(digits);
                }
            }
            Command::Backspace => {
                if self.state != CallState::Connected {
                    return;
                }
                let completed = self.dial_pad.backspace();
                self.publish_dial_pad();
                if let Some(digits) = completed {
                    self.supply_digits(digits);
                }
            }
        }
    }

    fn dial(&mut self) {
        match self.state {
            CallState::Ready => {}
            CallState::Ended => {
                // Passes through Ready; the pending cooldown goes stale
                self.generation += 1;
                self.set_state(CallState::Ready);
            }
            state => {
                warn!("Dial ignored in {}", state);
                return;
            }
        }

        self.connect();
    }

    fn connect(&mut self) {
        self.generation += 1;
        self.phase = CancellationToken::new();
        self.recoveries = 0;
        self.duration_limited = false;
        self.recorder_pending = false;
        self.dial_pad.reset();

        info!("Call connected (generation {})", self.generation);
        self.view.send_modify(|v| {
            v.state = CallState::Connected;
            v.duration_secs = 0;
            v.transcript.clear();
            v.transcript_final = true;
            v.dial_pad_visible = true;
            v.dial_pad.clear();
            v.awaiting_input = false;
            v.listening = false;
            v.speaking = false;
            v.notice = None;
            v.call_started_at = Some(Utc::now());
            v.sessions_created = 0;
            v.recorder = None;
        });
        self.state = CallState::Connected;

        self.spawn_ticker();

        let bridge = DialogueBridge::new(&self.config.dialogue, &self.config.call.greeting);
        self.bridge = Some(bridge.clone());
        if let Ok(mut shared) = self.shared_bridge.lock() {
            *shared = Some(bridge.clone());
        }

        let generation = self.generation;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let ok = bridge.register().await;
            let _ = tx.send(Internal::Registered { generation, ok }).await;
        });
    }

    fn spawn_ticker(&self) {
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        let cancel = self.phase.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(started + period, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let elapsed_secs = started.elapsed().as_secs();
                        if tx.send(Internal::Tick { generation, elapsed_secs }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn supply_digits(&mut self, digits: String) {
        let Some(bridge) = self.bridge.clone() else {
            return;
        };

        info!("Dial-pad input complete");
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = bridge.supply_input(&digits).await;
            let _ = tx.send(Internal::Reply { generation, result }).await;
        });
    }

    // ========================================================================
    // Internal events
    // ========================================================================

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Loaded => {
                if self.state == CallState::NotReady {
                    self.set_state(CallState::Ready);
                    info!("Call engine ready");
                }
            }

            Internal::Tick { generation, elapsed_secs } => {
                if !self.is_live(generation) {
                    return;
                }
                let stats = self.recorder.as_ref().map(|r| r.recorder.stats());
                self.view.send_modify(|v| {
                    v.duration_secs = elapsed_secs;
                    if stats.is_some() {
                        v.recorder = stats;
                    }
                });

                let limit = self.config.call.max_duration_secs;
                if elapsed_secs >= limit && !self.duration_limited {
                    self.duration_limited = true;
                    warn!("Call reached the {}s limit", limit);
                    self.end_call(Some(duration_notice(limit))).await;
                }
            }

            Internal::Registered { generation, ok } => {
                if !self.is_live(generation) {
                    return;
                }
                if !ok {
                    error!("Dialogue registration failed; the call cannot proceed");
                    self.show_notice(NOTICE_DIALOGUE_UNAVAILABLE);
                    return;
                }
                if let Some(bridge) = &self.bridge {
                    let greeting = bridge.start();
                    self.speak(&greeting.content, AfterPlayback::Listen);
                }
            }

            Internal::PlaybackDone {
                generation,
                player_id,
                outcome,
                after,
            } => {
                if !self.is_live(generation) {
                    return;
                }
                let current = self.player.as_ref().map(|p| p.id());
                if current != player_id {
                    debug!("Ignoring completion of superseded player {:?}", player_id);
                    return;
                }
                self.player = None;
                self.view.send_modify(|v| v.speaking = false);

                if outcome == PlaybackOutcome::Stopped {
                    return;
                }
                self.after_playback(after).await;
            }

            Internal::RecorderReady {
                generation,
                recorder,
                session,
            } => {
                if !self.is_live(generation) || !self.recorder_pending {
                    debug!("Discarding recorder for a finished turn");
                    dispose(recorder).await;
                    return;
                }
                self.recorder_pending = false;

                let stats = recorder.stats();
                self.recorder = Some(ActiveRecorder {
                    recorder,
                    session_id: session.id,
                });
                self.view.send_modify(|v| {
                    v.listening = stats.is_listening;
                    v.sessions_created += 1;
                    v.recorder = Some(stats);
                });
            }

            Internal::RecorderFailed {
                generation,
                error,
                disconnected,
            } => {
                if !self.is_live(generation) {
                    return;
                }
                self.recorder_pending = false;
                error!("Could not start listening: {}", error);
                if disconnected {
                    self.end_call(Some(NOTICE_DISCONNECTED.to_string())).await;
                } else {
                    self.recover_or_end().await;
                }
            }

            Internal::Recorder {
                generation,
                session_id,
                event,
            } => {
                let current = self.recorder.as_ref().map(|r| r.session_id);
                if !self.is_live(generation) || current != Some(session_id) {
                    debug!("Ignoring event from retired session {}", session_id);
                    return;
                }
                self.handle_recorder_event(event).await;
            }

            Internal::Reply { generation, result } => {
                if !self.is_live(generation) {
                    return;
                }
                self.handle_reply(result);
            }

            Internal::Notice { generation, text } => {
                if generation == self.generation {
                    self.show_notice(&text);
                }
            }

            Internal::CooldownElapsed { generation } => {
                if generation == self.generation && self.state == CallState::Ended {
                    self.view.send_modify(|v| {
                        v.duration_secs = 0;
                        v.call_started_at = None;
                    });
                    self.set_state(CallState::Ready);
                    info!("Cooldown over, ready for the next call");
                }
            }
        }
    }

    async fn handle_recorder_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Interim { text } => {
                self.typewriter.invalidate();
                self.view.send_modify(|v| {
                    v.transcript = text;
                    v.transcript_final = false;
                });
            }

            RecorderEvent::Final {
                text,
                duration_secs,
                preserve,
            } => {
                info!("Final transcript after {:.1}s: {:?}", duration_secs, text);
                self.recoveries = 0;
                self.typewriter.invalidate();
                self.view.send_modify(|v| {
                    v.transcript = text.clone();
                    v.transcript_final = true;
                    v.listening = false;
                });

                // This session is done; the recorder goes with it
                let _ = preserve.send(false);
                self.dispose_recorder().await;

                let Some(bridge) = self.bridge.clone() else {
                    return;
                };
                let generation = self.generation;
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = bridge.chat(&text).await;
                    let _ = tx.send(Internal::Reply { generation, result }).await;
                });
            }

            RecorderEvent::TranscriptionFailed => {
                warn!("Transcription failed");
                self.view.send_modify(|v| v.listening = false);
                self.dispose_recorder().await;
                self.recover_or_end().await;
            }

            RecorderEvent::Quit { reason } => {
                warn!("Recognition service quit: {}", reason);
                self.end_call(Some(NOTICE_DISCONNECTED.to_string())).await;
            }
        }
    }

    fn handle_reply(&mut self, result: CallResult<BridgeReply>) {
        let reply = match result {
            Ok(reply) => reply,
            Err(CallError::NotRegistered) => {
                warn!("Dialogue bridge not registered; turn dropped");
                self.show_notice(NOTICE_DIALOGUE_UNAVAILABLE);
                return;
            }
            Err(e) => {
                error!("Dialogue turn aborted: {}", e);
                self.show_notice(NOTICE_TURN_FAILED);
                return;
            }
        };

        info!(
            "Reply (dial_pad_next={}, end_call={}): {:?}",
            reply.dial_pad_next, reply.end_call, reply.content
        );

        let after = if reply.end_call {
            AfterPlayback::EndCall
        } else if reply.dial_pad_next {
            self.dial_pad.begin_capture();
            self.publish_dial_pad();
            AfterPlayback::Wait
        } else {
            AfterPlayback::Listen
        };

        self.speak(&reply.content, after);
    }

    async fn after_playback(&mut self, after: AfterPlayback) {
        match after {
            AfterPlayback::Listen => {
                if !self.config.call.listen_during_playback {
                    self.start_listening();
                }
            }
            AfterPlayback::Wait => {}
            AfterPlayback::EndCall => {
                info!("Closing reply played, ending call");
                self.end_call(None).await;
            }
        }
    }

    async fn recover_or_end(&mut self) {
        if self.recoveries < self.config.call.max_recoveries {
            self.recoveries += 1;
            info!(
                "Recreating recording session (attempt {}/{})",
                self.recoveries, self.config.call.max_recoveries
            );
            self.start_listening();
        } else {
            self.end_call(Some(NOTICE_SPEECH_FAILED.to_string())).await;
        }
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Reveal and speak `text`, replacing any reply still playing
    fn speak(&mut self, text: &str, after: AfterPlayback) {
        if let Some(previous) = self.player.take() {
            previous.stop();
        }

        self.view.send_modify(|v| {
            v.transcript.clear();
            v.transcript_final = true;
        });
        let view = Arc::clone(&self.view);
        self.typewriter
            .reveal(text, self.phase.clone(), move |shown| view.send_modify(|v| v.transcript = shown));

        if after == AfterPlayback::Listen && self.config.call.listen_during_playback {
            self.start_listening();
        }

        let generation = self.generation;
        let tx = self.internal_tx.clone();

        let player = match SpeechPlayer::new(
            text,
            self.synthesis.clone(),
            Arc::clone(&self.outputs),
            self.config.synthesis.mode,
        ) {
            Ok(player) => Arc::new(player),
            Err(e) => {
                warn!("Reply not spoken: {}", e);
                tokio::spawn(async move {
                    let _ = tx
                        .send(Internal::PlaybackDone {
                            generation,
                            player_id: None,
                            outcome: PlaybackOutcome::Failed,
                            after,
                        })
                        .await;
                });
                return;
            }
        };

        self.player = Some(Arc::clone(&player));
        self.view.send_modify(|v| v.speaking = true);

        tokio::spawn(async move {
            let outcome = player.play().await;
            let _ = tx
                .send(Internal::PlaybackDone {
                    generation,
                    player_id: Some(player.id()),
                    outcome,
                    after,
                })
                .await;
        });
    }

    // ========================================================================
    // Recording
    // ========================================================================

    fn start_listening(&mut self) {
        if self.recorder_pending {
            warn!("Recording session already being created");
            return;
        }
        self.recorder_pending = true;

        let previous = self.recorder.take();
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        let connector = Arc::clone(&self.connector);
        let capture = self.capture.clone();
        let backend_config = AudioBackendConfig {
            target_sample_rate: self.config.audio.sample_rate,
            target_channels: self.config.audio.channels,
            buffer_duration_ms: self.config.audio.chunk_ms,
        };
        let preload_timeout = Duration::from_millis(self.config.recognition.preload_timeout_ms);
        let cancel = self.phase.clone();

        tokio::spawn(async move {
            if let Some(previous) = previous {
                dispose(previous.recorder).await;
            }

            let opened = open_recorder(connector.as_ref(), &capture, backend_config, preload_timeout, &cancel).await;
            let (recorder, session, mut events) = match opened {
                Ok(Some(opened)) => opened,
                Ok(None) => {
                    debug!("Call ended while the recording session was being created");
                    return;
                }
                Err(e) => {
                    let disconnected = matches!(e.downcast_ref::<CallError>(), Some(CallError::TransportClosed(_)));
                    let _ = tx
                        .send(Internal::RecorderFailed {
                            generation,
                            error: format!("{:#}", e),
                            disconnected,
                        })
                        .await;
                    return;
                }
            };

            let session_id = session.id;
            if tx
                .send(Internal::RecorderReady {
                    generation,
                    recorder,
                    session,
                })
                .await
                .is_err()
            {
                return;
            }

            // Forward this session's events, tagged so the machine can drop them once it is retired
            while let Some(event) = events.recv().await {
                let tagged = Internal::Recorder {
                    generation,
                    session_id,
                    event,
                };
                if tx.send(tagged).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn dispose_recorder(&mut self) {
        let stats = match self.recorder.take() {
            Some(active) => {
                dispose(active.recorder.clone()).await;
                Some(active.recorder.stats())
            }
            None => None,
        };
        self.view.send_modify(|v| {
            v.listening = false;
            if stats.is_some() {
                v.recorder = stats;
            }
        });
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Leave Connected. Runs at most once per call.
    async fn end_call(&mut self, notice: Option<String>) {
        if self.state != CallState::Connected {
            return;
        }
        info!("Ending call (generation {})", self.generation);

        // Order: recording, capture, playback, typewriter
        self.recorder_pending = false;
        self.dispose_recorder().await;
        if let Some(player) = self.player.take() {
            player.stop();
        }
        self.typewriter.invalidate();
        self.phase.cancel();

        self.dial_pad.reset();
        self.generation += 1;
        self.state = CallState::Ended;
        self.view.send_modify(|v| {
            v.state = CallState::Ended;
            v.transcript.clear();
            v.transcript_final = true;
            v.dial_pad_visible = false;
            v.dial_pad.clear();
            v.awaiting_input = false;
            v.listening = false;
            v.speaking = false;
        });

        let generation = self.generation;
        if let Some(text) = notice {
            let delay = Duration::from_millis(self.config.call.notice_delay_ms);
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Internal::Notice { generation, text }).await;
            });
        }

        let cooldown = Duration::from_millis(self.config.call.cooldown_ms);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let _ = tx.send(Internal::CooldownElapsed { generation }).await;
        });
    }

    // ========================================================================
    // View helpers
    // ========================================================================

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation && self.state == CallState::Connected
    }

    fn set_state(&mut self, state: CallState) {
        self.state = state;
        self.view.send_modify(|v| v.state = state);
    }

    fn show_notice(&self, text: &str) {
        info!("Notice: {}", text);
        self.view.send_modify(|v| {
            v.transcript = text.to_string();
            v.transcript_final = true;
            v.notice = Some(text.to_string());
        });
    }

    fn publish_dial_pad(&self) {
        let content = self.dial_pad.content().to_string();
        let armed = self.dial_pad.is_armed();
        self.view.send_modify(|v| {
            v.dial_pad = content;
            v.awaiting_input = armed;
        });
    }
}

/// Connect, preload and start capturing. Returns `None` without starting
/// capture if `cancel` fires first.
async fn open_recorder(
    connector: &dyn TransportConnector,
    capture: &AudioSource,
    backend_config: AudioBackendConfig,
    preload_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<(Recorder, RecordingSession, mpsc::Receiver<RecorderEvent>)>> {
    let backend = AudioBackendFactory::create(capture, backend_config).context("Failed to acquire capture source")?;
    let (recorder, events) = Recorder::connect(connector, backend, preload_timeout).await?;

    let created = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        created = recorder.create_session() => Some(created),
    };
    let session = match created {
        Some(Ok(session)) => session,
        Some(Err(e)) => {
            recorder.cleanup().await;
            return Err(e);
        }
        None => {
            recorder.cleanup().await;
            return Ok(None);
        }
    };

    if cancel.is_cancelled() {
        recorder.cleanup().await;
        return Ok(None);
    }

    if let Err(e) = recorder.start_recording().await {
        recorder.cleanup().await;
        return Err(e);
    }
    if cancel.is_cancelled() {
        dispose(recorder).await;
        return Ok(None);
    }

    Ok(Some((recorder, session, events)))
}

/// Stop recording, then release capture and transport
async fn dispose(recorder: Recorder) {
    if recorder.is_recording() {
        recorder.stop_recording().await;
    }
    recorder.cleanup().await;
}

fn duration_notice(limit_secs: u64) -> String {
    if limit_secs % 60 == 0 {
        format!("Call duration limited to {} minutes", limit_secs / 60)
    } else {
        format!("Call duration limited to {} seconds", limit_secs)
    }
}
