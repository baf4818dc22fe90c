use anyhow::Result;
use futures::StreamExt;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use symphonia::core::io::{MediaSource, ReadOnlySource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::media::MediaBuffer;
use super::synthesis::SynthesisClient;
use crate::audio::{decode_into, DecodeStats, OutputFactory};
use crate::config::PlaybackMode;
use crate::error::{guard_text, CallResult};

const MIME_TYPE: &str = "audio/mpeg";

static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

/// How a `play()` call resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio played to the end
    Finished,
    /// Request or decode failed; nothing more will play
    Failed,
    /// `stop()` was called
    Stopped,
}

/// Speaks one reply. At most one should be producing audio per call.
pub struct SpeechPlayer {
    id: u64,
    text: String,
    synthesis: SynthesisClient,
    outputs: Arc<dyn OutputFactory>,
    streaming: bool,
    cancel: CancellationToken,
    started: AtomicBool,
    media: Mutex<Option<Arc<MediaBuffer>>>,
    appended: Arc<AtomicUsize>,
}

impl SpeechPlayer {
    /// Rejects text at or above the synthesis length limit before any request is made
    pub fn new(
        text: &str,
        synthesis: SynthesisClient,
        outputs: Arc<dyn OutputFactory>,
        mode: PlaybackMode,
    ) -> CallResult<Self> {
        guard_text(text)?;

        let streaming = match mode {
            PlaybackMode::Streaming => true,
            PlaybackMode::Buffered => false,
            PlaybackMode::Auto => outputs.supports_streaming(),
        };

        Ok(Self {
            id: NEXT_PLAYER_ID.fetch_add(1, Ordering::SeqCst),
            text: text.to_string(),
            synthesis,
            outputs,
            streaming,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            media: Mutex::new(None),
            appended: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Chunks accepted into the streaming media buffer so far
    pub fn appended_chunks(&self) -> usize {
        self.appended.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Halt output and release the media buffer. Safe to call any number of times.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping player {}", self.id);
        }
        self.release();
    }

    fn release(&self) {
        self.cancel.cancel();

        let media = match self.media.lock() {
            Ok(mut media) => media.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(media) = media {
            media.detach();
        }
    }

    /// Synthesize and play the text. Resolves once, with how playback ended.
    pub async fn play(&self) -> PlaybackOutcome {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Player {} already played", self.id);
            return PlaybackOutcome::Stopped;
        }
        if self.cancel.is_cancelled() {
            return PlaybackOutcome::Stopped;
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return PlaybackOutcome::Stopped,
            response = self.synthesis.request(&self.text) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!("Synthesis request failed: {}", e);
                return PlaybackOutcome::Failed;
            }
        };

        let result = if self.streaming {
            self.play_streaming(response).await
        } else {
            self.play_buffered(response).await
        };

        if self.cancel.is_cancelled() {
            return PlaybackOutcome::Stopped;
        }

        match result {
            Ok(Some(stats)) if !stats.cancelled => {
                debug!("Player {} finished ({} packets)", self.id, stats.packets);
                PlaybackOutcome::Finished
            }
            Ok(_) => PlaybackOutcome::Stopped,
            Err(e) => {
                warn!("Playback failed for player {}: {}", self.id, e);
                PlaybackOutcome::Failed
            }
        }
    }

    /// Feed the response body into a media buffer while the decoder drains it
    async fn play_streaming(&self, response: reqwest::Response) -> Result<Option<DecodeStats>> {
        let (media, reader) = MediaBuffer::open(Arc::clone(&self.appended));
        if let Ok(mut slot) = self.media.lock() {
            *slot = Some(Arc::clone(&media));
        }
        // A stop() racing the install above would have missed this buffer
        if self.cancel.is_cancelled() {
            media.detach();
            return Ok(None);
        }

        let source: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(reader));
        let decoder = self.spawn_decoder(source);

        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                chunk = body.next() => match chunk {
                    Some(Ok(chunk)) => {
                        if !media.append(chunk) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Synthesis stream interrupted: {}", e);
                        break;
                    }
                    None => break,
                },
            }
        }
        media.end_of_stream();

        decoder.await?.map(Some)
    }

    /// Collect the whole body, then decode it in one go
    async fn play_buffered(&self, response: reqwest::Response) -> Result<Option<DecodeStats>> {
        let mut audio = Vec::new();
        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                chunk = body.next() => match chunk {
                    Some(Ok(chunk)) => audio.extend_from_slice(&chunk),
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        debug!("Buffered {} bytes of synthesized audio", audio.len());
        let source: Box<dyn MediaSource> = Box::new(Cursor::new(audio));
        self.spawn_decoder(source).await?.map(Some)
    }

    fn spawn_decoder(&self, source: Box<dyn MediaSource>) -> tokio::task::JoinHandle<Result<DecodeStats>> {
        let outputs = Arc::clone(&self.outputs);
        let cancel = self.cancel.clone();
        let id = self.id;

        tokio::task::spawn_blocking(move || {
            let mut output = outputs.create(id)?;
            decode_into(source, MIME_TYPE, output.as_mut(), &cancel)
        })
    }
}

impl Drop for SpeechPlayer {
    fn drop(&mut self) {
        self.release();
    }
}
