use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::decode::decode_into;
use super::output::AudioOutput;
use super::resample::{append_downmixed, expand_channels, f32_to_i16, i16_to_f32, resample};

/// A fully decoded audio file (WAV, M4A, MP3, ...)
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

/// Gathers decoded packets in memory
#[derive(Default)]
struct Collector {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput for Collector {
    fn write(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        if self.sample_rate == 0 {
            self.sample_rate = sample_rate;
            self.channels = channels;
        } else if self.sample_rate != sample_rate || self.channels != channels {
            bail!("Audio format changed mid-stream");
        }
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn drain(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "m4a" || ext == "mp4" => "audio/mp4",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "flac" => "audio/flac",
        Some(ext) if ext == "ogg" => "audio/ogg",
        _ => "",
    }
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut collector = Collector::default();
        decode_into(Box::new(file), mime_for(path), &mut collector, &CancellationToken::new())
            .with_context(|| format!("Failed to decode {}", path.display()))?;

        if collector.samples.is_empty() {
            bail!("{} contains no audio", path.display());
        }

        let duration_seconds =
            collector.samples.len() as f64 / (collector.sample_rate as f64 * collector.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            collector.sample_rate,
            collector.channels,
            collector.samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: collector.sample_rate,
            channels: collector.channels,
            samples: collector.samples,
        })
    }

    /// Convert to the capture format: downmix to mono, resample, then widen to
    /// `target_channels` if more than one is wanted
    pub fn to_format(&self, target_rate: u32, target_channels: u16) -> Result<Vec<i16>> {
        if self.channels == target_channels && self.sample_rate == target_rate {
            return Ok(self.samples.clone());
        }

        let mut mono = Vec::with_capacity(self.samples.len() / self.channels.max(1) as usize);
        append_downmixed(&mut mono, &self.samples, self.channels as usize, i16_to_f32);

        let resampled = resample(&mono, self.sample_rate, target_rate)
            .with_context(|| format!("Cannot resample {}Hz to {}Hz", self.sample_rate, target_rate))?;
        let pcm: Vec<i16> = resampled.into_iter().map(f32_to_i16).collect();

        Ok(expand_channels(&pcm, target_channels))
    }
}

/// Replays an audio file as if it were a live input, one frame per `buffer_duration_ms`
pub struct FileBackend {
    config: AudioBackendConfig,
    path: String,
    samples: Arc<Vec<i16>>,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: &str, config: AudioBackendConfig) -> Result<Self> {
        let audio = AudioFile::open(path)?;
        let samples = audio.to_format(config.target_sample_rate, config.target_channels)?;

        Ok(Self {
            config,
            path: audio.path,
            samples: Arc::new(samples),
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        info!("Replaying {} as audio input", self.path);

        let (tx, rx) = mpsc::channel(32);
        let samples = Arc::clone(&self.samples);
        let capturing = Arc::clone(&self.capturing);
        let config = self.config.clone();
        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let frame_len = config.samples_per_frame().max(1);
            let mut ticker = tokio::time::interval(Duration::from_millis(config.buffer_duration_ms));
            let mut timestamp_ms = 0;

            for chunk in samples.chunks(frame_len) {
                ticker.tick().await;
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: config.target_sample_rate,
                    channels: config.target_channels,
                    timestamp_ms,
                };
                timestamp_ms += config.buffer_duration_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("File replay finished");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        info!("File replay stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "audio file"
    }
}
