use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{OutputKind, PlaybackConfig};

/// Sink for decoded speech. Lives on the blocking decoder thread of one player.
pub trait AudioOutput {
    /// Queue decoded samples (i16 PCM, interleaved)
    fn write(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()>;

    /// Block until queued audio has played out, or `cancel` fires
    fn drain(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Drop anything still queued
    fn stop(&mut self);
}

/// Creates one output per player
pub trait OutputFactory: Send + Sync {
    fn create(&self, player_id: u64) -> Result<Box<dyn AudioOutput>>;

    /// Whether audio can start before the whole reply has been received
    fn supports_streaming(&self) -> bool;

    fn name(&self) -> &str;
}

/// Build the factory selected by `playback.output`
pub fn output_factory(config: &PlaybackConfig) -> Result<Box<dyn OutputFactory>> {
    match config.output {
        OutputKind::Null => Ok(Box::new(NullOutputFactory::realtime())),
        OutputKind::Wav => Ok(Box::new(WavOutputFactory::new(PathBuf::from(&config.wav_dir))?)),
        OutputKind::Device => {
            #[cfg(feature = "device-audio")]
            {
                Ok(Box::new(DeviceOutputFactory))
            }

            #[cfg(not(feature = "device-audio"))]
            {
                anyhow::bail!("Device playback requires the `device-audio` feature")
            }
        }
    }
}

// ============================================================================
// Null output
// ============================================================================

/// Discards audio. When paced, sleeps for the duration of each write so the
/// player finishes in roughly real time.
pub struct NullOutputFactory {
    paced: bool,
}

impl NullOutputFactory {
    pub fn realtime() -> Self {
        Self { paced: true }
    }

    pub fn instant() -> Self {
        Self { paced: false }
    }
}

impl OutputFactory for NullOutputFactory {
    fn create(&self, _player_id: u64) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(NullOutput { paced: self.paced }))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "null"
    }
}

struct NullOutput {
    paced: bool,
}

impl AudioOutput for NullOutput {
    fn write(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        if self.paced && sample_rate > 0 && channels > 0 {
            let frames = samples.len() as u64 / channels as u64;
            std::thread::sleep(Duration::from_micros(frames * 1_000_000 / sample_rate as u64));
        }
        Ok(())
    }

    fn drain(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

// ============================================================================
// WAV output
// ============================================================================

/// Writes each reply to `<dir>/reply-<player>.wav`
pub struct WavOutputFactory {
    output_dir: PathBuf,
}

impl WavOutputFactory {
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        // Create output directory if it doesn't exist
        fs::create_dir_all(&output_dir).context("Failed to create output directory")?;

        info!("Replies will be written to {}", output_dir.display());

        Ok(Self { output_dir })
    }
}

impl OutputFactory for WavOutputFactory {
    fn create(&self, player_id: u64) -> Result<Box<dyn AudioOutput>> {
        let file_path = self.output_dir.join(format!("reply-{:06}.wav", player_id));
        Ok(Box::new(WavOutput { file_path, writer: None }))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "wav"
    }
}

struct WavOutput {
    file_path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl AudioOutput for WavOutput {
    fn write(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        if self.writer.is_none() {
            let spec = hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let writer = hound::WavWriter::create(&self.file_path, spec)
                .with_context(|| format!("Failed to create WAV file: {:?}", self.file_path))?;
            self.writer = Some(writer);
        }

        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer.write_sample(sample).context("Failed to write sample to WAV")?;
            }
        }

        Ok(())
    }

    fn drain(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
            info!("Reply written to {}", self.file_path.display());
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on stop: {}", e);
            }
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Device output
// ============================================================================

#[cfg(feature = "device-audio")]
pub struct DeviceOutputFactory;

#[cfg(feature = "device-audio")]
impl OutputFactory for DeviceOutputFactory {
    fn create(&self, _player_id: u64) -> Result<Box<dyn AudioOutput>> {
        let (stream, handle) = rodio::OutputStream::try_default()
            .map_err(|e| anyhow::anyhow!("No output device: {}", e))?;
        let sink = rodio::Sink::try_new(&handle).map_err(|e| anyhow::anyhow!("Sink failed: {}", e))?;
        Ok(Box::new(DeviceOutput { _stream: stream, sink }))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "device"
    }
}

#[cfg(feature = "device-audio")]
struct DeviceOutput {
    _stream: rodio::OutputStream,
    sink: rodio::Sink,
}

#[cfg(feature = "device-audio")]
impl AudioOutput for DeviceOutput {
    fn write(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        self.sink
            .append(rodio::buffer::SamplesBuffer::new(channels, sample_rate, samples.to_vec()));
        Ok(())
    }

    fn drain(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !self.sink.empty() {
            if cancel.is_cancelled() {
                self.sink.stop();
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}
