// Microphone capture through cpal
//
// cpal streams are not Send, so each capture owns a dedicated thread that builds
// the stream, keeps it alive, and drops it when asked to stop. The device is
// opened in its native format; samples are downmixed and resampled to the
// capture format inside the callback.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::resample::{append_downmixed, f32_to_i16, i16_to_f32, StreamResampler};

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    device_name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    /// Acquire the default input device
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!("Microphone acquired: {}", device_name);

        Ok(Self {
            config,
            device_name,
            stop_tx: None,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let stream = match build_stream(&config, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Park until stop() or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn microphone thread")?;

        ready_rx
            .recv()
            .context("Microphone thread exited before starting")??;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        info!("Microphone capture started on {}", self.device_name);

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            tokio::task::spawn_blocking(move || {
                if handle.join().is_err() {
                    warn!("Microphone thread panicked");
                }
            })
            .await?;
            info!("Microphone released");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Turns device-rate f32 mono into fixed-length i16 frames at the target format
struct FrameAssembler {
    resampler: StreamResampler,
    frame_len: usize,
    channels: u16,
    sample_rate: u32,
    frame_ms: u64,
    timestamp_ms: u64,
    pending: Vec<i16>,
    frame_tx: mpsc::Sender<AudioFrame>,
}

impl FrameAssembler {
    fn push(&mut self, mono: &[f32]) {
        let resampled = match self.resampler.push(mono) {
            Ok(resampled) => resampled,
            Err(e) => {
                warn!("Dropping microphone samples: {}", e);
                return;
            }
        };

        for sample in resampled {
            let sample = f32_to_i16(sample);
            for _ in 0..self.channels {
                self.pending.push(sample);
            }

            if self.pending.len() >= self.frame_len {
                let frame = AudioFrame {
                    samples: std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len)),
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp_ms: self.timestamp_ms,
                };
                self.timestamp_ms += self.frame_ms;

                if let Err(e) = self.frame_tx.try_send(frame) {
                    warn!("Dropping microphone frame: {}", e);
                }
            }
        }
    }
}

fn build_stream(config: &AudioBackendConfig, frame_tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    // Open the device in its native format and convert on our side
    let default_config = device
        .default_input_config()
        .context("Failed to query default input config")?;
    let format = default_config.sample_format();
    let stream_config: cpal::StreamConfig = default_config.into();
    let device_rate = stream_config.sample_rate.0;
    let device_channels = usize::from(stream_config.channels.max(1));

    info!(
        "Microphone native format: {:?} {}Hz {} channels (target {}Hz)",
        format, device_rate, device_channels, config.target_sample_rate
    );

    let assembler = Arc::new(Mutex::new(FrameAssembler {
        resampler: StreamResampler::new(device_rate, config.target_sample_rate)?,
        frame_len: config.samples_per_frame().max(1),
        channels: config.target_channels.max(1),
        sample_rate: config.target_sample_rate,
        frame_ms: config.buffer_duration_ms,
        timestamp_ms: 0,
        pending: Vec::with_capacity(config.samples_per_frame().max(1)),
        frame_tx,
    }));

    let err_fn = |err| warn!("Microphone stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => {
            let assembler = Arc::clone(&assembler);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    feed(&assembler, data, device_channels, |s| s);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let assembler = Arc::clone(&assembler);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    feed(&assembler, data, device_channels, i16_to_f32);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::U16 => {
            let assembler = Arc::clone(&assembler);
            device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    feed(&assembler, data, device_channels, |s| (s as f32 - 32_768.0) / 32_768.0);
                },
                err_fn,
                None,
            )?
        }
        other => bail!("Unsupported microphone sample format: {:?}", other),
    };

    stream.play()?;
    Ok(stream)
}

fn feed<T, F>(assembler: &Mutex<FrameAssembler>, data: &[T], channels: usize, convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    let mut mono = Vec::with_capacity(data.len() / channels.max(1) + 1);
    append_downmixed(&mut mono, data, channels, convert);

    if let Ok(mut assembler) = assembler.lock() {
        assembler.push(&mono);
    }
}
