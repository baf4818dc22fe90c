// Sample format conversion and rate conversion for capture sources
//
// Capture hardware and input files rarely match the recognizer's format, so
// everything is brought to f32 mono, resampled with a windowed sinc filter,
// and quantized back to i16.

use anyhow::{anyhow, bail, Result};
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::cmp::Ordering;

const MIN_RATE: u32 = 2_000;
const MAX_RATE: u32 = 384_000;

/// Input frames handed to the sinc resampler per call
pub const CHUNK_FRAMES: usize = 256;

/// Average interleaved frames into mono, appending to `buf`. A trailing partial
/// frame is averaged over the samples present.
pub fn append_downmixed<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        buf.push(sum / frame.len() as f32);
    }
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Repeat each mono sample across `channels`
pub fn expand_channels(mono: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return mono.to_vec();
    }
    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels as usize))
        .collect()
}

fn sinc_resampler(from_rate: u32, to_rate: u32) -> Result<SincFixedIn<f32>> {
    for rate in [from_rate, to_rate] {
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            bail!("Unsupported sample rate {}Hz for resampling", rate);
        }
    }

    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;

    SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, 1)
        .map_err(|e| anyhow!("Failed to construct sinc resampler: {e:?}"))
}

/// Incremental mono resampler for live capture. Input arrives in arbitrary
/// slices; output is produced one `CHUNK_FRAMES` block at a time.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Pass-through when the rates already match
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(sinc_resampler(from_rate, to_rate)?)
        };

        Ok(Self {
            inner,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed device-rate samples, returning whatever target-rate samples are ready
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut out = Vec::new();

        while self.pending.len() >= CHUNK_FRAMES {
            let block: Vec<f32> = self.pending.drain(..CHUNK_FRAMES).collect();
            let produced = resampler
                .process(std::slice::from_ref(&block), None)
                .map_err(|e| anyhow!("Resampler process failed: {e:?}"))?;
            out.extend_from_slice(&produced[0]);
        }

        Ok(out)
    }
}

/// Resample a whole mono buffer. The output length is `input.len() * to / from`,
/// rounded.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let mut resampler = sinc_resampler(from_rate, to_rate)?;
    let expect = ((input.len() as f64) * to_rate as f64 / from_rate as f64).round() as usize;
    let mut out = Vec::with_capacity(expect + CHUNK_FRAMES);

    let mut block = vec![0.0f32; CHUNK_FRAMES];
    for chunk in input.chunks(CHUNK_FRAMES) {
        // The last block is padded with its final sample
        let pad = chunk.last().copied().unwrap_or(0.0);
        block.fill(pad);
        block[..chunk.len()].copy_from_slice(chunk);

        let produced = resampler
            .process(std::slice::from_ref(&block), None)
            .map_err(|e| anyhow!("Resampler process failed: {e:?}"))?;
        out.extend_from_slice(&produced[0]);
    }

    match out.len().cmp(&expect) {
        Ordering::Greater => out.truncate(expect),
        Ordering::Less => {
            let pad = out.last().copied().unwrap_or(0.0);
            out.resize(expect, pad);
        }
        Ordering::Equal => {}
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn downmix_averages_frames() {
        let mut buf = Vec::new();
        append_downmixed(&mut buf, &[1.0f32, 3.0, -2.0, 2.0, 5.0], 2, |s| s);
        assert_eq!(buf, vec![2.0, 0.0, 5.0]);
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mut buf = Vec::new();
        append_downmixed(&mut buf, &[16_384i16, -16_384], 1, i16_to_f32);
        assert_eq!(buf, vec![0.5, -0.5]);
    }

    #[test]
    fn resample_44100_to_16000_keeps_duration() {
        let input = tone(440.0, 44_100, 44_100);
        let output = resample(&input, 44_100, 16_000).unwrap();
        assert_eq!(output.len(), 16_000);
        assert!(output.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn resample_upsamples() {
        let input = tone(200.0, 8_000, 800);
        let output = resample(&input, 8_000, 16_000).unwrap();
        assert_eq!(output.len(), 1_600);
    }

    #[test]
    fn resample_rejects_absurd_rates() {
        assert!(resample(&[0.0; 10], 100, 16_000).is_err());
    }

    #[test]
    fn stream_resampler_produces_target_rate() {
        let mut resampler = StreamResampler::new(48_000, 16_000).unwrap();
        assert!(!resampler.is_passthrough());

        let input = tone(300.0, 48_000, 48_000);
        let mut produced = 0;
        for slice in input.chunks(480) {
            produced += resampler.push(slice).unwrap().len();
        }

        // Up to one block stays buffered
        let expected = 16_000;
        assert!(produced <= expected);
        assert!(produced + CHUNK_FRAMES >= expected);
    }

    #[test]
    fn stream_resampler_passes_through_matching_rates() {
        let mut resampler = StreamResampler::new(16_000, 16_000).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.push(&[0.25, -0.25]).unwrap(), vec![0.25, -0.25]);
    }

    #[test]
    fn expands_mono_to_stereo() {
        assert_eq!(expand_channels(&[1, 2], 2), vec![1, 1, 2, 2]);
        assert_eq!(expand_channels(&[1, 2], 1), vec![1, 2]);
    }
}
