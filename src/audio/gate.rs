//! Speech-band filtering and the moving-average energy gate
//!
//! Each captured chunk is band-limited to the speech range, its most recent
//! 2048-sample window is analysed into byte-scaled frequency magnitudes, and the
//! mean magnitude is folded into a 5-chunk moving average. The gate only reports
//! whether the average crosses the speech threshold; callers still transmit every
//! chunk.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::OnceLock;

pub const FFT_SIZE: usize = 2048;
pub const WINDOW_SIZE: usize = 5;
pub const SPEECH_THRESHOLD: f32 = 2.0;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Second-order IIR section (RBJ cookbook coefficients)
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn highpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos, alpha) = Self::omega(sample_rate, cutoff_hz);
        let a0 = 1.0 + alpha;
        Self::normalized(
            (1.0 + cos) / 2.0 / a0,
            -(1.0 + cos) / a0,
            (1.0 + cos) / 2.0 / a0,
            -2.0 * cos / a0,
            (1.0 - alpha) / a0,
        )
    }

    pub fn lowpass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let (cos, alpha) = Self::omega(sample_rate, cutoff_hz);
        let a0 = 1.0 + alpha;
        Self::normalized(
            (1.0 - cos) / 2.0 / a0,
            (1.0 - cos) / a0,
            (1.0 - cos) / 2.0 / a0,
            -2.0 * cos / a0,
            (1.0 - alpha) / a0,
        )
    }

    fn omega(sample_rate: u32, cutoff_hz: f32) -> (f32, f32) {
        let nyquist = sample_rate as f32 / 2.0;
        let cutoff = cutoff_hz.clamp(1.0, nyquist * 0.99);
        let w0 = 2.0 * PI * cutoff / sample_rate as f32;
        let q = std::f32::consts::FRAC_1_SQRT_2;
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a1: f32, a2: f32) -> Self {
        Self { b0, b1, b2, a1, a2, x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0 }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// 300 Hz – 3 kHz band-pass built from a high-pass and a low-pass section
#[derive(Debug, Clone)]
pub struct SpeechBandFilter {
    highpass: Biquad,
    lowpass: Biquad,
}

impl SpeechBandFilter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            highpass: Biquad::highpass(sample_rate, 300.0),
            lowpass: Biquad::lowpass(sample_rate, 3000.0),
        }
    }

    /// Filter PCM samples into normalized floats
    pub fn apply(&mut self, samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&s| {
                let x = s as f32 / i16::MAX as f32;
                self.lowpass.process(self.highpass.process(x))
            })
            .collect()
    }
}

/// Mean of the byte-scaled magnitude spectrum over the last `FFT_SIZE` samples.
///
/// Magnitudes are Blackman-windowed, converted to decibels and mapped from
/// [-100 dB, -30 dB] onto 0..=255, so silence scores 0.
pub fn spectral_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let start = samples.len().saturating_sub(FFT_SIZE);
    let window = &samples[start..];
    let n = FFT_SIZE;
    let bins = n / 2;

    let windowed: Vec<f32> = (0..n)
        .map(|i| {
            let x = window.get(i).copied().unwrap_or(0.0);
            let a = 2.0 * PI * i as f32 / (n - 1) as f32;
            let w = 0.42 - 0.5 * a.cos() + 0.08 * (2.0 * a).cos();
            x * w
        })
        .collect();

    let twiddles = twiddles();
    let mut total = 0.0;
    for k in 0..bins {
        let (mut re, mut im) = (0.0f32, 0.0f32);
        for (i, &x) in windowed.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            let (cos, sin) = twiddles[(k * i) % n];
            re += x * cos;
            im -= x * sin;
        }
        let magnitude = (re * re + im * im).sqrt() / n as f32;
        total += byte_scale(magnitude);
    }

    total / bins as f32
}

fn twiddles() -> &'static [(f32, f32)] {
    static TABLE: OnceLock<Vec<(f32, f32)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..FFT_SIZE)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / FFT_SIZE as f32;
                (phase.cos(), phase.sin())
            })
            .collect()
    })
}

fn byte_scale(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0).floor()
}

/// Result of feeding one chunk through the gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateReading {
    pub energy: f32,
    pub moving_average: f32,
    pub speech: bool,
}

/// Moving-average energy gate. Advisory only: nothing is suppressed based on it.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    filter: SpeechBandFilter,
    history: VecDeque<f32>,
    window: usize,
    threshold: f32,
}

impl EnergyGate {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            filter: SpeechBandFilter::new(sample_rate),
            history: VecDeque::with_capacity(WINDOW_SIZE + 1),
            window: WINDOW_SIZE,
            threshold: SPEECH_THRESHOLD,
        }
    }

    pub fn observe(&mut self, samples: &[i16]) -> GateReading {
        let filtered = self.filter.apply(samples);
        let energy = spectral_energy(&filtered);
        self.push(energy)
    }

    fn push(&mut self, energy: f32) -> GateReading {
        self.history.push_back(energy);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        let moving_average = self.history.iter().sum::<f32>() / self.history.len() as f32;

        GateReading {
            energy,
            moving_average,
            speech: moving_average > self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, len: usize, amplitude: f32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                ((2.0 * PI * freq * t).sin() * amplitude * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn silence_has_no_energy() {
        let mut gate = EnergyGate::new(16000);
        let reading = gate.observe(&vec![0; 8000]);
        assert_eq!(reading.energy, 0.0);
        assert!(!reading.speech);
    }

    #[test]
    fn speech_band_tones_open_gate() {
        let mut gate = EnergyGate::new(16000);
        let mut voiced = vec![0i16; 8000];
        for freq in [400.0, 800.0, 1200.0, 1600.0, 2000.0, 2400.0, 2800.0] {
            for (acc, s) in voiced.iter_mut().zip(tone(freq, 16000, 8000, 0.1)) {
                *acc = acc.saturating_add(s);
            }
        }
        let reading = gate.observe(&voiced);
        assert!(reading.energy > SPEECH_THRESHOLD, "energy was {}", reading.energy);
        assert!(reading.speech);
    }

    #[test]
    fn moving_average_uses_last_five_chunks() {
        let mut gate = EnergyGate::new(16000);
        for energy in [10.0, 10.0, 10.0, 10.0, 10.0] {
            gate.push(energy);
        }
        let reading = gate.push(0.0);
        assert_eq!(reading.moving_average, 8.0);
        assert_eq!(gate.history.len(), WINDOW_SIZE);
    }

    #[test]
    fn lowpass_attenuates_high_frequencies() {
        let mut filter = SpeechBandFilter::new(16000);
        let high = filter.apply(&tone(7000.0, 16000, 4000, 0.5));
        let peak = high[2000..].iter().fold(0.0f32, |m, &x| m.max(x.abs()));
        assert!(peak < 0.1, "peak was {}", peak);
    }
}
