//! Log-mel filterbank features for spectrogram transformer classifiers.
//!
//! Computes Kaldi-compatible `fbank` features (the input format of Audio
//! Spectrogram Transformer checkpoints) from 16kHz mono samples:
//!
//! ```text
//! samples × 32768 → 25ms frames / 10ms shift → DC removal → pre-emphasis
//! → Povey window → 512-pt FFT → power → mel filterbank → ln
//! → pad/truncate to max_length frames → (x - mean) / (2 * std)
//! ```
//!
//! Output layout is row-major `[frames, mel_bins]`.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Deserialize;

/// Feature extractor parameters, read from `preprocessor_config.json`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Expected waveform sample rate.
    pub sampling_rate: u32,
    /// Number of mel filterbank bins.
    pub num_mel_bins: usize,
    /// Frames per example; shorter inputs are zero-padded, longer truncated.
    pub max_length: usize,
    /// Dataset mean of the log-mel values.
    pub mean: f32,
    /// Dataset standard deviation of the log-mel values.
    pub std: f32,
    /// Apply mean/std normalization.
    pub do_normalize: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 16_000,
            num_mel_bins: 128,
            max_length: 1024,
            mean: -4.267_739_3,
            std: 4.568_997_4,
            do_normalize: true,
        }
    }
}

const FRAME_LENGTH_MS: f32 = 25.0;
const FRAME_SHIFT_MS: f32 = 10.0;
const PREEMPHASIS: f32 = 0.97;
const LOW_FREQ: f32 = 20.0;
const WAVE_SCALE: f32 = 32_768.0;

/// Precomputed filterbank extractor.
pub struct FilterbankExtractor {
    config: FeatureConfig,
    frame_length: usize,
    frame_shift: usize,
    fft_size: usize,
    window: Vec<f32>,
    /// `[num_mel_bins][fft_size / 2]` triangular weights
    mel_banks: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for FilterbankExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterbankExtractor")
            .field("config", &self.config)
            .field("frame_length", &self.frame_length)
            .field("frame_shift", &self.frame_shift)
            .field("fft_size", &self.fft_size)
            .finish_non_exhaustive()
    }
}

impl FilterbankExtractor {
    /// Build an extractor for `config`.
    pub fn new(config: FeatureConfig) -> Self {
        let rate = config.sampling_rate as f32;
        let frame_length = (rate * FRAME_LENGTH_MS / 1000.0) as usize;
        let frame_shift = (rate * FRAME_SHIFT_MS / 1000.0) as usize;
        let fft_size = frame_length.next_power_of_two();

        let window = povey_window(frame_length);
        let mel_banks = mel_banks(config.num_mel_bins, fft_size, rate, LOW_FREQ, rate / 2.0);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            config,
            frame_length,
            frame_shift,
            fft_size,
            window,
            mel_banks,
            fft,
        }
    }

    /// Parameters in use.
    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Number of complete frames in `num_samples` (no edge padding).
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples < self.frame_length {
            0
        } else {
            1 + (num_samples - self.frame_length) / self.frame_shift
        }
    }

    /// Log-mel filterbank of `samples`, shape `[frames, mel_bins]`.
    pub fn fbank(&self, samples: &[f32]) -> Array2<f32> {
        let n_frames = self.num_frames(samples.len());
        let n_mels = self.config.num_mel_bins;
        let mut out = Array2::<f32>::zeros((n_frames, n_mels));

        let mut frame = vec![0.0f32; self.frame_length];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_size];
        let mut power = vec![0.0f32; self.fft_size / 2 + 1];

        for (t, mut row) in out.rows_mut().into_iter().enumerate() {
            let start = t * self.frame_shift;
            for (dst, &src) in frame
                .iter_mut()
                .zip(&samples[start..start + self.frame_length])
            {
                *dst = src * WAVE_SCALE;
            }

            let mean = frame.iter().sum::<f32>() / self.frame_length as f32;
            for v in &mut frame {
                *v -= mean;
            }

            for i in (1..self.frame_length).rev() {
                frame[i] -= PREEMPHASIS * frame[i - 1];
            }
            frame[0] -= PREEMPHASIS * frame[0];

            for (i, slot) in buffer.iter_mut().enumerate() {
                let v = if i < self.frame_length {
                    frame[i] * self.window[i]
                } else {
                    0.0
                };
                *slot = Complex::new(v, 0.0);
            }
            self.fft.process(&mut buffer);

            for (p, c) in power.iter_mut().zip(&buffer) {
                *p = c.norm_sqr();
            }

            for (m, bank) in self.mel_banks.iter().enumerate() {
                let energy: f32 = bank.iter().zip(&power).map(|(w, p)| w * p).sum();
                row[m] = energy.max(f32::EPSILON).ln();
            }
        }

        out
    }

    /// Model-ready features: fbank padded/truncated to `max_length` frames
    /// and normalized. Returned flat, row-major `[max_length * mel_bins]`.
    pub fn extract(&self, samples: &[f32]) -> Vec<f32> {
        let fbank = self.fbank(samples);
        let n_mels = self.config.num_mel_bins;
        let target = self.config.max_length;

        let mut features = vec![0.0f32; target * n_mels];
        for (t, row) in fbank.rows().into_iter().take(target).enumerate() {
            for (m, &v) in row.iter().enumerate() {
                features[t * n_mels + m] = v;
            }
        }

        if self.config.do_normalize {
            let scale = 1.0 / (2.0 * self.config.std);
            for v in &mut features {
                *v = (*v - self.config.mean) * scale;
            }
        }

        features
    }
}

/// Hann window raised to 0.85 (Kaldi "povey"), symmetric.
fn povey_window(len: usize) -> Vec<f32> {
    let denom = (len.max(2) - 1) as f32;
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f32 / denom).cos()).powf(0.85))
        .collect()
}

fn mel_scale(hz: f32) -> f32 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Triangular filters evenly spaced on the mel scale, evaluated at the
/// first `fft_size / 2` FFT bins. The Nyquist bin gets no weight, so each
/// row is padded with a trailing zero to match the power spectrum length.
fn mel_banks(num_bins: usize, fft_size: usize, rate: f32, low: f32, high: f32) -> Vec<Vec<f32>> {
    let num_fft_bins = fft_size / 2;
    let bin_width = rate / fft_size as f32;
    let mel_low = mel_scale(low);
    let mel_high = mel_scale(high);
    let mel_delta = (mel_high - mel_low) / (num_bins + 1) as f32;

    (0..num_bins)
        .map(|m| {
            let left = mel_low + m as f32 * mel_delta;
            let center = left + mel_delta;
            let right = center + mel_delta;
            let mut bank: Vec<f32> = (0..num_fft_bins)
                .map(|k| {
                    let mel = mel_scale(bin_width * k as f32);
                    if mel > left && mel < right {
                        if mel <= center {
                            (mel - left) / (center - left)
                        } else {
                            (right - mel) / (right - center)
                        }
                    } else {
                        0.0
                    }
                })
                .collect();
            bank.push(0.0);
            bank
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, secs: f32) -> Vec<f32> {
        let n = (16_000.0 * secs) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 16_000.0).sin())
            .collect()
    }

    #[test]
    fn default_config_matches_ast() {
        let c = FeatureConfig::default();
        assert_eq!(c.num_mel_bins, 128);
        assert_eq!(c.max_length, 1024);
        assert!((c.mean + 4.267_739).abs() < 1e-4);
    }

    #[test]
    fn config_reads_partial_json() {
        let c: FeatureConfig =
            serde_json::from_str(r#"{"max_length": 512, "feature_extractor_type": "ASTFeatureExtractor"}"#)
                .unwrap();
        assert_eq!(c.max_length, 512);
        assert_eq!(c.num_mel_bins, 128);
    }

    #[test]
    fn frame_geometry() {
        let fx = FilterbankExtractor::new(FeatureConfig::default());
        assert_eq!(fx.frame_length, 400);
        assert_eq!(fx.frame_shift, 160);
        assert_eq!(fx.fft_size, 512);
        assert_eq!(fx.num_frames(399), 0);
        assert_eq!(fx.num_frames(400), 1);
        // one second of audio
        assert_eq!(fx.num_frames(16_000), 98);
    }

    #[test]
    fn filterbank_rows_cover_spectrum() {
        let banks = mel_banks(128, 512, 16_000.0, 20.0, 8_000.0);
        assert_eq!(banks.len(), 128);
        assert!(banks.iter().all(|b| b.len() == 257));
        assert!(banks.iter().all(|b| b.iter().all(|w| (0.0..=1.0).contains(w))));
        // low filters are narrower than high filters in Hz
        let width = |b: &Vec<f32>| b.iter().filter(|w| **w > 0.0).count();
        assert!(width(&banks[5]) <= width(&banks[120]));
    }

    #[test]
    fn fbank_shape_and_finite() {
        let fx = FilterbankExtractor::new(FeatureConfig::default());
        let fb = fx.fbank(&tone(440.0, 1.0));
        assert_eq!(fb.dim(), (98, 128));
        assert!(fb.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn tone_energy_peaks_in_matching_band() {
        let fx = FilterbankExtractor::new(FeatureConfig::default());
        let low = fx.fbank(&tone(300.0, 0.5));
        let high = fx.fbank(&tone(4_000.0, 0.5));
        let argmax = |row: ndarray::ArrayView1<'_, f32>| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap()
        };
        assert!(argmax(low.row(10)) < argmax(high.row(10)));
    }

    #[test]
    fn silence_floors_at_epsilon() {
        let fx = FilterbankExtractor::new(FeatureConfig::default());
        let fb = fx.fbank(&vec![0.0; 16_000]);
        let floor = f32::EPSILON.ln();
        assert!(fb.iter().all(|v| (v - floor).abs() < 1e-3));
    }

    #[test]
    fn extract_pads_to_max_length() {
        let fx = FilterbankExtractor::new(FeatureConfig::default());
        let features = fx.extract(&tone(440.0, 1.0));
        assert_eq!(features.len(), 1024 * 128);
        // padded frames hold the normalized zero
        let pad_value = (0.0 - fx.config().mean) / (2.0 * fx.config().std);
        assert!((features[1023 * 128] - pad_value).abs() < 1e-6);
    }

    #[test]
    fn extract_truncates_long_input() {
        let config = FeatureConfig {
            max_length: 10,
            do_normalize: false,
            ..FeatureConfig::default()
        };
        let fx = FilterbankExtractor::new(config);
        let features = fx.extract(&tone(440.0, 1.0));
        assert_eq!(features.len(), 10 * 128);
        let fb = fx.fbank(&tone(440.0, 1.0));
        assert_eq!(features[9 * 128 + 3], fb[[9, 3]]);
    }
}
