use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::trace;

use super::mel::{create_mel_filterbank, hann_window};
use super::{FeatureExtractionError, FeatureVector, MfccConfig};
use crate::audio::Waveform;

/// Floor applied to mel energies before taking the log
const AMIN: f32 = 1e-10;

/// Coefficient-by-frame MFCC matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Mfcc {
    /// `coefficients[k][t]` is coefficient `k` of frame `t`
    coefficients: Vec<Vec<f32>>,
}

impl Mfcc {
    pub fn n_coeffs(&self) -> usize {
        self.coefficients.len()
    }

    pub fn n_frames(&self) -> usize {
        self.coefficients.first().map_or(0, Vec::len)
    }

    /// Arithmetic mean of each coefficient across frames
    pub fn mean(&self) -> FeatureVector {
        FeatureVector::new(
            self.coefficients
                .iter()
                .map(|row| {
                    let sum: f64 = row.iter().map(|&v| v as f64).sum();
                    (sum / row.len().max(1) as f64) as f32
                })
                .collect(),
        )
    }
}

/// MFCC extractor with pre-computed window, filterbank, DCT basis and FFT plan.
///
/// Stateless across calls: scratch buffers are allocated per call so a single
/// extractor can be shared between threads.
#[derive(Clone)]
pub struct MfccExtractor {
    config: MfccConfig,
    sample_rate: u32,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    mel_filterbank: Vec<Vec<f32>>,
    dct_basis: Vec<Vec<f32>>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig, sample_rate: u32) -> Result<Self, FeatureExtractionError> {
        config.validate(sample_rate)?;

        let fmax = config.fmax.unwrap_or(sample_rate as f32 / 2.0);
        let mel_filterbank =
            create_mel_filterbank(config.n_mels, config.n_fft, sample_rate, config.fmin, fmax);
        let dct_basis = dct_ortho_basis(config.n_coeffs, config.n_mels);
        let window = hann_window(config.n_fft);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Ok(Self {
            config,
            sample_rate,
            fft,
            window,
            mel_filterbank,
            dct_basis,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_coeffs(&self) -> usize {
        self.config.n_coeffs
    }

    /// Shortest input that yields one full analysis frame
    pub fn min_samples(&self) -> usize {
        self.config.n_fft
    }

    /// Number of frames produced for `len` samples (centered framing)
    pub fn frame_count(&self, len: usize) -> usize {
        let pad = self.config.n_fft / 2;
        1 + (len + 2 * pad - self.config.n_fft) / self.config.hop_length
    }

    /// Time-averaged MFCCs of a waveform
    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureVector, FeatureExtractionError> {
        if waveform.sample_rate() != self.sample_rate {
            return Err(FeatureExtractionError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: waveform.sample_rate(),
            });
        }
        Ok(self.compute(waveform.samples())?.mean())
    }

    /// Full coefficient-by-frame MFCC matrix
    pub fn compute(&self, samples: &[f32]) -> Result<Mfcc, FeatureExtractionError> {
        self.check_input(samples)?;
        let log_mel = self.log_mel_spectrogram(samples)?;

        let coefficients = self
            .dct_basis
            .iter()
            .map(|basis| {
                log_mel
                    .iter()
                    .map(|frame| basis.iter().zip(frame).map(|(b, m)| b * m).sum())
                    .collect()
            })
            .collect();

        Ok(Mfcc { coefficients })
    }

    fn check_input(&self, samples: &[f32]) -> Result<(), FeatureExtractionError> {
        if samples.is_empty() {
            return Err(FeatureExtractionError::EmptyWaveform);
        }
        if samples.len() < self.min_samples() {
            return Err(FeatureExtractionError::TooShort {
                len: samples.len(),
                min: self.min_samples(),
            });
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FeatureExtractionError::NonFiniteSample(index));
        }
        Ok(())
    }

    /// Log-power mel spectrogram as `[frame][mel]`, in dB
    fn log_mel_spectrogram(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>, FeatureExtractionError> {
        let n_fft = self.config.n_fft;
        let pad = n_fft / 2;
        let n_frames = self.frame_count(samples.len());

        let mut fft_input = self.fft.make_input_vec();
        let mut fft_output = self.fft.make_output_vec();
        let mut power_spec = vec![0.0f32; fft_output.len()];
        let mut log_mel = Vec::with_capacity(n_frames);

        for frame_idx in 0..n_frames {
            // Frame start in the zero-padded signal
            let start = frame_idx * self.config.hop_length;
            for (i, slot) in fft_input.iter_mut().enumerate() {
                let padded = start + i;
                let sample = if padded >= pad {
                    samples.get(padded - pad).copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                *slot = sample * self.window[i];
            }

            self.fft
                .process(&mut fft_input, &mut fft_output)
                .map_err(|e| FeatureExtractionError::Fft(e.to_string()))?;

            for (power, bin) in power_spec.iter_mut().zip(&fft_output) {
                *power = bin.norm_sqr();
            }

            let mel_frame: Vec<f32> = self
                .mel_filterbank
                .iter()
                .map(|filter| {
                    let energy: f32 = filter.iter().zip(&power_spec).map(|(w, p)| w * p).sum();
                    10.0 * energy.max(AMIN).log10()
                })
                .collect();
            log_mel.push(mel_frame);
        }

        if let Some(top_db) = self.config.top_db {
            let peak = log_mel
                .iter()
                .flatten()
                .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let floor = peak - top_db;
            for value in log_mel.iter_mut().flatten() {
                *value = value.max(floor);
            }
        }

        trace!(
            "Log-mel spectrogram: {} frames x {} bands",
            log_mel.len(),
            self.config.n_mels
        );

        Ok(log_mel)
    }
}

/// Orthonormal DCT-II basis, `n_coeffs` rows over `n_mels` inputs
fn dct_ortho_basis(n_coeffs: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n = n_mels as f32;
    (0..n_coeffs)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_mels)
                .map(|m| scale * (PI * k as f32 * (2 * m + 1) as f32 / (2.0 * n)).cos())
                .collect()
        })
        .collect()
}
