//! MFCC feature extraction.
//!
//! Turns a waveform into a fixed-length vector of time-averaged Mel-frequency
//! cepstral coefficients, the input the emotion classifier was trained on.

pub mod mel;
pub mod mfcc;

pub use mfcc::{Mfcc, MfccExtractor};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::Waveform;

/// Errors that can occur during feature extraction
#[derive(Debug, Clone, Error)]
pub enum FeatureExtractionError {
    #[error("Empty waveform")]
    EmptyWaveform,

    #[error("Waveform too short: {len} samples, need at least {min} for one analysis frame")]
    TooShort { len: usize, min: usize },

    #[error("Non-finite sample at index {0}")]
    NonFiniteSample(usize),

    #[error("Waveform is {actual} Hz but the extractor was built for {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("Invalid MFCC configuration: {0}")]
    InvalidConfig(String),

    #[error("FFT failed: {0}")]
    Fft(String),
}

/// MFCC analysis parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfccConfig {
    /// Number of cepstral coefficients kept (the feature vector length)
    pub n_coeffs: usize,
    /// FFT size and analysis window length, in samples
    pub n_fft: usize,
    /// Hop between successive frames, in samples
    pub hop_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Lowest filterbank frequency in Hz
    pub fmin: f32,
    /// Highest filterbank frequency in Hz (Nyquist when unset)
    pub fmax: Option<f32>,
    /// Dynamic range kept below the loudest mel bin, in dB
    pub top_db: Option<f32>,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_coeffs: 13,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            top_db: Some(80.0),
        }
    }
}

impl MfccConfig {
    pub fn with_n_coeffs(n_coeffs: usize) -> Self {
        Self {
            n_coeffs,
            ..Self::default()
        }
    }

    pub fn validate(&self, sample_rate: u32) -> Result<(), FeatureExtractionError> {
        let invalid = |msg: String| Err(FeatureExtractionError::InvalidConfig(msg));

        if sample_rate == 0 {
            return invalid("sample rate must be positive".to_string());
        }
        if self.n_coeffs == 0 {
            return invalid("n_coeffs must be at least 1".to_string());
        }
        if self.n_mels == 0 || self.n_coeffs > self.n_mels {
            return invalid(format!(
                "n_coeffs ({}) must not exceed n_mels ({})",
                self.n_coeffs, self.n_mels
            ));
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return invalid(format!(
                "n_fft ({}) must be >= 2 and hop_length ({}) >= 1",
                self.n_fft, self.hop_length
            ));
        }
        let nyquist = sample_rate as f32 / 2.0;
        let fmax = self.fmax.unwrap_or(nyquist);
        if self.fmin < 0.0 || fmax <= self.fmin || fmax > nyquist {
            return invalid(format!(
                "frequency range {}..{} Hz is outside 0..{} Hz",
                self.fmin, fmax, nyquist
            ));
        }
        Ok(())
    }
}

/// Time-averaged MFCCs, one value per coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// One-shot extraction with default analysis parameters
pub fn extract(
    waveform: &Waveform,
    sample_rate: u32,
    n_coeffs: usize,
) -> Result<FeatureVector, FeatureExtractionError> {
    MfccExtractor::new(MfccConfig::with_n_coeffs(n_coeffs), sample_rate)?.extract(waveform)
}
