use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::time::Duration;

use super::DeviceError;

/// Longest capture window accepted, in seconds
pub const MAX_CAPTURE_SECS: f64 = 600.0;

/// Largest capture window accepted, in samples (10 minutes at 96 kHz)
pub const MAX_CAPTURE_SAMPLES: f64 = 600.0 * 96_000.0;

/// Number of samples in a capture window, truncating any fractional sample
pub fn expected_len(duration_secs: f32, sample_rate: u32) -> usize {
    (duration_secs as f64 * sample_rate as f64).floor() as usize
}

/// Parameters of one capture window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub duration_secs: f32,
    pub sample_rate: u32,
}

impl CaptureRequest {
    pub fn new(duration_secs: f32, sample_rate: u32) -> Self {
        Self {
            duration_secs,
            sample_rate,
        }
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(DeviceError::InvalidRequest(format!(
                "duration must be positive, got {}",
                self.duration_secs
            )));
        }
        if self.sample_rate == 0 {
            return Err(DeviceError::InvalidRequest(
                "sample rate must be positive".to_string(),
            ));
        }
        let samples = self.duration_secs as f64 * self.sample_rate as f64;
        if self.duration_secs as f64 > MAX_CAPTURE_SECS || samples > MAX_CAPTURE_SAMPLES {
            return Err(DeviceError::InvalidRequest(format!(
                "{}s at {} Hz exceeds the capture limit ({}s, {} samples)",
                self.duration_secs, self.sample_rate, MAX_CAPTURE_SECS, MAX_CAPTURE_SAMPLES
            )));
        }
        if self.expected_len() == 0 {
            return Err(DeviceError::InvalidRequest(format!(
                "{}s at {} Hz yields no samples",
                self.duration_secs, self.sample_rate
            )));
        }
        Ok(())
    }

    pub fn expected_len(&self) -> usize {
        expected_len(self.duration_secs, self.sample_rate)
    }

    pub fn duration(&self) -> Result<Duration, DeviceError> {
        Duration::try_from_secs_f32(self.duration_secs)
            .map_err(|e| DeviceError::InvalidRequest(format!("duration {}: {}", self.duration_secs, e)))
    }
}

/// Mono audio clip in the device's normalized [-1, 1] range
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// All-zero clip of the given length
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Peak absolute amplitude (used for level logging)
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Write the clip as a 32-bit float mono WAV file
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file {:?}", path))?;
        for &sample in &self.samples {
            writer
                .write_sample(sample)
                .context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV file")
    }
}
