//! Audio input: fixed-window microphone capture and WAV file input.

pub mod capture;
pub mod resampler;
pub mod wav;
pub mod waveform;

pub use capture::{get_device, list_input_devices, select_input_config, AudioDevice, MicrophoneSource};
pub use resampler::{resample_clip, AudioResampler};
pub use wav::WavFileSource;
pub use waveform::{expected_len, CaptureRequest, Waveform};

use thiserror::Error;

use crate::cancel::CancelToken;

/// Errors raised while acquiring a waveform
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("No default input device available")]
    NoDefaultDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to enumerate input devices: {0}")]
    Enumerate(String),

    #[error("Device does not support {sample_rate} Hz capture: {reason}")]
    UnsupportedConfig { sample_rate: u32, reason: String },

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Timed out waiting for audio: received {received} of {expected} samples")]
    Timeout { received: usize, expected: usize },

    #[error("Invalid capture request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read audio file: {0}")]
    File(String),

    #[error("Capture cancelled")]
    Cancelled,
}

/// A source of fixed-length mono waveforms.
///
/// Implementations block the calling thread until the whole window is
/// available and must return exactly `request.expected_len()` samples.
pub trait AudioSource: Send + Sync {
    fn capture(&self, request: &CaptureRequest, cancel: &CancelToken) -> Result<Waveform, DeviceError>;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}
