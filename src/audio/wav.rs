use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::resampler::resample_clip;
use super::{AudioSource, CaptureRequest, DeviceError, Waveform};
use crate::cancel::CancelToken;

/// [`AudioSource`] that replays a WAV file instead of the microphone.
///
/// Only the first channel is used. Files at another sample rate are
/// resampled, then truncated or zero-padded to the requested window.
pub struct WavFileSource {
    path: PathBuf,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Read the first channel of a WAV file as normalized f32 samples
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), DeviceError> {
    let mut reader = WavReader::open(path)
        .map_err(|e| DeviceError::File(format!("{:?}: {}", path, e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    debug!(
        "WAV {:?}: {} Hz, {} channels, {} bits {:?}",
        path, spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DeviceError::File(e.to_string()))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DeviceError::File(e.to_string()))?
        }
    };

    let mono = interleaved.into_iter().step_by(channels).collect();
    Ok((mono, spec.sample_rate))
}

impl AudioSource for WavFileSource {
    fn capture(&self, request: &CaptureRequest, cancel: &CancelToken) -> Result<Waveform, DeviceError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(DeviceError::Cancelled);
        }

        let (samples, file_rate) = read_wav_mono(&self.path)?;
        let mut samples = if file_rate != request.sample_rate {
            info!(
                "Resampling {:?} from {} Hz to {} Hz",
                self.path, file_rate, request.sample_rate
            );
            resample_clip(&samples, file_rate, request.sample_rate)
                .map_err(|e| DeviceError::File(format!("resampling failed: {:#}", e)))?
        } else {
            samples
        };

        let expected = request.expected_len();
        if samples.len() < expected {
            warn!(
                "{:?} is shorter than the capture window ({} < {} samples), padding with silence",
                self.path,
                samples.len(),
                expected
            );
        }
        samples.resize(expected, 0.0);

        Ok(Waveform::new(samples, request.sample_rate))
    }

    fn describe(&self) -> String {
        format!("file {:?}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_i16_stereo(path: &Path, sample_rate: u32, frames: usize) {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(16384i16).unwrap(); // left = 0.5
            writer.write_sample(-32768i16).unwrap(); // right = -1.0
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_read_wav_mono_takes_first_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_i16_stereo(&path, 8000, 10);

        let (samples, rate) = read_wav_mono(&path).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_capture_pads_and_truncates_to_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_i16_stereo(&path, 8000, 4000);
        let source = WavFileSource::new(&path);

        // 1s window on a 0.5s file: padded
        let waveform = source
            .capture(&CaptureRequest::new(1.0, 8000), &CancelToken::new())
            .unwrap();
        assert_eq!(waveform.len(), 8000);
        assert_eq!(waveform.samples()[7999], 0.0);

        // 0.25s window: truncated
        let waveform = source
            .capture(&CaptureRequest::new(0.25, 8000), &CancelToken::new())
            .unwrap();
        assert_eq!(waveform.len(), 2000);
    }

    #[test]
    fn test_capture_resamples_foreign_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        Waveform::new(vec![0.0; 16000], 16000).write_wav(&path).unwrap();

        let waveform = WavFileSource::new(&path)
            .capture(&CaptureRequest::new(1.0, 44100), &CancelToken::new())
            .unwrap();
        assert_eq!(waveform.sample_rate(), 44100);
        assert_eq!(waveform.len(), 44100);
    }

    #[test]
    fn test_missing_file_is_device_error() {
        let source = WavFileSource::new("/nonexistent/clip.wav");
        let result = source.capture(&CaptureRequest::new(1.0, 8000), &CancelToken::new());
        assert!(matches!(result, Err(DeviceError::File(_))));
    }
}
