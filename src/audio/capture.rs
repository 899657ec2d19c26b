use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::{Consumer as ConsumerTrait, Producer as ProducerTrait, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{AudioSource, CaptureRequest, DeviceError, Waveform};
use crate::cancel::CancelToken;

/// Extra time allowed past the capture window before giving up on the device
const CAPTURE_GRACE: Duration = Duration::from_secs(2);

/// Samples copied out of the ring buffer per read
const DRAIN_CHUNK: usize = 4096;

/// Poll interval while waiting for a busy device
const DEVICE_WAIT_POLL: Duration = Duration::from_millis(5);

/// Busy flags of the input devices in use, keyed by device name
static DEVICE_LOCKS: OnceLock<Mutex<HashMap<String, Arc<AtomicBool>>>> = OnceLock::new();

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// List available input devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, DeviceError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDevice {
            id: name.clone(),
            is_default: name == default_name,
            name,
        })
        .collect();

    Ok(devices)
}

/// Get device by ID (name) or return default
pub fn get_device(device_id: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();

    match device_id {
        Some(id) if id != "default" => {
            let devices = host
                .input_devices()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?;
            for device in devices {
                if device.name().map(|name| name == id).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(DeviceError::DeviceNotFound(id.to_string()))
        }
        _ => host.default_input_device().ok_or(DeviceError::NoDefaultDevice),
    }
}

/// Selected audio configuration with both stream config and sample format
pub struct SelectedConfig {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16 | SampleFormat::U8
    )
}

/// Select an input configuration that records at exactly `sample_rate`.
///
/// Mono configurations win; otherwise the first multi-channel configuration
/// at that rate is used and downmixed to its first channel in the callback.
pub fn select_input_config(device: &Device, sample_rate: u32) -> Result<SelectedConfig, DeviceError> {
    let ranges: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| DeviceError::UnsupportedConfig {
            sample_rate,
            reason: e.to_string(),
        })?
        .filter(|range| {
            is_supported_format(range.sample_format())
                && range.min_sample_rate().0 <= sample_rate
                && range.max_sample_rate().0 >= sample_rate
        })
        .collect();

    let chosen = ranges
        .iter()
        .find(|range| range.channels() == 1)
        .or_else(|| ranges.first())
        .ok_or_else(|| DeviceError::UnsupportedConfig {
            sample_rate,
            reason: "no input configuration covers this rate".to_string(),
        })?;

    let supported = chosen.clone().with_sample_rate(cpal::SampleRate(sample_rate));
    debug!(
        "Selected input config: {} Hz, {} channels, format {:?}{}",
        sample_rate,
        supported.channels(),
        supported.sample_format(),
        if supported.channels() > 1 { " (will downmix)" } else { "" }
    );

    Ok(SelectedConfig {
        config: supported.config(),
        sample_format: supported.sample_format(),
    })
}

/// Ring buffer capacity for one capture window, with a second of headroom
pub fn calculate_ring_buffer_capacity(sample_rate: u32, expected_len: usize) -> usize {
    expected_len.saturating_add(sample_rate as usize)
}

/// Exclusive hold on an input device, released on drop
pub struct DeviceGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Wait until no other capture in this process is using `device_name`.
///
/// Waiting is abandoned with `DeviceError::Cancelled` once `cancel` is set.
pub fn acquire_device(device_name: &str, cancel: &CancelToken) -> Result<DeviceGuard, DeviceError> {
    let busy = {
        let mut locks = DEVICE_LOCKS
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .map_err(|_| DeviceError::Stream("device lock table poisoned".to_string()))?;
        locks
            .entry(device_name.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    };

    let mut waited = false;
    loop {
        if cancel.is_cancelled() {
            return Err(DeviceError::Cancelled);
        }
        if busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Ok(DeviceGuard { busy });
        }
        if !waited {
            debug!("Input device '{}' is busy, waiting", device_name);
            waited = true;
        }
        std::thread::sleep(DEVICE_WAIT_POLL);
    }
}

/// Running cpal input stream feeding a ring buffer
pub struct AudioCapture {
    stream: Stream,
    overflow_counter: Arc<AtomicU64>,
    stream_failed: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Build an input stream that writes to the given ring buffer producer
    pub fn new(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        producer: HeapProd<f32>,
    ) -> Result<Self, DeviceError> {
        let overflow_counter = Arc::new(AtomicU64::new(0));
        let stream_failed = Arc::new(AtomicBool::new(false));
        let is_running = Arc::new(AtomicBool::new(false));

        info!(
            "Building input stream: {} Hz, {} channels, format {:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        let shared = StreamShared {
            overflow_counter: overflow_counter.clone(),
            stream_failed: stream_failed.clone(),
            is_running: is_running.clone(),
        };

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, config, producer, shared),
            SampleFormat::I16 => Self::build_stream::<i16>(device, config, producer, shared),
            SampleFormat::U16 => Self::build_stream::<u16>(device, config, producer, shared),
            SampleFormat::U8 => Self::build_stream::<u8>(device, config, producer, shared),
            other => {
                return Err(DeviceError::UnsupportedConfig {
                    sample_rate: config.sample_rate.0,
                    reason: format!("unsupported sample format {:?}", other),
                })
            }
        }?;

        Ok(Self {
            stream,
            overflow_counter,
            stream_failed,
            is_running,
        })
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut producer: HeapProd<f32>,
        shared: StreamShared,
    ) -> Result<Stream, DeviceError>
    where
        T: Sample + SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;
        let StreamShared {
            overflow_counter,
            stream_failed,
            is_running,
        } = shared;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    push_first_channel(data, channels, &mut producer, &overflow_counter);
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    stream_failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| DeviceError::Stream(format!("failed to build input stream: {}", e)))
    }

    /// Start capturing audio
    pub fn start(&self) -> Result<(), DeviceError> {
        self.is_running.store(true, Ordering::SeqCst);
        self.stream
            .play()
            .map_err(|e| DeviceError::Stream(format!("failed to start audio stream: {}", e)))?;
        info!("Audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&self) -> Result<(), DeviceError> {
        self.is_running.store(false, Ordering::SeqCst);
        self.stream
            .pause()
            .map_err(|e| DeviceError::Stream(format!("failed to stop audio stream: {}", e)))?;
        info!("Audio capture stopped");
        Ok(())
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_counter.load(Ordering::Relaxed)
    }

    pub fn stream_failed(&self) -> &AtomicBool {
        &self.stream_failed
    }
}

/// Flags shared between the capture handle and the stream callbacks
struct StreamShared {
    overflow_counter: Arc<AtomicU64>,
    stream_failed: Arc<AtomicBool>,
    is_running: Arc<AtomicBool>,
}

/// Push the first channel of interleaved `data` into the ring buffer
fn push_first_channel<T>(
    data: &[T],
    channels: usize,
    producer: &mut HeapProd<f32>,
    overflow_counter: &AtomicU64,
) where
    T: Sample,
    f32: FromSample<T>,
{
    for frame in data.chunks(channels.max(1)) {
        let sample: f32 = f32::from_sample(frame[0]);
        if producer.try_push(sample).is_err() {
            overflow_counter.fetch_add(1, Ordering::Relaxed);
            break;
        }
    }
}

/// Drain `expected` samples from the ring buffer, blocking until they arrive.
///
/// Fails on cancellation, on a stream error, or when no new audio shows up
/// before `timeout` elapses.
pub fn collect_samples(
    consumer: &mut HeapCons<f32>,
    expected: usize,
    timeout: Duration,
    cancel: &CancelToken,
    stream_failed: &AtomicBool,
) -> Result<Vec<f32>, DeviceError> {
    let deadline = Instant::now() + timeout;
    let mut samples = Vec::with_capacity(expected);
    let mut chunk = vec![0.0f32; DRAIN_CHUNK];

    while samples.len() < expected {
        if cancel.is_cancelled() {
            return Err(DeviceError::Cancelled);
        }
        if stream_failed.load(Ordering::SeqCst) {
            return Err(DeviceError::Stream(
                "input stream reported an error during capture".to_string(),
            ));
        }

        let want = (expected - samples.len()).min(DRAIN_CHUNK);
        let read = consumer.pop_slice(&mut chunk[..want]);
        if read == 0 {
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout {
                    received: samples.len(),
                    expected,
                });
            }
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        samples.extend_from_slice(&chunk[..read]);
    }

    Ok(samples)
}

/// Microphone-backed [`AudioSource`].
///
/// The device is held for the whole recording window, so concurrent runs in
/// this process take turns on it even through separate sources.
pub struct MicrophoneSource {
    device_id: Option<String>,
}

impl MicrophoneSource {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl AudioSource for MicrophoneSource {
    fn capture(&self, request: &CaptureRequest, cancel: &CancelToken) -> Result<Waveform, DeviceError> {
        request.validate()?;
        let timeout = request.duration()? + CAPTURE_GRACE;

        let device = get_device(self.device_id.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let _guard = acquire_device(&device_name, cancel)?;
        let selected = select_input_config(&device, request.sample_rate)?;

        let expected = request.expected_len();
        let capacity = calculate_ring_buffer_capacity(request.sample_rate, expected);
        let (producer, mut consumer) = HeapRb::<f32>::new(capacity).split();
        debug!("Ring buffer capacity: {} samples", capacity);

        let capture = AudioCapture::new(&device, &selected.config, selected.sample_format, producer)?;
        info!(
            "Recording {:.2}s from '{}' ({} samples)",
            request.duration_secs, device_name, expected
        );

        capture.start()?;
        let collected = collect_samples(
            &mut consumer,
            expected,
            timeout,
            cancel,
            capture.stream_failed(),
        );
        if let Err(e) = capture.stop() {
            warn!("{}", e);
        }

        if capture.overflow_count() > 0 {
            warn!("Audio overflows detected: {}", capture.overflow_count());
        }

        let samples = collected?;
        debug!("Recording finished: {} samples", samples.len());
        Ok(Waveform::new(samples, request.sample_rate))
    }

    fn describe(&self) -> String {
        format!(
            "microphone ({})",
            self.device_id.as_deref().unwrap_or("default")
        )
    }
}
