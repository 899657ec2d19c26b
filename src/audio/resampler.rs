use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler};
use tracing::debug;

/// Input frames fed to the resampler per call
const CHUNK_FRAMES: usize = 1024;

/// Mono FFT resampler between two fixed rates
pub struct AudioResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
    input_frames: usize,
}

impl AudioResampler {
    /// Create a new resampler from `from_rate` to `to_rate`
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        debug!(
            "Creating resampler: {} Hz -> {} Hz (ratio: {:.4})",
            from_rate,
            to_rate,
            to_rate as f64 / from_rate as f64
        );

        let channels = 1;
        let resampler = FftFixedIn::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_FRAMES,
            2, // sub_chunks for quality
            channels,
        )
        .context("Failed to create resampler")?;

        let input_buffer = vec![vec![0.0f32; CHUNK_FRAMES]; channels];
        let output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            resampler,
            input_buffer,
            output_buffer,
            input_frames: CHUNK_FRAMES,
        })
    }

    /// Get the number of input frames needed for the next process call
    pub fn input_frames_next(&self) -> usize {
        self.input_frames
    }

    /// Output frames of latency introduced by the filter
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Process exactly `input_frames_next()` samples
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != self.input_frames {
            anyhow::bail!(
                "Input length {} doesn't match expected {}",
                input.len(),
                self.input_frames
            );
        }

        self.input_buffer[0].copy_from_slice(input);

        let (_, output_frames) = self
            .resampler
            .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
            .context("Resampling failed")?;

        Ok(self.output_buffer[0][..output_frames].to_vec())
    }
}

/// Resample a whole clip, compensating for filter delay.
///
/// The output holds `round(len * to / from)` samples.
pub fn resample_clip(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }

    let mut resampler = AudioResampler::new(from_rate, to_rate)?;
    let frames = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let target = (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;

    let mut output = Vec::with_capacity(target + delay + frames);
    let mut chunk = vec![0.0f32; frames];
    let mut position = 0;

    // Trailing chunks are zero-padded to flush the filter
    while output.len() < target + delay {
        chunk.fill(0.0);
        if position < input.len() {
            let end = (position + frames).min(input.len());
            chunk[..end - position].copy_from_slice(&input[position..end]);
        }
        position += frames;
        output.extend(resampler.process(&chunk)?);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(target);
    Ok(output)
}
