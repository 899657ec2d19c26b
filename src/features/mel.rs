//! Mel scale and filterbank (Slaney variant).
//!
//! Linear below 1 kHz, logarithmic above, with area-normalized triangular
//! filters, matching the scale most MFCC-trained speech models expect.

use std::f32::consts::PI;

/// Hz per mel in the linear region
const F_SP: f64 = 200.0 / 3.0;
/// Start of the logarithmic region
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Convert frequency to mel scale
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert mel scale to frequency
pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Center frequency of each FFT bin (`n_fft / 2 + 1` bins)
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

/// Create a mel filterbank matrix
///
/// # Returns
/// `n_mels` filters, each a Vec of weights over the `n_fft / 2 + 1` FFT bins
pub fn create_mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: u32,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);

    let mel_min = hz_to_mel(fmin as f64);
    let mel_max = hz_to_mel(fmax as f64);

    // n_mels + 2 edges equally spaced on the mel scale
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|i| {
            let (left, center, right) = (edges[i], edges[i + 1], edges[i + 2]);
            // Slaney normalization: constant energy per filter
            let norm = 2.0 / (right - left);

            fft_freqs
                .iter()
                .map(|&freq| {
                    let rising = (freq - left) / (center - left);
                    let falling = (right - freq) / (right - center);
                    (rising.min(falling).max(0.0) * norm) as f32
                })
                .collect()
        })
        .collect()
}

/// Periodic Hann window, the usual STFT analysis window
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos())
        .collect()
}
