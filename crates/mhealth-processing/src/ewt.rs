//! Empirical wavelet transform: peak-driven spectrum partitioning

use anyhow::ensure;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::FRAC_PI_2;

/// Stand-in for a boundary that falls exactly on 0 Hz
pub const ZERO_BOUNDARY: f64 = 1e-8;

/// Peak detection thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCriteria {
    /// Minimum height as a fraction of the spectrum maximum
    pub min_relative_height: f64,
    /// Minimum distance between accepted peaks, in bins
    pub min_distance: usize,
}

impl Default for PeakCriteria {
    fn default() -> Self {
        PeakCriteria {
            min_relative_height: 0.1,
            min_distance: 2,
        }
    }
}

/// Indices of the `n_peaks` highest local maxima, in ascending index order.
///
/// Candidates are strict local maxima at or above the relative height
/// threshold; they are accepted tallest first, skipping any closer than
/// `min_distance` bins to one already accepted.
pub fn find_peaks(spectrum: &[f64], n_peaks: usize, criteria: PeakCriteria) -> Vec<usize> {
    let max = spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) || n_peaks == 0 {
        return Vec::new();
    }
    let floor = criteria.min_relative_height * max;

    let mut candidates: Vec<usize> = (1..spectrum.len().saturating_sub(1))
        .filter(|&i| {
            spectrum[i] > spectrum[i - 1] && spectrum[i] >= spectrum[i + 1] && spectrum[i] >= floor
        })
        .collect();
    candidates.sort_by(|&a, &b| spectrum[b].total_cmp(&spectrum[a]));

    let mut accepted: Vec<usize> = Vec::with_capacity(n_peaks);
    for i in candidates {
        if accepted.len() == n_peaks {
            break;
        }
        if accepted.iter().all(|&j| i.abs_diff(j) >= criteria.min_distance) {
            accepted.push(i);
        }
    }
    accepted.sort_unstable();
    accepted
}

/// Band boundaries halfway between consecutive peaks, starting from 0 Hz.
///
/// `k` peaks give `k` boundaries and therefore `k + 1` bands.
pub fn boundaries_from_peaks(peak_freqs: &[f64]) -> Vec<f64> {
    let mut sorted = peak_freqs.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut previous = 0.0;
    sorted
        .into_iter()
        .map(|p| {
            let boundary = 0.5 * (previous + p);
            previous = p;
            if boundary <= 0.0 {
                ZERO_BOUNDARY
            } else {
                boundary
            }
        })
        .collect()
}

/// Transition width `gamma = min (w[n+1] - w[n]) / (w[n+1] + w[n])` over the
/// boundaries followed by Nyquist, capped at 1
pub fn transition_gamma(boundaries: &[f64], nyquist: f64) -> f64 {
    boundaries
        .iter()
        .chain(std::iter::once(&nyquist))
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| (w[1] - w[0]) / (w[1] + w[0]))
        .fold(1.0, f64::min)
        .max(0.0)
}

/// Smooth step from 0 to 1 on [0, 1]
pub fn beta(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x.powi(4) * (35.0 - 84.0 * x + 70.0 * x * x - 20.0 * x * x * x)
}

fn falling_edge(f: f64, edge: f64, gamma: f64) -> f64 {
    let (lo, hi) = ((1.0 - gamma) * edge, (1.0 + gamma) * edge);
    if f <= lo {
        1.0
    } else if f >= hi {
        0.0
    } else {
        (FRAC_PI_2 * beta((f - lo) / (2.0 * gamma * edge))).cos()
    }
}

fn rising_edge(f: f64, edge: f64, gamma: f64) -> f64 {
    let (lo, hi) = ((1.0 - gamma) * edge, (1.0 + gamma) * edge);
    if f <= lo {
        0.0
    } else if f >= hi {
        1.0
    } else {
        (FRAC_PI_2 * beta((f - lo) / (2.0 * gamma * edge))).sin()
    }
}

/// Frequency response of band `band` at `f` Hz.
///
/// Band 0 is the scaling function below the first boundary; band `n` sits
/// between boundaries `n - 1` and `n`, the last one open up to Nyquist.
pub fn band_response(f: f64, band: usize, boundaries: &[f64], gamma: f64) -> f64 {
    let lower = band.checked_sub(1).map(|i| boundaries[i]);
    let upper = boundaries.get(band).copied();
    let rise = lower.map_or(1.0, |l| rising_edge(f, l, gamma));
    let fall = upper.map_or(1.0, |u| falling_edge(f, u, gamma));
    rise * fall
}

/// Band-limited components of `values`, one per band (`boundaries.len() + 1`).
///
/// Each band's response is applied to both halves of the two-sided spectrum.
pub fn empirical_wavelet_transform(values: &[f64], sampling_rate: f64, boundaries: &[f64]) -> anyhow::Result<Vec<Vec<f64>>> {
    let n = values.len();
    ensure!(n >= 2, "need at least two samples, got {}", n);
    let nyquist = sampling_rate / 2.0;
    let gamma = transition_gamma(boundaries, nyquist);

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut spectrum: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
    forward.process(&mut spectrum);

    let freqs: Vec<f64> = (0..n)
        .map(|k| (if k <= n / 2 { k } else { n - k }) as f64 * sampling_rate / n as f64)
        .collect();

    let mut components = Vec::with_capacity(boundaries.len() + 1);
    for band in 0..=boundaries.len() {
        let mut filtered: Vec<Complex<f64>> = spectrum
            .iter()
            .zip(&freqs)
            .map(|(bin, &f)| bin * band_response(f, band, boundaries, gamma))
            .collect();
        inverse.process(&mut filtered);
        components.push(filtered.iter().map(|c| c.re / n as f64).collect());
    }
    Ok(components)
}
