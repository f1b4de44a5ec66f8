//! Frequency-domain feature set: AR spectrum summary and EWT band features

use crate::ewt::{boundaries_from_peaks, empirical_wavelet_transform, find_peaks, PeakCriteria};
use crate::features::{FeatureFunction, FeatureRow};
use crate::stats;
use anyhow::{bail, ensure};
use mhealth_core::{SensorError, SensorResult};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of frequencies the AR spectrum is evaluated at
pub const SPECTRUM_BINS: usize = 500;

/// Autoregressive spectral density estimate
#[derive(Debug, Clone, PartialEq)]
pub struct ArSpectrum {
    /// Evaluation frequencies in Hz, ascending, ending at Nyquist
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
    /// Selected model order
    pub order: usize,
    /// Innovation variance of the selected model
    pub variance: f64,
}

/// Yule-Walker fit with the order chosen by AIC.
///
/// The maximum order is `min(n - 1, floor(10 log10 n))`; the density is
/// evaluated at `n_freqs` evenly spaced frequencies in (0, fs/2].
pub fn ar_spectrum(values: &[f64], sampling_rate: f64, n_freqs: usize) -> anyhow::Result<ArSpectrum> {
    let n = values.len();
    ensure!(n >= 4, "need at least four samples, got {}", n);
    ensure!(values.iter().all(|v| v.is_finite()), "non-finite samples");
    ensure!(sampling_rate > 0.0, "sampling rate must be positive");

    let max_order = (n - 1).min((10.0 * (n as f64).log10()).floor() as usize);
    let mean = stats::mean(values);
    let acov: Vec<f64> = (0..=max_order)
        .map(|lag| {
            (0..n - lag)
                .map(|i| (values[i] - mean) * (values[i + lag] - mean))
                .sum::<f64>()
                / n as f64
        })
        .collect();
    if acov[0] <= 0.0 {
        bail!("signal has zero variance");
    }

    let (coefficients, variance) = select_order(&acov, n);
    let order = coefficients.len();

    let nyquist = sampling_rate / 2.0;
    let freqs: Vec<f64> = (1..=n_freqs).map(|k| nyquist * k as f64 / n_freqs as f64).collect();
    let power = freqs
        .iter()
        .map(|f| {
            let omega = 2.0 * PI * f / sampling_rate;
            let transfer = coefficients
                .iter()
                .enumerate()
                .fold(Complex::new(1.0, 0.0), |acc, (j, phi)| {
                    acc - Complex::from_polar(*phi, -omega * (j + 1) as f64)
                });
            variance / (sampling_rate * transfer.norm_sqr())
        })
        .collect();

    Ok(ArSpectrum {
        freqs,
        power,
        order,
        variance,
    })
}

/// Levinson-Durbin recursion over every order, keeping the AIC minimum
fn select_order(acov: &[f64], n: usize) -> (Vec<f64>, f64) {
    let max_order = acov.len() - 1;
    let mut best = (Vec::new(), acov[0]);
    let mut best_aic = n as f64 * acov[0].ln();

    let mut phi: Vec<f64> = Vec::new();
    let mut variance = acov[0];
    for m in 1..=max_order {
        let reflection = (acov[m] - phi.iter().enumerate().map(|(j, p)| p * acov[m - 1 - j]).sum::<f64>()) / variance;
        let mut next: Vec<f64> = phi
            .iter()
            .enumerate()
            .map(|(j, p)| p - reflection * phi[m - 2 - j])
            .collect();
        next.push(reflection);
        phi = next;
        variance *= 1.0 - reflection * reflection;
        if variance <= 0.0 {
            break;
        }

        let aic = n as f64 * variance.ln() + 2.0 * m as f64;
        if aic < best_aic {
            best_aic = aic;
            best = (phi.clone(), variance);
        }
    }
    best
}

/// Column names for a given peak count
pub fn frequency_feature_names(n_peaks: usize) -> Vec<String> {
    let mut names: Vec<String> = SPECTRUM_COLUMNS.iter().map(|c| c.to_string()).collect();
    for band in 1..=n_peaks + 1 {
        names.push(format!("ewt_energy_{}", band));
        names.push(format!("ewt_entropy_{}", band));
    }
    names
}

const SPECTRUM_COLUMNS: [&str; 13] = [
    "spec_mean",
    "spec_sd",
    "spec_sem",
    "spec_median",
    "spec_mode",
    "spec_q25",
    "spec_q75",
    "spec_iqr",
    "spec_cv",
    "spec_skewness",
    "spec_kurtosis",
    "spec_flatness",
    "spec_entropy",
];

/// Summary of the AR spectrum as a distribution over frequency
fn spectrum_summary(spectrum: &ArSpectrum) -> [f64; 13] {
    let (freqs, power) = (&spectrum.freqs, &spectrum.power);
    let total: f64 = power.iter().sum();
    let weights: Vec<f64> = power.iter().map(|p| p / total).collect();

    let mean: f64 = freqs.iter().zip(&weights).map(|(f, w)| f * w).sum();
    let moment = |k: i32| -> f64 {
        freqs
            .iter()
            .zip(&weights)
            .map(|(f, w)| (f - mean).powi(k) * w)
            .sum()
    };
    let sd = moment(2).sqrt();
    let q25 = stats::weighted_quantile(freqs, power, 0.25);
    let q75 = stats::weighted_quantile(freqs, power, 0.75);
    let mode = freqs
        .iter()
        .zip(power)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(f64::NAN, |(f, _)| *f);

    let n = power.len() as f64;
    let log_mean = power.iter().map(|p| p.ln()).sum::<f64>() / n;
    let flatness = log_mean.exp() / (total / n);
    let entropy = -weights
        .iter()
        .filter(|w| **w > 0.0)
        .map(|w| w * w.log2())
        .sum::<f64>();

    [
        mean,
        sd,
        sd / n.sqrt(),
        stats::weighted_quantile(freqs, power, 0.5),
        mode,
        q25,
        q75,
        q75 - q25,
        sd / mean,
        moment(3) / sd.powi(3),
        moment(4) / sd.powi(4),
        flatness,
        entropy,
    ]
}

/// Relative energy and energy entropy of each EWT component
fn band_statistics(components: &[Vec<f64>]) -> Vec<(f64, f64)> {
    let energies: Vec<f64> = components
        .iter()
        .map(|c| c.iter().map(|v| v * v).sum())
        .collect();
    let total: f64 = energies.iter().sum();

    components
        .iter()
        .zip(&energies)
        .map(|(component, &energy)| {
            if energy <= 0.0 {
                return (0.0, 0.0);
            }
            let entropy = -component
                .iter()
                .map(|v| v * v / energy)
                .filter(|p| *p > 0.0)
                .map(|p| p * p.ln())
                .sum::<f64>();
            (energy / total, entropy)
        })
        .collect()
}

/// AR-spectrum summary plus EWT band features for one signal.
///
/// Bands beyond the number of peaks actually found are reported as NaN so the
/// column set depends only on `n_peaks`.
pub fn frequency_domain_summary(values: &[f64], sampling_rate: f64, n_peaks: usize) -> anyhow::Result<FeatureRow> {
    let spectrum = ar_spectrum(values, sampling_rate, SPECTRUM_BINS)?;
    let summary = spectrum_summary(&spectrum);

    let peaks: Vec<f64> = find_peaks(&spectrum.power, n_peaks, PeakCriteria::default())
        .into_iter()
        .map(|i| spectrum.freqs[i])
        .collect();
    let boundaries = boundaries_from_peaks(&peaks);
    let components = empirical_wavelet_transform(values, sampling_rate, &boundaries)?;
    let bands = band_statistics(&components);

    let names = frequency_feature_names(n_peaks);
    let mut row = FeatureRow::new();
    for (name, value) in names.iter().zip(summary) {
        row.push(name, value);
    }
    for (band, name_pair) in names[SPECTRUM_COLUMNS.len()..].chunks(2).enumerate() {
        let (energy, entropy) = bands.get(band).copied().unwrap_or((f64::NAN, f64::NAN));
        row.push(&name_pair[0], energy);
        row.push(&name_pair[1], entropy);
    }
    Ok(row)
}

/// [`frequency_domain_summary`] as a pluggable feature function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyDomainFeatures {
    sampling_rate: f64,
    n_peaks: usize,
}

impl FrequencyDomainFeatures {
    pub fn new(sampling_rate: f64, n_peaks: usize) -> SensorResult<Self> {
        if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
            return Err(SensorError::config(format!("invalid sampling rate {}", sampling_rate)));
        }
        if n_peaks == 0 {
            return Err(SensorError::config("n_peaks must be at least 1"));
        }
        Ok(FrequencyDomainFeatures {
            sampling_rate,
            n_peaks,
        })
    }
}

impl FeatureFunction for FrequencyDomainFeatures {
    fn name(&self) -> &str {
        "frequency_domain_summary"
    }

    fn extract(&self, values: &[f64]) -> anyhow::Result<FeatureRow> {
        frequency_domain_summary(values, self.sampling_rate, self.n_peaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn ar2(n: usize, seed: u64) -> Vec<f64> {
        // x[t] = 1.2 x[t-1] - 0.5 x[t-2] + e[t]
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut x = vec![0.0; n + 100];
        for t in 2..x.len() {
            x[t] = 1.2 * x[t - 1] - 0.5 * x[t - 2] + noise.sample(&mut rng);
        }
        x.split_off(100)
    }

    fn tone(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn test_yule_walker_recovers_ar2() {
        let spectrum = ar_spectrum(&ar2(4000, 7), 100.0, SPECTRUM_BINS).unwrap();
        assert!(spectrum.order >= 2);
        assert!((spectrum.variance - 1.0).abs() < 0.1);
        assert_eq!(spectrum.freqs.len(), SPECTRUM_BINS);
        assert_eq!(*spectrum.freqs.last().unwrap(), 50.0);
    }

    #[test]
    fn test_ar_spectrum_peaks_near_tone() {
        let fs = 100.0;
        let mut values = tone(10.0, fs, 512);
        for (i, v) in values.iter_mut().enumerate() {
            *v += 0.05 * ((i * 7919 % 101) as f64 / 101.0 - 0.5);
        }
        let spectrum = ar_spectrum(&values, fs, SPECTRUM_BINS).unwrap();
        let summary = spectrum_summary(&spectrum);
        // spec_mode
        assert!((summary[4] - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_constant_signal_fails() {
        assert!(ar_spectrum(&[1.0; 64], 50.0, SPECTRUM_BINS).is_err());
        assert!(ar_spectrum(&[1.0, 2.0], 50.0, SPECTRUM_BINS).is_err());
    }

    #[test]
    fn test_feature_columns_fixed_by_n_peaks() {
        let fs = 100.0;
        let values: Vec<f64> = tone(3.0, fs, 600)
            .iter()
            .zip(tone(17.0, fs, 600))
            .zip(ar2(600, 3))
            .map(|((a, b), e)| a + b + 0.1 * e)
            .collect();
        let row = frequency_domain_summary(&values, fs, 3).unwrap();

        assert_eq!(row.names(), frequency_feature_names(3).as_slice());
        assert_eq!(row.len(), 13 + 2 * 4);
        let energies: Vec<f64> = (1..=4)
            .filter_map(|b| row.get(&format!("ewt_energy_{}", b)))
            .filter(|e| !e.is_nan())
            .collect();
        assert!(energies.len() >= 2);
        assert!((energies.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_function_validation() {
        assert!(FrequencyDomainFeatures::new(0.0, 3).is_err());
        assert!(FrequencyDomainFeatures::new(100.0, 0).is_err());
        let f = FrequencyDomainFeatures::new(100.0, 2).unwrap();
        assert!(f.extract(&[0.0; 3]).is_err());
    }
}
