//! Time selection, detrending and band-pass filtering stages

use crate::loess::loess_residuals;
use crate::stage::{settle, StageFailure, StageKind, TransformStage};
use crate::window::WindowShape;
use mhealth_core::{
    columns, sampling_rate, ColumnData, Outcome, SensorError, SensorResult, TidyTable,
};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Keep rows with `t1 <= t <= t2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeFilter {
    pub t1: f64,
    pub t2: f64,
}

impl TimeFilter {
    pub fn new(t1: f64, t2: f64) -> Self {
        TimeFilter { t1, t2 }
    }
}

/// Retain the rows of `table` whose timestamp lies within `[t1, t2]`
pub fn filter_time(table: &TidyTable, t1: f64, t2: f64) -> Outcome {
    let t = match table.floats(columns::T) {
        Ok(t) => t,
        Err(_) => return Outcome::error("Not enough time samples"),
    };
    let filtered = table.filter_rows(|i| t[i] >= t1 && t[i] <= t2);
    if filtered.is_empty() {
        return Outcome::error("Not enough time samples");
    }
    Outcome::Valid(filtered)
}

impl TransformStage for TimeFilter {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        Ok(filter_time(input, self.t1, self.t2))
    }

    fn name(&self) -> &str {
        "Time Filter"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Selection
    }
}

/// Replace `value` with its residual from a LOESS fit against `t`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detrend {
    pub span: f64,
    pub degree: usize,
}

impl Default for Detrend {
    fn default() -> Self {
        Detrend { span: 0.75, degree: 2 }
    }
}

impl Detrend {
    pub fn new(span: f64, degree: usize) -> SensorResult<Self> {
        if !(span > 0.0 && span <= 1.0) {
            return Err(SensorError::config(format!("detrend span must be in (0, 1], got {}", span)));
        }
        if !(1..=2).contains(&degree) {
            return Err(SensorError::config(format!("detrend degree must be 1 or 2, got {}", degree)));
        }
        Ok(Detrend { span, degree })
    }
}

impl TransformStage for Detrend {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        let result = input.map_groups(|_, sub| -> Result<TidyTable, StageFailure> {
            let t = sub.floats(columns::T)?;
            let values = sub.floats(columns::VALUE)?;
            let residuals = loess_residuals(t, values, self.span, self.degree)
                .ok_or(StageFailure::Soft("Detrend error"))?;
            Ok(sub.with_column(columns::VALUE, ColumnData::Float(residuals))?)
        });
        settle(result)
    }

    fn name(&self) -> &str {
        "Detrend"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Filter
    }
}

/// Windowed-sinc band-pass FIR taps of length `window_length`.
///
/// Cut-offs are validated against the Nyquist frequency; the response is
/// normalised to unit gain at the centre of the pass band.
pub fn design_bandpass(
    window_length: usize,
    sampling_rate: f64,
    freq_range: (f64, f64),
    shape: WindowShape,
) -> SensorResult<Vec<f64>> {
    let (f_low, f_high) = freq_range;
    let nyquist = sampling_rate / 2.0;
    if !(sampling_rate > 0.0) {
        return Err(SensorError::config(format!(
            "sampling rate must be positive, got {}",
            sampling_rate
        )));
    }
    if f_low >= nyquist || f_high >= nyquist {
        return Err(SensorError::config(format!(
            "band-pass range [{}, {}] Hz must lie below the Nyquist frequency {} Hz",
            f_low, f_high, nyquist
        )));
    }
    validate_band(window_length, freq_range)?;

    let w1 = f_low / nyquist;
    let w2 = f_high / nyquist;
    let taper = shape.coefficients(window_length);
    let half = (window_length - 1) as f64 / 2.0;

    let mut taps: Vec<f64> = (0..window_length)
        .map(|k| {
            let m = k as f64 - half;
            (w2 * sinc(w2 * m) - w1 * sinc(w1 * m)) * taper[k]
        })
        .collect();

    let centre = (w1 + w2) / 2.0;
    let gain = taps
        .iter()
        .enumerate()
        .map(|(k, &h)| h * Complex::new(0.0, -PI * centre * k as f64).exp())
        .sum::<Complex<f64>>()
        .norm();
    if gain > 0.0 {
        taps.iter_mut().for_each(|h| *h /= gain);
    }
    Ok(taps)
}

fn validate_band(window_length: usize, (f_low, f_high): (f64, f64)) -> SensorResult<()> {
    if window_length < 2 {
        return Err(SensorError::config("band-pass window length must be at least 2"));
    }
    if !(f_low >= 0.0 && f_low < f_high) {
        return Err(SensorError::config(format!(
            "band-pass range must satisfy 0 <= f_low < f_high, got [{}, {}]",
            f_low, f_high
        )));
    }
    Ok(())
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Causal FIR filtering `y[n] = sum_k b[k] x[n - k]`
pub fn fir_filter(taps: &[f64], input: &[f64]) -> Vec<f64> {
    (0..input.len())
        .map(|n| {
            taps.iter()
                .take(n + 1)
                .enumerate()
                .map(|(k, b)| b * input[n - k])
                .sum()
        })
        .collect()
}

/// Zero-phase forward-backward FIR filtering.
///
/// The signal is padded with `2 * taps.len()` trailing zeros, filtered,
/// reversed, filtered again and reversed back, then cut to its input length.
pub fn filtfilt(taps: &[f64], input: &[f64]) -> Vec<f64> {
    let mut padded = input.to_vec();
    padded.resize(input.len() + 2 * taps.len(), 0.0);

    let mut forward = fir_filter(taps, &padded);
    forward.reverse();
    let mut backward = fir_filter(taps, &forward);
    backward.reverse();
    backward.truncate(input.len());
    backward
}

/// Band-pass a vector; NaN input is rejected as malformed
pub fn bandpass(
    values: &[f64],
    window_length: usize,
    sampling_rate: f64,
    freq_range: (f64, f64),
    shape: WindowShape,
) -> SensorResult<Vec<f64>> {
    let taps = design_bandpass(window_length, sampling_rate, freq_range, shape)?;
    if values.iter().any(|v| v.is_nan()) {
        return Err(SensorError::malformed("cannot band-pass a signal with missing values"));
    }
    Ok(filtfilt(&taps, values))
}

/// Band-pass stage; the sampling rate is re-derived from each group's `t`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandpassFilter {
    pub window_length: usize,
    pub freq_range: (f64, f64),
    pub shape: WindowShape,
}

impl BandpassFilter {
    pub fn new(window_length: usize, freq_range: (f64, f64)) -> SensorResult<Self> {
        validate_band(window_length, freq_range)?;
        Ok(BandpassFilter {
            window_length,
            freq_range,
            shape: WindowShape::Hamming,
        })
    }

    pub fn with_shape(mut self, shape: WindowShape) -> Self {
        self.shape = shape;
        self
    }
}

impl TransformStage for BandpassFilter {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        let result = input.map_groups(|_, sub| -> Result<TidyTable, StageFailure> {
            let t = sub.floats(columns::T)?;
            let values = sub.floats(columns::VALUE)?;
            let fs = sampling_rate(t).ok_or(StageFailure::Soft("Bandpass filter error"))?;
            let taps = design_bandpass(self.window_length, fs, self.freq_range, self.shape)?;
            if values.iter().any(|v| v.is_nan()) {
                return Err(StageFailure::Soft("Bandpass filter error"));
            }
            debug!(sampling_rate = fs, taps = taps.len(), "band-pass group");
            let filtered = filtfilt(&taps, values);
            Ok(sub.with_column(columns::VALUE, ColumnData::Float(filtered))?)
        });
        settle(result)
    }

    fn name(&self) -> &str {
        "Band-pass Filter"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhealth_core::{tidy_sensor_data, SensorRecording};
    use proptest::prelude::*;

    fn tone(freqs: &[f64], fs: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
        let t: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
        let v = t
            .iter()
            .map(|ti| freqs.iter().map(|f| (2.0 * PI * f * ti).sin()).sum())
            .collect();
        (t, v)
    }

    fn rms(values: &[f64]) -> f64 {
        (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
    }

    fn table(n: usize) -> TidyTable {
        let (t, v) = tone(&[5.0], 100.0, n);
        let drift: Vec<f64> = t.iter().map(|ti| 0.3 * ti).collect();
        let y: Vec<f64> = v.iter().zip(&drift).map(|(a, b)| a + b).collect();
        tidy_sensor_data(&SensorRecording::new(t).with_channel("x", v).with_channel("y", y)).unwrap()
    }

    #[test]
    fn test_time_filter_bounds_inclusive() {
        let filtered = filter_time(&table(100), 0.1, 0.2).into_result().unwrap();
        assert_eq!(filtered.n_rows(), 2 * 11);
        assert_eq!(filtered.group_keys(), &["axis".to_string()]);
    }

    #[test]
    fn test_time_filter_empty_range() {
        let outcome = filter_time(&table(100), 50.0, 60.0);
        assert_eq!(outcome.error_message(), Some("Not enough time samples"));
    }

    #[test]
    fn test_time_filter_without_t() {
        let outcome = filter_time(&table(10).without_column(columns::T), 0.0, 1.0);
        assert_eq!(outcome.error_message(), Some("Not enough time samples"));
    }

    #[test]
    fn test_detrend_removes_drift() {
        let detrended = Detrend::default().process(&table(400)).unwrap().into_result().unwrap();
        let values = detrended.floats(columns::VALUE).unwrap();
        let y = &values[400..];
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!(mean.abs() < 0.05);
    }

    #[test]
    fn test_detrend_too_few_points() {
        let outcome = Detrend::default().process(&table(3)).unwrap();
        assert_eq!(outcome.error_message(), Some("Detrend error"));
    }

    #[test]
    fn test_design_rejects_above_nyquist() {
        let error = design_bandpass(64, 100.0, (1.0, 50.0), WindowShape::Hamming).unwrap_err();
        assert!(error.is_configuration());
        assert!(design_bandpass(64, 100.0, (10.0, 5.0), WindowShape::Hamming).is_err());
    }

    #[test]
    fn test_bandpass_unit_gain_at_centre() {
        let taps = design_bandpass(129, 100.0, (8.0, 12.0), WindowShape::Hamming).unwrap();
        let (_, v) = tone(&[10.0], 100.0, 2000);
        let filtered = filtfilt(&taps, &v);
        let ratio = rms(&filtered[300..1700]) / rms(&v[300..1700]);
        assert!((ratio - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_bandpass_attenuates_out_of_band() {
        let (_, v) = tone(&[2.0, 10.0, 40.0], 100.0, 2000);
        let filtered = bandpass(&v, 129, 100.0, (8.0, 12.0), WindowShape::Hamming).unwrap();
        let (_, pure) = tone(&[10.0], 100.0, 2000);
        let residual: Vec<f64> = filtered.iter().zip(&pure).map(|(a, b)| a - b).collect();
        assert!(rms(&residual[300..1700]) < 0.1);
    }

    #[test]
    fn test_filtfilt_is_zero_phase() {
        let taps = design_bandpass(65, 100.0, (3.0, 8.0), WindowShape::Hamming).unwrap();
        let (_, v) = tone(&[5.0], 100.0, 1000);
        let filtered = filtfilt(&taps, &v);
        // peak of the filtered tone stays aligned with the input peak
        let peak_in = (400..420).max_by(|&a, &b| v[a].total_cmp(&v[b])).unwrap();
        let peak_out = (400..420).max_by(|&a, &b| filtered[a].total_cmp(&filtered[b])).unwrap();
        assert_eq!(peak_in, peak_out);
    }

    #[test]
    fn test_bandpass_vector_nan_raises() {
        let result = bandpass(&[0.0, f64::NAN, 1.0], 5, 100.0, (1.0, 10.0), WindowShape::Hamming);
        assert!(matches!(result, Err(SensorError::MalformedInput { .. })));
    }

    #[test]
    fn test_stage_nan_is_soft() {
        let input = table(50);
        let mut values = input.floats(columns::VALUE).unwrap().to_vec();
        values[3] = f64::NAN;
        let input = input.with_column(columns::VALUE, ColumnData::Float(values)).unwrap();

        let stage = BandpassFilter::new(16, (1.0, 10.0)).unwrap();
        let outcome = stage.process(&input).unwrap();
        assert_eq!(outcome.error_message(), Some("Bandpass filter error"));
    }

    #[test]
    fn test_stage_nyquist_is_hard() {
        let stage = BandpassFilter::new(16, (1.0, 60.0)).unwrap();
        assert!(stage.process(&table(200)).unwrap_err().is_configuration());
    }

    proptest! {
        #[test]
        fn prop_time_filter_idempotent(t1 in 0.0f64..1.0, width in 0.0f64..1.0) {
            let input = table(100);
            let once = filter_time(&input, t1, t1 + width);
            let twice = once.clone().and_then(|t| filter_time(&t, t1, t1 + width));
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_nyquist_rejected_every_call(f_high in 50.0f64..500.0) {
            for _ in 0..3 {
                let result = design_bandpass(32, 100.0, (1.0, f_high), WindowShape::Hamming);
                prop_assert!(result.unwrap_err().is_configuration());
            }
        }
    }
}
