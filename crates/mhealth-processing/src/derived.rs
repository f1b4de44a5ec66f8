//! Derived signals: unit conversion, derivative, integral, autocorrelation

use crate::stage::{settle, StageFailure, StageKind, TransformStage};
use mhealth_core::{columns, sampling_rate, ColumnData, Outcome, SensorResult, TidyTable};
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// Standard gravity in m/s^2
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Scaled first difference: `d[0] = 0`, `d[i] = (v[i] - v[i-1]) * fs`
pub fn derivative(values: &[f64], sampling_rate: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(0.0);
    out.extend(values.windows(2).map(|w| (w[1] - w[0]) * sampling_rate));
    out
}

/// Scaled cumulative sum: `I[i] = sum(v[0..=i]) / fs`
pub fn integral(values: &[f64], sampling_rate: f64) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc / sampling_rate)
        })
        .collect()
}

/// Sample autocorrelation at lags `0..n`, normalised so lag 0 is 1.
///
/// Uses the biased estimator (denominator n at every lag), computed through a
/// zero-padded real FFT. `None` for empty or constant input.
pub fn autocorrelation(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len();
    if n == 0 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let size = (2 * n).next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut input = forward.make_input_vec();
    for (slot, v) in input.iter_mut().zip(values) {
        *slot = v - mean;
    }
    let mut spectrum = forward.make_output_vec();
    forward.process(&mut input, &mut spectrum).ok()?;
    for bin in spectrum.iter_mut() {
        *bin = bin.norm_sqr().into();
    }
    let mut lags = inverse.make_output_vec();
    inverse.process(&mut spectrum, &mut lags).ok()?;

    let zero_lag = lags[0];
    if zero_lag <= f64::EPSILON * size as f64 {
        return None;
    }
    Some(lags[..n].iter().map(|r| r / zero_lag).collect())
}

/// Which calculus operation a [`DerivedMetric`] applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculus {
    Derivative,
    Integral,
}

/// Writes the derivative or integral of `source` into `target`, per group.
///
/// Chaining these yields jerk (derivative of acceleration), velocity
/// (integral) and displacement (integral of velocity) as named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub operation: Calculus,
    pub source: String,
    pub target: String,
}

impl DerivedMetric {
    pub fn derivative(source: &str, target: &str) -> Self {
        DerivedMetric {
            operation: Calculus::Derivative,
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    pub fn integral(source: &str, target: &str) -> Self {
        DerivedMetric {
            operation: Calculus::Integral,
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

impl TransformStage for DerivedMetric {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        let (failure, op): (&'static str, fn(&[f64], f64) -> Vec<f64>) = match self.operation {
            Calculus::Derivative => ("Derivative error", derivative),
            Calculus::Integral => ("Integral error", integral),
        };

        let result = input.map_groups(|_, sub| -> Result<TidyTable, StageFailure> {
            let t = sub.floats(columns::T)?;
            let values = sub.floats(&self.source)?;
            let fs = sampling_rate(t).ok_or(StageFailure::Soft(failure))?;
            let derived = op(values, fs);
            Ok(sub.with_column(&self.target, ColumnData::Float(derived))?)
        });
        settle(result)
    }

    fn name(&self) -> &str {
        match self.operation {
            Calculus::Derivative => "Derivative",
            Calculus::Integral => "Integral",
        }
    }
}

/// Replaces `value` with its autocorrelation sequence, per group
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Autocorrelation;

impl TransformStage for Autocorrelation {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        let result = input.map_groups(|_, sub| -> Result<TidyTable, StageFailure> {
            let values = sub.floats(columns::VALUE)?;
            let acf = autocorrelation(values).ok_or(StageFailure::Soft("Autocorrelation error"))?;
            Ok(sub.with_column(columns::VALUE, ColumnData::Float(acf))?)
        });
        settle(result)
    }

    fn name(&self) -> &str {
        "Autocorrelation"
    }
}

/// Converts accelerations reported in m/s^2 to multiples of g
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitToG;

impl TransformStage for UnitToG {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        let scaled: Vec<f64> = input
            .floats(columns::VALUE)?
            .iter()
            .map(|v| v / STANDARD_GRAVITY)
            .collect();
        Ok(Outcome::Valid(
            input.clone().with_column(columns::VALUE, ColumnData::Float(scaled))?,
        ))
    }

    fn name(&self) -> &str {
        "Unit to g"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhealth_core::{tidy_sensor_data, SensorRecording};
    use proptest::prelude::*;

    fn table() -> TidyTable {
        let t: Vec<f64> = (0..50).map(|i| i as f64 * 0.02).collect();
        let x: Vec<f64> = t.iter().map(|ti| ti * ti).collect();
        tidy_sensor_data(&SensorRecording::new(t).with_channel("x", x)).unwrap()
    }

    #[test]
    fn test_derivative_boundary() {
        assert_eq!(derivative(&[1.0, 3.0, 6.0], 10.0), vec![0.0, 20.0, 30.0]);
        assert!(derivative(&[], 10.0).is_empty());
    }

    #[test]
    fn test_integral_drops_initial_offset() {
        assert_eq!(integral(&[1.0, 2.0, 3.0], 2.0), vec![0.5, 1.5, 3.0]);
    }

    #[test]
    fn test_autocorrelation_matches_direct_sum() {
        let values = [1.0, 3.0, 2.0, 5.0, 4.0];
        let acf = autocorrelation(&values).unwrap();

        let mean = 3.0;
        let denom: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        for lag in 0..values.len() {
            let num: f64 = (0..values.len() - lag)
                .map(|i| (values[i] - mean) * (values[i + lag] - mean))
                .sum();
            assert!((acf[lag] - num / denom).abs() < 1e-9, "lag {}", lag);
        }
    }

    #[test]
    fn test_autocorrelation_constant_is_none() {
        assert!(autocorrelation(&[2.0; 16]).is_none());
        assert!(autocorrelation(&[]).is_none());
    }

    #[test]
    fn test_derived_metric_named_column() {
        let stage = DerivedMetric::derivative(columns::VALUE, "velocity");
        let out = stage.process(&table()).unwrap().into_result().unwrap();
        let velocity = out.floats("velocity").unwrap();

        assert_eq!(velocity[0], 0.0);
        // d(t^2)/dt at t = 0.5 is about 1.0 with a backward difference
        assert!((velocity[25] - 0.98).abs() < 1e-9);
        assert!(out.has_column(columns::VALUE));
    }

    #[test]
    fn test_derived_metric_single_sample_soft_fails() {
        let single = tidy_sensor_data(&SensorRecording::new(vec![0.0]).with_channel("x", vec![1.0])).unwrap();
        let outcome = DerivedMetric::integral(columns::VALUE, "velocity").process(&single).unwrap();
        assert_eq!(outcome.error_message(), Some("Integral error"));
    }

    #[test]
    fn test_autocorrelation_stage() {
        let out = Autocorrelation.process(&table()).unwrap().into_result().unwrap();
        assert!((out.floats(columns::VALUE).unwrap()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unit_to_g() {
        let t = vec![0.0, 1.0];
        let input = tidy_sensor_data(&SensorRecording::new(t).with_channel("z", vec![9.80665, 0.0])).unwrap();
        let out = UnitToG.process(&input).unwrap().into_result().unwrap();
        assert!((out.floats(columns::VALUE).unwrap()[0] - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_integral_inverts_derivative(
            values in prop::collection::vec(-1e3f64..1e3, 2..200),
            fs in 1.0f64..500.0,
        ) {
            let recovered = integral(&derivative(&values, fs), fs);
            for (r, v) in recovered.iter().zip(&values) {
                prop_assert!((r - (v - values[0])).abs() < 1e-6 * (1.0 + v.abs()));
            }
        }
    }
}
