//! Empirical mode decomposition (Hilbert-Huang sifting)

use crate::stage::{settle, StageFailure, StageKind, TransformStage};
use anyhow::bail;
use mhealth_core::{columns, ColumnData, Outcome, SensorError, SensorResult, TidyTable};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Oscillatory components of a signal plus the remaining trend.
///
/// `imfs` plus `residual` sum back to the input sample by sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub imfs: Vec<Vec<f64>>,
    pub residual: Vec<f64>,
}

/// Capability: split a real vector into at most `max_imfs` components
pub trait ModeDecomposer: Send + Sync {
    fn decompose(&self, values: &[f64], max_imfs: usize) -> anyhow::Result<Decomposition>;
}

/// Classic sifting with natural cubic spline envelopes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiftingDecomposer {
    /// Sifting iterations per IMF
    pub max_sifts: usize,
    /// Stop sifting once the envelope mean's RMS falls below this fraction of
    /// the input's standard deviation
    pub tolerance: f64,
}

impl Default for SiftingDecomposer {
    fn default() -> Self {
        SiftingDecomposer {
            max_sifts: 20,
            tolerance: 0.01,
        }
    }
}

impl ModeDecomposer for SiftingDecomposer {
    fn decompose(&self, values: &[f64], max_imfs: usize) -> anyhow::Result<Decomposition> {
        if values.iter().any(|v| !v.is_finite()) {
            bail!("cannot decompose a signal with non-finite samples");
        }
        let threshold = self.tolerance * rms_about_mean(values);

        let mut residual = values.to_vec();
        let mut imfs = Vec::new();
        while imfs.len() < max_imfs {
            let (maxima, minima) = extrema(&residual);
            if maxima.len() < 2 || minima.len() < 2 {
                break;
            }

            let mut candidate = residual.clone();
            for _ in 0..self.max_sifts {
                let (maxima, minima) = extrema(&candidate);
                if maxima.len() < 2 || minima.len() < 2 {
                    break;
                }
                let upper = envelope(&candidate, &maxima);
                let lower = envelope(&candidate, &minima);
                let mut mean_power = 0.0;
                for ((c, u), l) in candidate.iter_mut().zip(&upper).zip(&lower) {
                    let m = 0.5 * (u + l);
                    *c -= m;
                    mean_power += m * m;
                }
                if (mean_power / values.len() as f64).sqrt() < threshold {
                    break;
                }
            }

            for (r, c) in residual.iter_mut().zip(&candidate) {
                *r -= c;
            }
            imfs.push(candidate);
        }

        Ok(Decomposition { imfs, residual })
    }
}

fn rms_about_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Indices of local maxima and minima.
///
/// A plateau counts once, at its first sample, and only when the signal
/// falls (or rises) again on its far side; flat steps are not extrema.
fn extrema(values: &[f64]) -> (Vec<usize>, Vec<usize>) {
    let mut maxima = Vec::new();
    let mut minima = Vec::new();
    let n = values.len();
    let mut i = 1;
    while i + 1 < n {
        let (prev, here) = (values[i - 1], values[i]);
        if here == prev {
            i += 1;
            continue;
        }
        let mut exit = i + 1;
        while exit < n && values[exit] == here {
            exit += 1;
        }
        if exit == n {
            break;
        }
        let next = values[exit];
        if here > prev && here > next {
            maxima.push(i);
        } else if here < prev && here < next {
            minima.push(i);
        }
        i = exit;
    }
    (maxima, minima)
}

/// Spline through the given extrema, pinned to the signal's end samples
fn envelope(values: &[f64], knots: &[usize]) -> Vec<f64> {
    let last = values.len() - 1;
    let mut xs = Vec::with_capacity(knots.len() + 2);
    let mut ys = Vec::with_capacity(knots.len() + 2);
    if knots.first() != Some(&0) {
        xs.push(0.0);
        ys.push(values[0]);
    }
    for &k in knots {
        xs.push(k as f64);
        ys.push(values[k]);
    }
    if knots.last() != Some(&last) {
        xs.push(last as f64);
        ys.push(values[last]);
    }
    natural_cubic_spline(&xs, &ys, values.len())
}

/// Evaluate a natural cubic spline through `(xs, ys)` at `0..n_out`.
///
/// `xs` must be strictly increasing with at least two points.
fn natural_cubic_spline(xs: &[f64], ys: &[f64], n_out: usize) -> Vec<f64> {
    let k = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

    // second derivatives; zero at both ends
    let mut m = vec![0.0; k];
    if k > 2 {
        let inner = k - 2;
        let mut diag = vec![0.0; inner];
        let mut rhs = vec![0.0; inner];
        for i in 0..inner {
            diag[i] = 2.0 * (h[i] + h[i + 1]);
            rhs[i] = 6.0 * ((ys[i + 2] - ys[i + 1]) / h[i + 1] - (ys[i + 1] - ys[i]) / h[i]);
        }
        // Thomas algorithm; off-diagonals are h[i + 1]
        for i in 1..inner {
            let factor = h[i] / diag[i - 1];
            diag[i] -= factor * h[i];
            rhs[i] -= factor * rhs[i - 1];
        }
        m[inner] = rhs[inner - 1] / diag[inner - 1];
        for i in (0..inner - 1).rev() {
            m[i + 1] = (rhs[i] - h[i + 1] * m[i + 2]) / diag[i];
        }
    }

    let mut out = Vec::with_capacity(n_out);
    let mut seg = 0;
    for i in 0..n_out {
        let x = i as f64;
        while seg + 2 < k && x > xs[seg + 1] {
            seg += 1;
        }
        let (x0, x1, hs) = (xs[seg], xs[seg + 1], h[seg]);
        let a = (x1 - x) / hs;
        let b = (x - x0) / hs;
        out.push(
            a * ys[seg]
                + b * ys[seg + 1]
                + ((a * a * a - a) * m[seg] + (b * b * b - b) * m[seg + 1]) * hs * hs / 6.0,
        );
    }
    out
}

/// Decomposes `value` per group into IMFs stacked under a new `imf` key
#[derive(Clone)]
pub struct ImfStage {
    max_imfs: usize,
    decomposer: Arc<dyn ModeDecomposer>,
}

impl fmt::Debug for ImfStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImfStage").field("max_imfs", &self.max_imfs).finish()
    }
}

impl ImfStage {
    pub fn new(max_imfs: usize) -> SensorResult<Self> {
        Self::with_decomposer(max_imfs, Arc::new(SiftingDecomposer::default()))
    }

    pub fn with_decomposer(max_imfs: usize, decomposer: Arc<dyn ModeDecomposer>) -> SensorResult<Self> {
        if max_imfs == 0 {
            return Err(SensorError::config("max_imfs must be at least 1"));
        }
        Ok(ImfStage { max_imfs, decomposer })
    }

    pub fn max_imfs(&self) -> usize {
        self.max_imfs
    }
}

impl TransformStage for ImfStage {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        if input.has_column(columns::IMF) {
            return Err(SensorError::config("table is already decomposed into IMFs"));
        }

        let result = input.map_groups(|_, sub| -> Result<TidyTable, StageFailure> {
            let values = sub.floats(columns::VALUE)?;
            let decomposition = match self.decomposer.decompose(values, self.max_imfs) {
                Ok(d) if !d.imfs.is_empty() => d,
                Ok(_) => return Err(StageFailure::Soft("IMF error")),
                Err(e) => {
                    debug!(error = %e, "decomposition failed");
                    return Err(StageFailure::Soft("IMF error"));
                }
            };

            let n = sub.n_rows();
            let parts = decomposition
                .imfs
                .into_iter()
                .enumerate()
                .map(|(i, imf)| {
                    sub.clone()
                        .with_column(columns::VALUE, ColumnData::Float(imf))?
                        .with_column(columns::IMF, ColumnData::Index(vec![i + 1; n]))
                })
                .collect::<SensorResult<Vec<_>>>()?;
            Ok(TidyTable::concat(parts)?)
        });

        match settle(result)? {
            Outcome::Valid(table) => Ok(Outcome::Valid(table.add_group_key(columns::IMF)?)),
            error => Ok(error),
        }
    }

    fn name(&self) -> &str {
        "IMF"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Decomposition
    }
}
