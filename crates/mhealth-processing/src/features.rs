//! Grouped feature extraction and time-domain feature functions

use crate::stats;
use anyhow::{bail, ensure};
use mhealth_core::{ColumnData, KeyValue, SensorError, SensorResult, TidyTable};
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Column carrying the measurement name in a grouped feature table
pub const MEASUREMENT: &str = "measurement";

/// Ordered set of named scalar features for one group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a feature, replacing any earlier value of the same name
    pub fn push(&mut self, name: &str, value: f64) {
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.values[i] = value,
            None => {
                self.names.push(name.to_string());
                self.values.push(value);
            }
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names.iter().map(String::as_str).zip(self.values.iter().copied())
    }

    /// Merge another row into this one; later values win on name clashes
    pub fn extend(&mut self, other: FeatureRow) {
        for (name, value) in other.names.into_iter().zip(other.values) {
            self.push(&name, value);
        }
    }
}

/// Capability: numeric vector to a single row of named features
pub trait FeatureFunction: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, values: &[f64]) -> anyhow::Result<FeatureRow>;
}

/// Feature function backed by a closure
pub struct FnFeature<F> {
    name: String,
    f: F,
}

impl<F> FeatureFunction for FnFeature<F>
where
    F: Fn(&[f64]) -> anyhow::Result<FeatureRow> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, values: &[f64]) -> anyhow::Result<FeatureRow> {
        (self.f)(values)
    }
}

/// Wrap a closure as a feature function
pub fn feature_fn<F>(name: &str, f: F) -> FnFeature<F>
where
    F: Fn(&[f64]) -> anyhow::Result<FeatureRow> + Send + Sync,
{
    FnFeature {
        name: name.to_string(),
        f,
    }
}

/// One output row: the group's keys, its features and any captured failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub keys: Vec<KeyValue>,
    /// Aligned with [`FeatureTable::feature_names`]; NaN where a function failed
    pub values: Vec<f64>,
    pub error: Option<String>,
}

/// Features per group, joined across feature functions on the group keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub key_names: Vec<String>,
    pub measurement: Option<String>,
    pub feature_names: Vec<String>,
    pub records: Vec<FeatureRecord>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of one feature across all rows
    pub fn feature(&self, name: &str) -> Option<Vec<f64>> {
        let i = self.feature_names.iter().position(|n| n == name)?;
        Some(self.records.iter().map(|r| r.values[i]).collect())
    }

    /// Rows whose extraction failed for at least one function
    pub fn failed_rows(&self) -> usize {
        self.records.iter().filter(|r| r.error.is_some()).count()
    }

    /// Flatten into a tidy table: key columns, `measurement`, then features.
    ///
    /// Per-row error markers are dropped; read them from [`FeatureRecord::error`].
    pub fn to_table(&self) -> SensorResult<TidyTable> {
        let n = self.records.len();
        let mut table = TidyTable::new();
        for (k, name) in self.key_names.iter().enumerate() {
            let data = match self.records.first().map(|r| &r.keys[k]) {
                Some(KeyValue::Index(_)) => ColumnData::Index(
                    self.records
                        .iter()
                        .map(|r| match &r.keys[k] {
                            KeyValue::Index(i) => Ok(*i),
                            KeyValue::Label(_) => Err(SensorError::ColumnType {
                                column: name.clone(),
                                expected: "an index column",
                            }),
                        })
                        .collect::<SensorResult<_>>()?,
                ),
                _ => ColumnData::Label(self.records.iter().map(|r| r.keys[k].to_string()).collect()),
            };
            table = table.with_column(name, data)?;
        }
        if let Some(measurement) = &self.measurement {
            table = table.with_column(MEASUREMENT, ColumnData::Label(vec![measurement.clone(); n]))?;
        }
        for (i, name) in self.feature_names.iter().enumerate() {
            let column = self.records.iter().map(|r| r.values[i]).collect();
            table = table.with_column(name, ColumnData::Float(column))?;
        }
        let keys: Vec<&str> = self.key_names.iter().map(String::as_str).collect();
        table.group_by(&keys)
    }
}

/// Apply every feature function to `target` within each group.
///
/// One row per group, in group order. A failing function marks the row's
/// `error` and leaves its features NaN; other functions and other groups are
/// unaffected. Only structural problems with `target` are hard errors.
pub fn extract_grouped(
    table: &TidyTable,
    target: &str,
    functions: &[Arc<dyn FeatureFunction>],
    measurement: &str,
) -> SensorResult<FeatureTable> {
    let values = table.floats(target)?;
    let key_names = table.group_keys().to_vec();

    let mut feature_names: Vec<String> = Vec::new();
    let mut rows: Vec<(Vec<KeyValue>, FeatureRow, Option<String>)> = Vec::new();

    for group in table.groups() {
        let group_values: Vec<f64> = group.rows.iter().map(|&i| values[i]).collect();
        let mut merged = FeatureRow::new();
        let mut failures: Vec<String> = Vec::new();

        for function in functions {
            match function.extract(&group_values) {
                Ok(row) => merged.extend(row),
                Err(e) => {
                    warn!(
                        function = function.name(),
                        group = ?group.keys,
                        error = %e,
                        "feature function failed"
                    );
                    failures.push(format!("{}: {}", function.name(), e));
                }
            }
        }

        for name in merged.names() {
            if !feature_names.contains(name) {
                feature_names.push(name.clone());
            }
        }
        let error = (!failures.is_empty()).then(|| failures.join("; "));
        rows.push((group.keys, merged, error));
    }

    let records = rows
        .into_iter()
        .map(|(keys, row, error)| FeatureRecord {
            keys,
            values: feature_names
                .iter()
                .map(|name| row.get(name).unwrap_or(f64::NAN))
                .collect(),
            error,
        })
        .collect::<Vec<_>>();

    debug!(groups = records.len(), features = feature_names.len(), "extracted grouped features");

    Ok(FeatureTable {
        measurement: (!key_names.is_empty()).then(|| measurement.to_string()),
        key_names,
        feature_names,
        records,
    })
}

/// Reusable grouped extractor: a target column and a list of functions
#[derive(Clone)]
pub struct GroupedFeatureExtractor {
    target: String,
    measurement: String,
    functions: Vec<Arc<dyn FeatureFunction>>,
}

impl GroupedFeatureExtractor {
    pub fn new(target: &str, measurement: &str) -> Self {
        GroupedFeatureExtractor {
            target: target.to_string(),
            measurement: measurement.to_string(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, function: Arc<dyn FeatureFunction>) -> Self {
        self.functions.push(function);
        self
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name()).collect()
    }

    pub fn extract(&self, table: &TidyTable) -> SensorResult<FeatureTable> {
        extract_grouped(table, &self.target, &self.functions, &self.measurement)
    }
}

/// Summary statistics of a signal in the time domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeDomainSummary;

impl TimeDomainSummary {
    pub const COLUMNS: [&'static str; 18] = [
        "mean",
        "median",
        "max",
        "min",
        "sd",
        "skewness",
        "kurtosis",
        "q25",
        "q75",
        "iqr",
        "range",
        "cv",
        "mad",
        "rms",
        "mean_abs",
        "zero_crossing_rate",
        "waveform_length",
        "mean_tkeo",
    ];
}

impl FeatureFunction for TimeDomainSummary {
    fn name(&self) -> &str {
        "time_domain_summary"
    }

    fn extract(&self, data: &[f64]) -> anyhow::Result<FeatureRow> {
        ensure!(!data.is_empty(), "no samples");
        ensure!(data.iter().all(|v| v.is_finite()), "non-finite samples");

        let n = data.len() as f64;
        let mean = stats::mean(data);
        let sd = stats::sd(data);
        let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = data.iter().copied().fold(f64::INFINITY, f64::min);
        let q25 = stats::quantile(data, 0.25);
        let q75 = stats::quantile(data, 0.75);

        let crossings = data
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        let tkeo: Vec<f64> = data
            .windows(3)
            .map(|w| w[1] * w[1] - w[0] * w[2])
            .collect();

        let values = [
            mean,
            stats::median(data),
            max,
            min,
            sd,
            stats::skewness(data),
            stats::kurtosis(data),
            q25,
            q75,
            q75 - q25,
            max - min,
            sd / mean,
            stats::mad(data),
            (data.iter().map(|x| x * x).sum::<f64>() / n).sqrt(),
            data.iter().map(|x| x.abs()).sum::<f64>() / n,
            if data.len() > 1 { crossings as f64 / (n - 1.0) } else { f64::NAN },
            data.windows(2).map(|w| (w[1] - w[0]).abs()).sum(),
            stats::mean(&tkeo),
        ];

        let mut row = FeatureRow::new();
        for (name, value) in Self::COLUMNS.iter().zip(values) {
            row.push(name, value);
        }
        Ok(row)
    }
}

/// FFT power summed within frequency bands `[edges[i], edges[i + 1])`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyDomainEnergy {
    sampling_rate: f64,
    edges: Vec<f64>,
}

impl FrequencyDomainEnergy {
    pub const DEFAULT_EDGES: [f64; 7] = [1.0, 4.0, 8.0, 12.0, 16.0, 20.0, 25.0];

    pub fn new(sampling_rate: f64, edges: Vec<f64>) -> SensorResult<Self> {
        if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
            return Err(SensorError::config(format!("invalid sampling rate {}", sampling_rate)));
        }
        if edges.len() < 2 || edges.windows(2).any(|w| !(w[0] < w[1])) || edges[0] < 0.0 {
            return Err(SensorError::config("band edges must be non-negative and strictly increasing"));
        }
        Ok(FrequencyDomainEnergy { sampling_rate, edges })
    }

    pub fn with_default_bands(sampling_rate: f64) -> SensorResult<Self> {
        Self::new(sampling_rate, Self::DEFAULT_EDGES.to_vec())
    }

    /// Column names, e.g. `energy_1_4`
    pub fn column_names(&self) -> Vec<String> {
        self.edges
            .windows(2)
            .map(|w| format!("energy_{}_{}", edge_label(w[0]), edge_label(w[1])))
            .collect()
    }
}

fn edge_label(edge: f64) -> String {
    edge.to_string().replace('.', "p")
}

impl FeatureFunction for FrequencyDomainEnergy {
    fn name(&self) -> &str {
        "frequency_domain_energy"
    }

    fn extract(&self, data: &[f64]) -> anyhow::Result<FeatureRow> {
        let n = data.len();
        if n < 2 {
            bail!("need at least two samples, got {}", n);
        }
        ensure!(data.iter().all(|v| v.is_finite()), "non-finite samples");

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        let mut input = data.to_vec();
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| anyhow::anyhow!("fft failed: {}", e))?;

        let resolution = self.sampling_rate / n as f64;
        let mut row = FeatureRow::new();
        for (name, band) in self.column_names().iter().zip(self.edges.windows(2)) {
            let energy: f64 = spectrum
                .iter()
                .enumerate()
                .filter(|(k, _)| {
                    let f = *k as f64 * resolution;
                    f >= band[0] && f < band[1]
                })
                .map(|(_, c)| c.norm_sqr() / n as f64)
                .sum();
            row.push(name, energy);
        }
        Ok(row)
    }
}
