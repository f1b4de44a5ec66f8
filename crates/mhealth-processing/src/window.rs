//! Windowing engine: overlapping tapered frames with time bounds

use crate::stage::{settle, StageFailure, StageKind, TransformStage};
use mhealth_core::{
    columns, Column, ColumnData, KeyValue, Outcome, SensorError, SensorResult, TidyTable,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Taper applied to each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowShape {
    Rectangle,
    #[default]
    Hamming,
    Hanning,
    Bartlett,
    Blackman,
    FlatTop,
}

impl WindowShape {
    /// Taper coefficients of length `n`
    pub fn coefficients(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![1.0];
        }

        let denom = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / denom;
                match self {
                    WindowShape::Rectangle => 1.0,
                    WindowShape::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowShape::Hanning => 0.5 - 0.5 * x.cos(),
                    WindowShape::Bartlett => 1.0 - (2.0 * i as f64 / denom - 1.0).abs(),
                    WindowShape::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    WindowShape::FlatTop => {
                        0.2156 - 0.4160 * x.cos() + 0.2781 * (2.0 * x).cos()
                            - 0.0836 * (3.0 * x).cos()
                            + 0.0069 * (4.0 * x).cos()
                    }
                }
            })
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowShape::Rectangle => "rectangle",
            WindowShape::Hamming => "hamming",
            WindowShape::Hanning => "hanning",
            WindowShape::Bartlett => "bartlett",
            WindowShape::Blackman => "blackman",
            WindowShape::FlatTop => "flattop",
        }
    }
}

impl fmt::Display for WindowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowShape {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rectangle" | "rectangular" => Ok(WindowShape::Rectangle),
            "hamming" => Ok(WindowShape::Hamming),
            "hanning" | "hann" => Ok(WindowShape::Hanning),
            "bartlett" => Ok(WindowShape::Bartlett),
            "blackman" => Ok(WindowShape::Blackman),
            "flattop" | "flat_top" => Ok(WindowShape::FlatTop),
            other => Err(SensorError::config(format!("unknown window shape '{}'", other))),
        }
    }
}

/// One frame's position in the original signal (sample indices are 0-based)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowDescriptor {
    /// 1-based, temporal order
    pub window_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub start_sample_index: usize,
    pub end_sample_index: usize,
}

/// Frame length and hop derived from a validated overlap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpec {
    pub length: usize,
    pub overlap: f64,
    pub step: usize,
}

impl WindowSpec {
    /// Validate a length/overlap pair.
    ///
    /// The hop is `round(length * (1 - overlap))` with ties to even; a hop of
    /// zero (full overlap requested explicitly) is a configuration error.
    pub fn new(length: usize, overlap: f64) -> SensorResult<Self> {
        if length == 0 {
            return Err(SensorError::config("window length must be positive"));
        }
        if !(0.0..=1.0).contains(&overlap) {
            return Err(SensorError::config(format!(
                "window overlap must be within [0, 1), got {}",
                overlap
            )));
        }
        let step = (length as f64 * (1.0 - overlap)).round_ties_even() as usize;
        if step == 0 {
            return Err(SensorError::config(format!(
                "window overlap {} leaves no hop between windows of length {}",
                overlap, length
            )));
        }
        Ok(WindowSpec { length, overlap, step })
    }

    /// Start indices of every full window over `n` samples.
    ///
    /// A signal shorter than one window yields a single window at 0.
    pub fn starts(&self, n: usize) -> Vec<usize> {
        if n == 0 {
            return Vec::new();
        }
        if n < self.length {
            return vec![0];
        }
        (0..=n - self.length).step_by(self.step).collect()
    }

    /// Number of samples in each window for a signal of `n` samples
    pub fn frame_len(&self, n: usize) -> usize {
        n.min(self.length)
    }

    /// Expected window count: `floor((n - L) / step) + 1`, or 1 when `n < L`
    pub fn count(&self, n: usize) -> usize {
        match n {
            0 => 0,
            n if n < self.length => 1,
            n => (n - self.length) / self.step + 1,
        }
    }
}

/// Per-window time bounds for a timestamp vector
pub fn window_descriptors(t: &[f64], length: usize, overlap: f64) -> SensorResult<Vec<WindowDescriptor>> {
    let spec = WindowSpec::new(length, overlap)?;
    Ok(descriptors_for(&spec, t))
}

fn descriptors_for(spec: &WindowSpec, t: &[f64]) -> Vec<WindowDescriptor> {
    let frame = spec.frame_len(t.len());
    spec.starts(t.len())
        .into_iter()
        .enumerate()
        .map(|(i, start)| {
            let end = start + frame - 1;
            WindowDescriptor {
                window_index: i + 1,
                start_time: t[start],
                end_time: t[end],
                start_sample_index: start,
                end_sample_index: end,
            }
        })
        .collect()
}

/// Split a vector into tapered frames
pub fn window_signal(values: &[f64], length: usize, overlap: f64, shape: WindowShape) -> SensorResult<Vec<Vec<f64>>> {
    let spec = WindowSpec::new(length, overlap)?;
    Ok(frames_for(&spec, values, shape))
}

fn frames_for(spec: &WindowSpec, values: &[f64], shape: WindowShape) -> Vec<Vec<f64>> {
    let frame = spec.frame_len(values.len());
    let taper = shape.coefficients(frame);
    spec.starts(values.len())
        .into_iter()
        .map(|start| {
            values[start..start + frame]
                .iter()
                .zip(&taper)
                .map(|(v, w)| v * w)
                .collect()
        })
        .collect()
}

fn repeat_key(key: &KeyValue, n: usize) -> ColumnData {
    match key {
        KeyValue::Label(s) => ColumnData::Label(vec![s.clone(); n]),
        KeyValue::Index(i) => ColumnData::Index(vec![*i; n]),
    }
}

/// Windowing stage.
///
/// Each group (normally one per axis) is framed independently. The output
/// carries the group's key columns, `window`, `window_start_time` and
/// `window_end_time`, then every float measurement column of the input
/// (`value` and any derived metric) framed and tapered the same way.
/// Rows are grouped by the previous keys and `window`; `t` is dropped.
#[derive(Debug, Clone)]
pub struct WindowingStage {
    spec: WindowSpec,
    shape: WindowShape,
}

impl WindowingStage {
    pub fn new(length: usize, overlap: f64, shape: WindowShape) -> SensorResult<Self> {
        Ok(WindowingStage {
            spec: WindowSpec::new(length, overlap)?,
            shape,
        })
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    fn window_group(&self, key_names: &[String], keys: &[KeyValue], sub: &TidyTable) -> Result<TidyTable, StageFailure> {
        let t = sub.floats(columns::T).map_err(|_| StageFailure::Soft("Windowing error"))?;
        if t.is_empty() {
            return Err(StageFailure::Soft("Windowing error"));
        }
        let measurements: Vec<(&str, &[f64])> = sub
            .column_names()
            .into_iter()
            .filter(|name| !is_window_bookkeeping(name) && !key_names.iter().any(|k| k.as_str() == *name))
            .filter_map(|name| sub.floats(name).ok().map(|values| (name, values)))
            .collect();
        if !measurements.iter().any(|(name, _)| *name == columns::VALUE) {
            return Err(StageFailure::Soft("Windowing error"));
        }

        let descriptors = descriptors_for(&self.spec, t);
        let frame = self.spec.frame_len(t.len());
        let total = descriptors.len() * frame;

        let mut window = Vec::with_capacity(total);
        let mut start_time = Vec::with_capacity(total);
        let mut end_time = Vec::with_capacity(total);
        for descriptor in &descriptors {
            window.extend(std::iter::repeat(descriptor.window_index).take(frame));
            start_time.extend(std::iter::repeat(descriptor.start_time).take(frame));
            end_time.extend(std::iter::repeat(descriptor.end_time).take(frame));
        }

        let mut out: Vec<Column> = key_names
            .iter()
            .zip(keys)
            .filter(|(name, _)| name.as_str() != columns::WINDOW)
            .map(|(name, key)| Column::new(name.clone(), repeat_key(key, total)))
            .collect();
        out.push(Column::new(columns::WINDOW, ColumnData::Index(window)));
        out.push(Column::new(columns::WINDOW_START_TIME, ColumnData::Float(start_time)));
        out.push(Column::new(columns::WINDOW_END_TIME, ColumnData::Float(end_time)));
        for (name, values) in measurements {
            let tapered: Vec<f64> = frames_for(&self.spec, values, self.shape).into_iter().flatten().collect();
            out.push(Column::new(name, ColumnData::Float(tapered)));
        }

        let mut group_keys: Vec<&str> = key_names
            .iter()
            .map(String::as_str)
            .filter(|k| *k != columns::WINDOW)
            .collect();
        group_keys.push(columns::WINDOW);

        Ok(TidyTable::from_columns(out)?.group_by(&group_keys)?)
    }
}

/// Columns windowing consumes or regenerates instead of framing
fn is_window_bookkeeping(name: &str) -> bool {
    matches!(name, columns::T | columns::WINDOW | columns::WINDOW_START_TIME | columns::WINDOW_END_TIME)
}

impl TransformStage for WindowingStage {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        if input.is_empty() {
            return Ok(Outcome::error("Windowing error"));
        }
        let key_names = input.group_keys().to_vec();
        let result = input.map_groups(|group, sub| self.window_group(&key_names, &group.keys, &sub));

        if let Ok(table) = &result {
            debug!(
                length = self.spec.length,
                step = self.spec.step,
                rows = table.n_rows(),
                "framed signal"
            );
        }
        settle(result)
    }

    fn name(&self) -> &str {
        "Windowing"
    }

    fn stage_kind(&self) -> StageKind {
        StageKind::Windowing
    }
}
