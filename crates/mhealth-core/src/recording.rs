//! Raw wide-format sensor recordings and their conversion to tidy tables

use crate::error::{SensorError, SensorResult};
use crate::table::{columns, Column, ColumnData, TidyTable};
use serde::{Deserialize, Serialize};

/// Families of mobile sensors and the axis columns they report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Accelerometer, gyroscope, gravity... (`x, y, z`)
    Kinematic,
    /// Camera-based photoplethysmography (`red, green, blue`)
    Camera,
    /// Touchscreen taps (`x, y, buttonid`)
    Touch,
}

impl SensorKind {
    /// Axis column names, in canonical order
    pub fn axes(&self) -> &'static [&'static str] {
        match self {
            SensorKind::Kinematic => &["x", "y", "z"],
            SensorKind::Camera => &["red", "green", "blue"],
            SensorKind::Touch => &["x", "y", "buttonid"],
        }
    }
}

/// Wide table as delivered by a device: one timestamp column plus axes.
///
/// Missing timestamps are encoded as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecording {
    /// Timestamps in seconds
    pub t: Vec<f64>,
    /// Axis name and samples, one entry per axis
    pub channels: Vec<(String, Vec<f64>)>,
}

impl SensorRecording {
    /// Start a recording from its timestamp column
    pub fn new(t: Vec<f64>) -> Self {
        SensorRecording {
            t,
            channels: Vec::new(),
        }
    }

    /// Add an axis column
    pub fn with_channel(mut self, name: &str, values: Vec<f64>) -> Self {
        self.channels.push((name.to_string(), values));
        self
    }

    /// Build from named columns, one of which must be `t`
    pub fn from_columns(mut named: Vec<(String, Vec<f64>)>) -> SensorResult<Self> {
        let t_index = named
            .iter()
            .position(|(name, _)| name == columns::T)
            .ok_or_else(|| SensorError::missing_column(columns::T))?;
        let (_, t) = named.remove(t_index);
        Ok(SensorRecording { t, channels: named })
    }

    /// Build from named columns, requiring the axes of the given sensor kind
    pub fn for_sensor(kind: SensorKind, named: Vec<(String, Vec<f64>)>) -> SensorResult<Self> {
        let recording = Self::from_columns(named)?;
        let mut channels = Vec::with_capacity(kind.axes().len());
        for axis in kind.axes() {
            let values = recording
                .channels
                .iter()
                .find(|(name, _)| name == axis)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| SensorError::missing_column(*axis))?;
            channels.push((axis.to_string(), values));
        }
        Ok(SensorRecording {
            t: recording.t,
            channels,
        })
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// Convert a wide recording into a tidy `(t, axis, value)` table grouped by axis.
///
/// Rows are sorted by the original timestamps (stable), `t` is re-based so
/// the first sample sits at 0, and axes are stacked in channel order.
/// Any missing timestamp is a hard failure.
pub fn tidy_sensor_data(recording: &SensorRecording) -> SensorResult<TidyTable> {
    if recording.channels.is_empty() {
        return Err(SensorError::malformed("recording has no axis columns"));
    }
    if let Some(row) = recording.t.iter().position(|t| !t.is_finite()) {
        return Err(SensorError::malformed(format!(
            "missing timestamp at row {}",
            row
        )));
    }
    for (name, values) in &recording.channels {
        if values.len() != recording.t.len() {
            return Err(SensorError::LengthMismatch {
                what: name.clone(),
                expected: recording.t.len(),
                actual: values.len(),
            });
        }
    }

    let mut order: Vec<usize> = (0..recording.t.len()).collect();
    order.sort_by(|&a, &b| recording.t[a].total_cmp(&recording.t[b]));
    let t0 = order.first().map(|&i| recording.t[i]).unwrap_or(0.0);

    let total = recording.t.len() * recording.channels.len();
    let mut t = Vec::with_capacity(total);
    let mut axis = Vec::with_capacity(total);
    let mut value = Vec::with_capacity(total);

    for (name, values) in &recording.channels {
        for &i in &order {
            t.push(recording.t[i] - t0);
            axis.push(name.clone());
            value.push(values[i]);
        }
    }

    TidyTable::from_columns(vec![
        Column::new(columns::T, ColumnData::Float(t)),
        Column::new(columns::AXIS, ColumnData::Label(axis)),
        Column::new(columns::VALUE, ColumnData::Float(value)),
    ])?
    .group_by(&[columns::AXIS])
}
