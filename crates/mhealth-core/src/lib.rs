//! mHealth-Core: Foundation types for mobile sensor feature extraction
//!
//! Tidy tables, raw recordings and the two-tier error model shared by every
//! transform and extractor.

pub mod error;
pub mod outcome;
pub mod recording;
pub mod table;

pub use error::{SensorError, SensorResult};
pub use outcome::Outcome;
pub use recording::{tidy_sensor_data, SensorKind, SensorRecording};
pub use table::{columns, sampling_rate, Column, ColumnData, Group, KeyValue, TidyTable};
