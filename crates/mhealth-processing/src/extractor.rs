//! Sensor-level extraction: raw recording in, feature envelope out

use crate::config::PipelineConfig;
use crate::features::FeatureTable;
use crate::pipeline::{Pipeline, StageReport};
use mhealth_core::{
    columns, sampling_rate, tidy_sensor_data, Outcome, SensorError, SensorRecording, SensorResult, TidyTable,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// Capability: transformed table to an opaque model output
pub trait Model: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, table: &TidyTable) -> anyhow::Result<serde_json::Value>;
}

/// Result envelope of one extraction run.
///
/// Exactly one of `extracted_features` and `error` is set, unless the
/// pipeline succeeded and only models failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOutput {
    pub run_id: Uuid,
    pub extracted_features: Option<FeatureTable>,
    /// Model outputs keyed by model name; a failed model maps to `{"error": ..}`
    pub model_features: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<String>,
    /// Per-stage execution reports of the transform pipeline
    #[serde(default)]
    pub stages: Vec<StageReport>,
}

impl FeatureOutput {
    fn failed(run_id: Uuid, message: String, stages: Vec<StageReport>) -> Self {
        FeatureOutput {
            run_id,
            extracted_features: None,
            model_features: None,
            error: Some(message),
            stages,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_json(&self) -> SensorResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SensorError::malformed(format!("Failed to serialize output: {}", e)))
    }
}

/// Tidies a recording, runs the transform pipeline, then grouped extraction
/// and any models, never raising to the caller
pub struct SensorFeatureExtractor {
    config: PipelineConfig,
    pipeline: Pipeline,
    models: Vec<Arc<dyn Model>>,
}

impl SensorFeatureExtractor {
    pub fn new(config: PipelineConfig) -> SensorResult<Self> {
        let pipeline = config.build_pipeline()?;
        Ok(SensorFeatureExtractor {
            config,
            pipeline,
            models: Vec::new(),
        })
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.models.push(model);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extract features from a raw recording
    pub fn extract(&self, recording: &SensorRecording) -> FeatureOutput {
        let run_id = Uuid::new_v4();
        let span = info_span!("extract", %run_id, config = %self.config.name);
        let _enter = span.enter();

        match tidy_sensor_data(recording) {
            Ok(table) => self.run(run_id, &table),
            Err(e) => {
                warn!(error = %e, "recording rejected");
                FeatureOutput::failed(run_id, e.to_string(), Vec::new())
            }
        }
    }

    /// Extract features from an already tidy table
    pub fn extract_table(&self, table: &TidyTable) -> FeatureOutput {
        let run_id = Uuid::new_v4();
        let span = info_span!("extract", %run_id, config = %self.config.name);
        let _enter = span.enter();
        self.run(run_id, table)
    }

    fn run(&self, run_id: Uuid, table: &TidyTable) -> FeatureOutput {
        let fs = match input_sampling_rate(table) {
            Ok(fs) => fs,
            Err(message) => return FeatureOutput::failed(run_id, message, Vec::new()),
        };

        let run = match self.pipeline.run(Outcome::Valid(table.clone())) {
            Ok(run) => run,
            Err(e) => {
                warn!(error = %e, "pipeline failed hard");
                return FeatureOutput::failed(run_id, e.to_string(), Vec::new());
            }
        };
        let transformed = match run.outcome {
            Outcome::Valid(transformed) => transformed,
            Outcome::Error(message) => return FeatureOutput::failed(run_id, message, run.reports),
        };

        let features = self
            .config
            .extraction
            .build_extractor(fs)
            .and_then(|extractor| extractor.extract(&transformed));
        let features = match features {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "grouped extraction failed");
                return FeatureOutput::failed(run_id, e.to_string(), run.reports);
            }
        };

        let model_features = (!self.models.is_empty()).then(|| self.run_models(&transformed));
        info!(
            sampling_rate = fs,
            groups = features.n_rows(),
            failed_groups = features.failed_rows(),
            latency_us = run.total_latency_us,
            "extraction complete"
        );

        FeatureOutput {
            run_id,
            extracted_features: Some(features),
            model_features,
            error: None,
            stages: run.reports,
        }
    }

    fn run_models(&self, table: &TidyTable) -> serde_json::Map<String, serde_json::Value> {
        self.models
            .iter()
            .map(|model| {
                let value = model.predict(table).unwrap_or_else(|e| {
                    warn!(model = model.name(), error = %e, "model failed");
                    serde_json::json!({ "error": e.to_string() })
                });
                (model.name().to_string(), value)
            })
            .collect()
    }
}

/// Sampling rate of the first group's timestamps, fixed before any stage runs
fn input_sampling_rate(table: &TidyTable) -> Result<f64, String> {
    let t = table.floats(columns::T).map_err(|e| e.to_string())?;
    let first = table
        .groups()
        .into_iter()
        .next()
        .ok_or_else(|| "Not enough time samples".to_string())?;
    let group_t: Vec<f64> = first.rows.iter().map(|&i| t[i]).collect();
    sampling_rate(&group_t).ok_or_else(|| "Not enough time samples".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureSetConfig, StageConfig};
    use crate::window::WindowShape;
    use anyhow::bail;
    use std::f64::consts::PI;

    struct RowCount;

    impl Model for RowCount {
        fn name(&self) -> &str {
            "row_count"
        }

        fn predict(&self, table: &TidyTable) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!(table.n_rows()))
        }
    }

    struct Broken;

    impl Model for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _table: &TidyTable) -> anyhow::Result<serde_json::Value> {
            bail!("weights missing")
        }
    }

    fn recording(n: usize, fs: f64) -> SensorRecording {
        let t: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
        let wave = |f: f64| -> Vec<f64> { t.iter().map(|ti| (2.0 * PI * f * ti).sin()).collect() };
        SensorRecording::new(t.clone())
            .with_channel("x", wave(2.0))
            .with_channel("y", wave(5.0))
            .with_channel("z", wave(8.0))
    }

    fn windowed_config() -> PipelineConfig {
        let mut config = PipelineConfig::new("windows");
        config.add_stage(StageConfig::Windowing {
            length: 100,
            overlap: 0.5,
            shape: WindowShape::Hamming,
        });
        config.extraction.feature_sets = vec![FeatureSetConfig::TimeDomain];
        config
    }

    #[test]
    fn test_envelope_on_success() {
        let extractor = SensorFeatureExtractor::new(windowed_config())
            .unwrap()
            .with_model(Arc::new(RowCount))
            .with_model(Arc::new(Broken));
        let output = extractor.extract(&recording(300, 50.0));

        assert!(output.is_success());
        // 300 samples, length 100, step 50: 5 windows per axis
        let features = output.extracted_features.as_ref().unwrap();
        assert_eq!(features.n_rows(), 15);
        assert_eq!(features.measurement.as_deref(), Some("acceleration"));

        let models = output.model_features.as_ref().unwrap();
        assert_eq!(models["row_count"], serde_json::json!(1500));
        assert_eq!(models["broken"]["error"], serde_json::json!("weights missing"));
        assert_eq!(output.stages.len(), 1);
    }

    #[test]
    fn test_soft_error_lands_in_envelope() {
        let mut config = windowed_config();
        config.stages.insert(0, StageConfig::TimeFilter { t1: 50.0, t2: 60.0 });
        let output = SensorFeatureExtractor::new(config).unwrap().extract(&recording(300, 50.0));

        assert!(output.extracted_features.is_none());
        assert!(output.model_features.is_none());
        assert_eq!(output.error.as_deref(), Some("Not enough time samples"));
        assert_eq!(output.stages.len(), 2);
    }

    #[test]
    fn test_hard_error_lands_in_envelope() {
        let mut config = PipelineConfig::new("nyquist");
        config.add_stage(StageConfig::Bandpass {
            window_length: 64,
            f_low: 1.0,
            f_high: 40.0,
            shape: WindowShape::Hamming,
        });
        let output = SensorFeatureExtractor::new(config).unwrap().extract(&recording(300, 50.0));
        assert!(output.error.unwrap().starts_with("Configuration error"));
    }

    #[test]
    fn test_malformed_recording_lands_in_envelope() {
        let bad = SensorRecording::new(vec![0.0, f64::NAN]).with_channel("x", vec![1.0, 2.0]);
        let output = SensorFeatureExtractor::new(windowed_config()).unwrap().extract(&bad);
        assert!(output.error.unwrap().starts_with("Malformed input"));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let extractor = SensorFeatureExtractor::new(windowed_config()).unwrap();
        let a = extractor.extract(&recording(200, 50.0));
        let b = extractor.extract(&recording(200, 50.0));
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mut config = windowed_config();
        config.extraction.feature_sets.clear();
        assert!(SensorFeatureExtractor::new(config).is_err());
    }

    #[test]
    fn test_output_serializes() {
        let output = SensorFeatureExtractor::new(windowed_config())
            .unwrap()
            .extract(&recording(200, 50.0));
        let json = output.to_json().unwrap();
        assert!(json.contains("\"extracted_features\""));
        assert!(json.contains("\"error\": null"));
    }
}
