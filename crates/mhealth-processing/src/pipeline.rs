//! Transform pipeline runner for chaining stages

use crate::derived::{Autocorrelation, DerivedMetric, UnitToG};
use crate::emd::ImfStage;
use crate::filters::{BandpassFilter, Detrend, TimeFilter};
use crate::stage::{StageKind, TransformStage};
use crate::window::{WindowShape, WindowingStage};
use mhealth_core::{Outcome, SensorResult, TidyTable};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Ordered list of stages applied with sticky-error semantics
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn TransformStage>>,
}

/// Pipeline builder for constructing stage chains
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Box<dyn TransformStage>>,
}

/// What happened to one stage during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage produced a valid table
    Valid,
    /// Stage entered the error state with this message
    Error(String),
    /// Stage was not run because an earlier stage failed
    Skipped,
}

/// Per-stage execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub kind: StageKind,
    pub rows_in: usize,
    pub rows_out: Option<usize>,
    pub elapsed_us: u64,
    pub status: StageStatus,
}

/// Pipeline execution result with per-stage reports
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: Outcome,
    pub reports: Vec<StageReport>,
    pub total_latency_us: u64,
}

impl PipelineRun {
    /// Name of the stage that moved the run into the error state, if any
    pub fn failed_stage(&self) -> Option<&str> {
        self.reports
            .iter()
            .find(|r| matches!(r.status, StageStatus::Error(_)))
            .map(|r| r.name.as_str())
    }
}

impl Pipeline {
    /// Create new empty pipeline
    pub fn new(name: &str) -> Self {
        Pipeline {
            name: name.to_string(),
            stages: Vec::new(),
        }
    }

    /// Add stage to the end of the pipeline
    pub fn add_stage(&mut self, stage: Box<dyn TransformStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of all stages, in execution order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Kinds of all stages, in execution order
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.stage_kind()).collect()
    }

    /// Run every stage in order.
    ///
    /// Once the outcome is an error, the remaining stages are skipped and the
    /// error is returned unchanged. A hard failure from any stage aborts the
    /// run.
    pub fn run(&self, input: Outcome) -> SensorResult<PipelineRun> {
        let start = Instant::now();
        let mut current = input;
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let table = match &current {
                Outcome::Valid(table) => table,
                Outcome::Error(_) => {
                    reports.push(StageReport {
                        name: stage.name().to_string(),
                        kind: stage.stage_kind(),
                        rows_in: 0,
                        rows_out: None,
                        elapsed_us: 0,
                        status: StageStatus::Skipped,
                    });
                    continue;
                }
            };

            let rows_in = table.n_rows();
            let stage_start = Instant::now();
            let next = stage.process(table).map_err(|e| {
                warn!(pipeline = %self.name, stage = stage.name(), error = %e, "stage failed hard");
                e
            })?;
            let elapsed_us = stage_start.elapsed().as_micros() as u64;

            let (rows_out, status) = match &next {
                Outcome::Valid(out) => (Some(out.n_rows()), StageStatus::Valid),
                Outcome::Error(message) => {
                    warn!(pipeline = %self.name, stage = stage.name(), error_message = %message, "stage entered error state");
                    (None, StageStatus::Error(message.clone()))
                }
            };
            debug!(
                pipeline = %self.name,
                stage = stage.name(),
                rows_in,
                rows_out,
                elapsed_us,
                "stage executed"
            );

            reports.push(StageReport {
                name: stage.name().to_string(),
                kind: stage.stage_kind(),
                rows_in,
                rows_out,
                elapsed_us,
                status,
            });
            current = next;
        }

        Ok(PipelineRun {
            outcome: current,
            reports,
            total_latency_us: start.elapsed().as_micros() as u64,
        })
    }

    /// Run on a table and keep only the final outcome
    pub fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        Ok(self.run(Outcome::Valid(input.clone()))?.outcome)
    }
}

impl TransformStage for Pipeline {
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        Pipeline::process(self, input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl PipelineBuilder {
    /// Create new pipeline builder
    pub fn new(name: &str) -> Self {
        PipelineBuilder {
            name: name.to_string(),
            stages: Vec::new(),
        }
    }

    /// Add any stage to the pipeline
    pub fn add_stage(&mut self, stage: Box<dyn TransformStage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn add_time_filter(&mut self, t1: f64, t2: f64) -> &mut Self {
        self.stages.push(Box::new(TimeFilter::new(t1, t2)));
        self
    }

    /// Add LOESS detrending with the default span and degree
    pub fn add_detrend(&mut self) -> &mut Self {
        self.stages.push(Box::new(Detrend::default()));
        self
    }

    pub fn add_bandpass(&mut self, window_length: usize, freq_range: (f64, f64)) -> SensorResult<&mut Self> {
        self.stages.push(Box::new(BandpassFilter::new(window_length, freq_range)?));
        Ok(self)
    }

    pub fn add_unit_to_g(&mut self) -> &mut Self {
        self.stages.push(Box::new(UnitToG));
        self
    }

    pub fn add_derivative(&mut self, source: &str, target: &str) -> &mut Self {
        self.stages.push(Box::new(DerivedMetric::derivative(source, target)));
        self
    }

    pub fn add_integral(&mut self, source: &str, target: &str) -> &mut Self {
        self.stages.push(Box::new(DerivedMetric::integral(source, target)));
        self
    }

    pub fn add_autocorrelation(&mut self) -> &mut Self {
        self.stages.push(Box::new(Autocorrelation));
        self
    }

    pub fn add_imf(&mut self, max_imfs: usize) -> SensorResult<&mut Self> {
        self.stages.push(Box::new(ImfStage::new(max_imfs)?));
        Ok(self)
    }

    pub fn add_windowing(&mut self, length: usize, overlap: f64, shape: WindowShape) -> SensorResult<&mut Self> {
        self.stages.push(Box::new(WindowingStage::new(length, overlap, shape)?));
        Ok(self)
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        let mut pipeline = Pipeline::new(&self.name);
        for stage in self.stages {
            pipeline.add_stage(stage);
        }
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::stage_fn;
    use mhealth_core::{columns, tidy_sensor_data, SensorError, SensorRecording};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn table(n: usize) -> TidyTable {
        let t: Vec<f64> = (0..n).map(|i| i as f64 / 100.0).collect();
        let x: Vec<f64> = t.iter().map(|ti| (2.0 * std::f64::consts::PI * 5.0 * ti).sin()).collect();
        tidy_sensor_data(&SensorRecording::new(t).with_channel("x", x)).unwrap()
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let input = table(10);
        let out = Pipeline::new("empty").process(&input).unwrap();
        assert_eq!(out, Outcome::Valid(input));
    }

    #[test]
    fn test_stages_after_error_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut builder = PipelineBuilder::new("short-circuit");
        builder
            .add_time_filter(100.0, 200.0)
            .add_stage(Box::new(stage_fn("count", move |t| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Outcome::Valid(t.clone()))
            })))
            .add_detrend();
        let run = builder.build().run(Outcome::Valid(table(50))).unwrap();

        assert_eq!(run.outcome.error_message(), Some("Not enough time samples"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.failed_stage(), Some("Time Filter"));
        assert_eq!(run.reports.len(), 3);
        assert_eq!(run.reports[1].status, StageStatus::Skipped);
        assert_eq!(run.reports[2].status, StageStatus::Skipped);
    }

    #[test]
    fn test_error_input_passes_through() {
        let mut builder = PipelineBuilder::new("noop");
        builder.add_detrend().add_unit_to_g();
        let run = builder.build().run(Outcome::error("Windowing error")).unwrap();
        assert_eq!(run.outcome, Outcome::error("Windowing error"));
        assert!(run.failed_stage().is_none());
    }

    #[test]
    fn test_hard_failure_aborts() {
        let mut pipeline = Pipeline::new("hard");
        pipeline.add_stage(Box::new(stage_fn("explode", |_| {
            Err(SensorError::config("bad stage"))
        })));
        assert!(pipeline.process(&table(10)).unwrap_err().is_configuration());
    }

    #[test]
    fn test_reports_track_rows() {
        let mut builder = PipelineBuilder::new("rows");
        builder.add_time_filter(0.0, 0.495);
        builder.add_windowing(10, 0.5, WindowShape::Rectangle).unwrap();
        let pipeline = builder.build();
        assert_eq!(pipeline.stage_kinds(), vec![StageKind::Selection, StageKind::Windowing]);

        let run = pipeline.run(Outcome::Valid(table(100))).unwrap();
        assert_eq!(run.reports[0].rows_in, 100);
        assert_eq!(run.reports[0].rows_out, Some(50));
        // 50 samples, length 10, step 5: 9 windows of 10
        assert_eq!(run.reports[1].rows_out, Some(90));
        let out = run.outcome.into_result().unwrap();
        assert!(out.has_column(columns::WINDOW));
    }

    #[test]
    fn test_nested_pipeline() {
        let mut inner = PipelineBuilder::new("inner");
        inner.add_unit_to_g();
        let mut outer = Pipeline::new("outer");
        outer.add_stage(Box::new(inner.build()));
        assert_eq!(outer.stage_names(), vec!["inner".to_string()]);
        assert!(outer.process(&table(5)).unwrap().is_valid());
    }

    proptest! {
        #[test]
        fn prop_errors_are_absorbing(message in "[A-Za-z ]{1,30}", n_stages in 0usize..6) {
            let mut builder = PipelineBuilder::new("absorbing");
            for _ in 0..n_stages {
                builder.add_detrend().add_unit_to_g().add_autocorrelation();
            }
            let run = builder.build().run(Outcome::error(message.clone())).unwrap();
            prop_assert_eq!(run.outcome.error_message(), Some(message.as_str()));
        }
    }
}
