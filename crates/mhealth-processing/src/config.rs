//! Configuration management for transform pipelines and feature extraction

use crate::derived::{Autocorrelation, DerivedMetric, UnitToG};
use crate::emd::ImfStage;
use crate::features::{FeatureFunction, FrequencyDomainEnergy, GroupedFeatureExtractor, TimeDomainSummary};
use crate::filters::{BandpassFilter, Detrend, TimeFilter};
use crate::pipeline::Pipeline;
use crate::spectral::FrequencyDomainFeatures;
use crate::stage::TransformStage;
use crate::window::{WindowShape, WindowingStage};
use mhealth_core::{columns, config_error, SensorError, SensorResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Processing profiles for different sensor use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingProfile {
    /// Gait/balance style accelerometer and gyroscope recordings
    Kinematic,
    /// Kinematic processing plus IMF decomposition for tremor analysis
    Tremor,
    /// Custom profile
    Custom,
}

/// One transform stage, as stored in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageConfig {
    TimeFilter {
        t1: f64,
        t2: f64,
    },
    Detrend {
        span: f64,
        degree: usize,
    },
    Bandpass {
        window_length: usize,
        f_low: f64,
        f_high: f64,
        #[serde(default)]
        shape: WindowShape,
    },
    UnitToG,
    Derivative {
        source: String,
        target: String,
    },
    Integral {
        source: String,
        target: String,
    },
    Autocorrelation,
    Imf {
        max_imfs: usize,
    },
    Windowing {
        length: usize,
        overlap: f64,
        #[serde(default)]
        shape: WindowShape,
    },
}

impl StageConfig {
    /// Short identifier used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            StageConfig::TimeFilter { .. } => "time_filter",
            StageConfig::Detrend { .. } => "detrend",
            StageConfig::Bandpass { .. } => "bandpass",
            StageConfig::UnitToG => "unit_to_g",
            StageConfig::Derivative { .. } => "derivative",
            StageConfig::Integral { .. } => "integral",
            StageConfig::Autocorrelation => "autocorrelation",
            StageConfig::Imf { .. } => "imf",
            StageConfig::Windowing { .. } => "windowing",
        }
    }

    /// Whether the stage reads the `t` column, which windowing drops
    fn needs_timestamps(&self) -> bool {
        matches!(
            self,
            StageConfig::TimeFilter { .. }
                | StageConfig::Detrend { .. }
                | StageConfig::Bandpass { .. }
                | StageConfig::Derivative { .. }
                | StageConfig::Integral { .. }
        )
    }

    /// Instantiate the stage, validating its parameters
    pub fn build(&self) -> SensorResult<Box<dyn TransformStage>> {
        Ok(match self {
            StageConfig::TimeFilter { t1, t2 } => {
                if !(t1.is_finite() && t2.is_finite()) || t1 > t2 {
                    return Err(config_error!("invalid time range [{}, {}]", t1, t2));
                }
                Box::new(TimeFilter::new(*t1, *t2))
            }
            StageConfig::Detrend { span, degree } => Box::new(Detrend::new(*span, *degree)?),
            StageConfig::Bandpass {
                window_length,
                f_low,
                f_high,
                shape,
            } => Box::new(BandpassFilter::new(*window_length, (*f_low, *f_high))?.with_shape(*shape)),
            StageConfig::UnitToG => Box::new(UnitToG),
            StageConfig::Derivative { source, target } => {
                check_names(source, target)?;
                Box::new(DerivedMetric::derivative(source, target))
            }
            StageConfig::Integral { source, target } => {
                check_names(source, target)?;
                Box::new(DerivedMetric::integral(source, target))
            }
            StageConfig::Autocorrelation => Box::new(Autocorrelation),
            StageConfig::Imf { max_imfs } => Box::new(ImfStage::new(*max_imfs)?),
            StageConfig::Windowing { length, overlap, shape } => {
                Box::new(WindowingStage::new(*length, *overlap, *shape)?)
            }
        })
    }
}

fn check_names(source: &str, target: &str) -> SensorResult<()> {
    if source.is_empty() || target.is_empty() {
        return Err(SensorError::config("derived metric columns must be named"));
    }
    if target == columns::T {
        return Err(SensorError::config("derived metric cannot overwrite timestamps"));
    }
    Ok(())
}

/// A feature function selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSetConfig {
    TimeDomain,
    FrequencyEnergy { edges: Vec<f64> },
    FrequencyDomain { n_peaks: usize },
}

impl FeatureSetConfig {
    /// Instantiate for a signal sampled at `sampling_rate`
    pub fn build(&self, sampling_rate: f64) -> SensorResult<Arc<dyn FeatureFunction>> {
        Ok(match self {
            FeatureSetConfig::TimeDomain => Arc::new(TimeDomainSummary),
            FeatureSetConfig::FrequencyEnergy { edges } => {
                Arc::new(FrequencyDomainEnergy::new(sampling_rate, edges.clone())?)
            }
            FeatureSetConfig::FrequencyDomain { n_peaks } => {
                Arc::new(FrequencyDomainFeatures::new(sampling_rate, *n_peaks)?)
            }
        })
    }
}

/// Grouped extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Column the feature functions read
    pub target: String,
    /// Tag attached to grouped feature tables
    pub measurement: String,
    pub feature_sets: Vec<FeatureSetConfig>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            target: columns::VALUE.to_string(),
            measurement: "acceleration".to_string(),
            feature_sets: vec![
                FeatureSetConfig::TimeDomain,
                FeatureSetConfig::FrequencyEnergy {
                    edges: FrequencyDomainEnergy::DEFAULT_EDGES.to_vec(),
                },
                FeatureSetConfig::FrequencyDomain { n_peaks: 3 },
            ],
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> SensorResult<()> {
        if self.target.is_empty() {
            return Err(SensorError::config("extraction target column must be named"));
        }
        if self.feature_sets.is_empty() {
            return Err(SensorError::config("at least one feature set is required"));
        }
        // any positive rate exercises the parameter checks
        for set in &self.feature_sets {
            set.build(1.0)?;
        }
        Ok(())
    }

    /// Build the grouped extractor for a signal sampled at `sampling_rate`
    pub fn build_extractor(&self, sampling_rate: f64) -> SensorResult<GroupedFeatureExtractor> {
        let mut extractor = GroupedFeatureExtractor::new(&self.target, &self.measurement);
        for set in &self.feature_sets {
            extractor = extractor.with_function(set.build(sampling_rate)?);
        }
        Ok(extractor)
    }
}

/// Full processing configuration: transform stages then extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Configuration name/profile
    pub name: String,
    pub profile: ProcessingProfile,
    /// Transform stages in execution order
    pub stages: Vec<StageConfig>,
    pub extraction: ExtractionConfig,
}

impl PipelineConfig {
    /// Empty custom configuration
    pub fn new(name: &str) -> Self {
        PipelineConfig {
            name: name.to_string(),
            profile: ProcessingProfile::Custom,
            stages: Vec::new(),
            extraction: ExtractionConfig::default(),
        }
    }

    /// Detrend, band-pass 1-25 Hz, keep 1-9 s, Hamming windows of 256 at 50%
    pub fn kinematic() -> Self {
        PipelineConfig {
            name: "kinematic".to_string(),
            profile: ProcessingProfile::Kinematic,
            stages: vec![
                StageConfig::Detrend { span: 0.75, degree: 2 },
                StageConfig::Bandpass {
                    window_length: 256,
                    f_low: 1.0,
                    f_high: 25.0,
                    shape: WindowShape::Hamming,
                },
                StageConfig::TimeFilter { t1: 1.0, t2: 9.0 },
                StageConfig::Windowing {
                    length: 256,
                    overlap: 0.5,
                    shape: WindowShape::Hamming,
                },
            ],
            extraction: ExtractionConfig::default(),
        }
    }

    /// Kinematic processing with four IMFs extracted before windowing
    pub fn tremor() -> Self {
        let mut config = Self::kinematic();
        config.name = "tremor".to_string();
        config.profile = ProcessingProfile::Tremor;
        let windowing = config.stages.len() - 1;
        config.stages.insert(windowing, StageConfig::Imf { max_imfs: 4 });
        config
    }

    /// Create configuration suitable for given profile
    pub fn for_profile(profile: ProcessingProfile) -> Self {
        match profile {
            ProcessingProfile::Kinematic => Self::kinematic(),
            ProcessingProfile::Tremor => Self::tremor(),
            ProcessingProfile::Custom => Self::new("custom"),
        }
    }

    pub fn add_stage(&mut self, stage: StageConfig) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> SensorResult<()> {
        let mut windowed = false;
        let mut decomposed = false;
        for (i, stage) in self.stages.iter().enumerate() {
            stage
                .build()
                .map_err(|e| config_error!("stage {} ({}) invalid: {}", i, stage.label(), e))?;

            if windowed && stage.needs_timestamps() {
                return Err(config_error!(
                    "stage {} ({}) needs timestamps but follows windowing",
                    i,
                    stage.label()
                ));
            }
            match stage {
                StageConfig::Windowing { .. } if windowed => {
                    return Err(SensorError::config("signal is windowed more than once"));
                }
                StageConfig::Windowing { .. } => windowed = true,
                StageConfig::Imf { .. } if decomposed => {
                    return Err(SensorError::config("signal is decomposed into IMFs more than once"));
                }
                StageConfig::Imf { .. } => decomposed = true,
                _ => {}
            }
        }
        if windowed && self.extraction.target == columns::T {
            return Err(config_error!(
                "extraction target '{}' is dropped by windowing",
                self.extraction.target
            ));
        }
        self.extraction.validate()
    }

    /// Validate and turn the stage list into a runnable pipeline
    pub fn build_pipeline(&self) -> SensorResult<Pipeline> {
        self.validate()?;
        let mut pipeline = Pipeline::new(&self.name);
        for stage in &self.stages {
            pipeline.add_stage(stage.build()?);
        }
        Ok(pipeline)
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> SensorResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| config_error!("Failed to serialize configuration: {}", e))
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> SensorResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| config_error!("Failed to deserialize configuration: {}", e))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::kinematic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    #[test]
    fn test_kinematic_config() {
        let config = PipelineConfig::kinematic();
        assert_eq!(config.profile, ProcessingProfile::Kinematic);
        assert!(config.validate().is_ok());

        let pipeline = config.build_pipeline().unwrap();
        assert_eq!(
            pipeline.stage_kinds(),
            vec![StageKind::Filter, StageKind::Filter, StageKind::Selection, StageKind::Windowing]
        );
    }

    #[test]
    fn test_tremor_inserts_imf_before_windowing() {
        let config = PipelineConfig::for_profile(ProcessingProfile::Tremor);
        assert_eq!(config.stages.len(), 5);
        assert_eq!(config.stages[3], StageConfig::Imf { max_imfs: 4 });
        assert!(matches!(config.stages[4], StageConfig::Windowing { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::new("bad");
        assert!(config.validate().is_ok());

        config.add_stage(StageConfig::Windowing {
            length: 128,
            overlap: 1.0,
            shape: WindowShape::Hamming,
        });
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("stage 0 (windowing)"));

        config.stages.clear();
        config.add_stage(StageConfig::Bandpass {
            window_length: 64,
            f_low: 20.0,
            f_high: 5.0,
            shape: WindowShape::Hamming,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timestamp_stage_after_windowing_rejected() {
        let mut config = PipelineConfig::new("order");
        config
            .add_stage(StageConfig::Windowing {
                length: 64,
                overlap: 0.5,
                shape: WindowShape::Rectangle,
            })
            .add_stage(StageConfig::Detrend { span: 0.75, degree: 2 });
        assert!(config.validate().unwrap_err().to_string().contains("follows windowing"));
    }

    #[test]
    fn test_windowed_timestamp_target_rejected() {
        let mut config = PipelineConfig::kinematic();
        config.extraction.target = columns::T.to_string();
        assert!(config.validate().unwrap_err().to_string().contains("dropped by windowing"));

        config.stages.pop();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extraction_validation() {
        let mut config = PipelineConfig::new("features");
        config.extraction.feature_sets = vec![FeatureSetConfig::FrequencyDomain { n_peaks: 0 }];
        assert!(config.validate().is_err());

        config.extraction.feature_sets = vec![FeatureSetConfig::FrequencyEnergy { edges: vec![5.0] }];
        assert!(config.validate().is_err());

        config.extraction.feature_sets.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_extractor() {
        let extractor = ExtractionConfig::default().build_extractor(100.0).unwrap();
        assert_eq!(
            extractor.function_names(),
            vec!["time_domain_summary", "frequency_domain_energy", "frequency_domain_summary"]
        );
    }

    #[test]
    fn test_json_serialization() {
        let config = PipelineConfig::tremor();
        let json = config.to_json().unwrap();
        assert!(json.contains("\"stage\": \"imf\""));
        assert!(json.contains("\"shape\": \"hamming\""));

        let deserialized = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_json_defaults_window_shape() {
        let json = r#"{
            "name": "minimal",
            "profile": "Custom",
            "stages": [{"stage": "windowing", "length": 100, "overlap": 0.25}],
            "extraction": {"target": "value", "measurement": "gyro", "feature_sets": [{"kind": "time_domain"}]}
        }"#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(
            config.stages[0],
            StageConfig::Windowing {
                length: 100,
                overlap: 0.25,
                shape: WindowShape::Hamming
            }
        );
        assert!(PipelineConfig::from_json("{\"name\": 3}").unwrap_err().is_configuration());
    }
}
