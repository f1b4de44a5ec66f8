//! mHealth-Processing: Transform pipeline and feature extraction for sensor signals
//!
//! Stages transform tidy tables with sticky soft errors; grouped extractors
//! turn the result into one feature row per axis, window or IMF.

pub mod config;
pub mod derived;
pub mod emd;
pub mod ewt;
pub mod extractor;
pub mod features;
pub mod filters;
pub mod loess;
pub mod pipeline;
pub mod spectral;
pub mod stage;
pub mod stats;
pub mod window;

pub use config::{ExtractionConfig, FeatureSetConfig, PipelineConfig, ProcessingProfile, StageConfig};
pub use derived::{autocorrelation, derivative, integral, Autocorrelation, Calculus, DerivedMetric, UnitToG};
pub use emd::{Decomposition, ImfStage, ModeDecomposer, SiftingDecomposer};
pub use extractor::{FeatureOutput, Model, SensorFeatureExtractor};
pub use features::{
    extract_grouped, feature_fn, FeatureFunction, FeatureRecord, FeatureRow, FeatureTable,
    FrequencyDomainEnergy, GroupedFeatureExtractor, TimeDomainSummary,
};
pub use filters::{bandpass, filter_time, BandpassFilter, Detrend, TimeFilter};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineRun, StageReport, StageStatus};
pub use spectral::{ar_spectrum, frequency_domain_summary, ArSpectrum, FrequencyDomainFeatures};
pub use stage::{stage_fn, StageKind, TransformStage};
pub use window::{window_descriptors, window_signal, WindowDescriptor, WindowShape, WindowingStage};
