//! Core transform-stage trait and types

use mhealth_core::{Outcome, SensorError, SensorResult, TidyTable};
use serde::{Deserialize, Serialize};

/// Core trait for all transform stages.
///
/// A stage is a pure function from a valid table to a new [`Outcome`]:
/// `Ok(Outcome::Error(..))` reports a data-dependent soft failure, `Err(..)`
/// a structural or configuration failure that aborts the call. Stages never
/// see an `Outcome::Error`; the pipeline runner short-circuits before them.
pub trait TransformStage: Send + Sync {
    /// Transform a table
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome>;

    /// Get stage name/identifier
    fn name(&self) -> &str;

    /// Get stage type for pipeline organization
    fn stage_kind(&self) -> StageKind {
        StageKind::Transform
    }

    /// Apply to an outcome, passing errors through unchanged
    fn apply(&self, input: Outcome) -> SensorResult<Outcome> {
        input.try_and_then(|table| self.process(&table))
    }
}

/// Types of stages for pipeline organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Row selection (time filter)
    Selection,
    /// Frequency-selective or trend filters
    Filter,
    /// Value-to-value transforms (derivative, integral, autocorrelation...)
    Transform,
    /// Splits a signal into components (IMF)
    Decomposition,
    /// Frames a signal into windows
    Windowing,
}

/// Internal per-group failure, folded into an [`Outcome`] by [`settle`]
#[derive(Debug)]
pub(crate) enum StageFailure {
    Hard(SensorError),
    Soft(&'static str),
}

impl From<SensorError> for StageFailure {
    fn from(error: SensorError) -> Self {
        StageFailure::Hard(error)
    }
}

/// Fold a per-group computation into the two-tier result
pub(crate) fn settle(result: Result<TidyTable, StageFailure>) -> SensorResult<Outcome> {
    match result {
        Ok(table) => Ok(Outcome::Valid(table)),
        Err(StageFailure::Soft(message)) => Ok(Outcome::error(message)),
        Err(StageFailure::Hard(error)) => Err(error),
    }
}

/// Stage backed by a closure, for caller-supplied transforms
pub struct FnStage<F> {
    name: String,
    kind: StageKind,
    f: F,
}

impl<F> TransformStage for FnStage<F>
where
    F: Fn(&TidyTable) -> SensorResult<Outcome> + Send + Sync,
{
    fn process(&self, input: &TidyTable) -> SensorResult<Outcome> {
        (self.f)(input)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn stage_kind(&self) -> StageKind {
        self.kind
    }
}

/// Wrap a closure as a transform stage
pub fn stage_fn<F>(name: &str, f: F) -> FnStage<F>
where
    F: Fn(&TidyTable) -> SensorResult<Outcome> + Send + Sync,
{
    FnStage {
        name: name.to_string(),
        kind: StageKind::Transform,
        f,
    }
}
