//! Error-carrying result threaded through every transform stage

use crate::table::TidyTable;
use serde::{Deserialize, Serialize};

/// Either a valid table or a sticky soft-failure message.
///
/// Once `Error`, no combinator on this type can turn it back into `Valid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Valid(TidyTable),
    Error(String),
}

impl Outcome {
    /// Soft failure with the given diagnostic
    pub fn error(message: impl Into<String>) -> Self {
        Outcome::Error(message.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Outcome::Valid(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn table(&self) -> Option<&TidyTable> {
        match self {
            Outcome::Valid(table) => Some(table),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Outcome::Valid(_) => None,
            Outcome::Error(message) => Some(message),
        }
    }

    /// Chain a fallible step; errors pass through untouched
    pub fn and_then<F>(self, f: F) -> Outcome
    where
        F: FnOnce(TidyTable) -> Outcome,
    {
        match self {
            Outcome::Valid(table) => f(table),
            error => error,
        }
    }

    /// Chain a step that can additionally fail hard
    pub fn try_and_then<E, F>(self, f: F) -> Result<Outcome, E>
    where
        F: FnOnce(TidyTable) -> Result<Outcome, E>,
    {
        match self {
            Outcome::Valid(table) => f(table),
            error => Ok(error),
        }
    }

    /// Transform the table of a valid outcome
    pub fn map<F>(self, f: F) -> Outcome
    where
        F: FnOnce(TidyTable) -> TidyTable,
    {
        self.and_then(|table| Outcome::Valid(f(table)))
    }

    pub fn into_result(self) -> Result<TidyTable, String> {
        match self {
            Outcome::Valid(table) => Ok(table),
            Outcome::Error(message) => Err(message),
        }
    }
}

impl From<TidyTable> for Outcome {
    fn from(table: TidyTable) -> Self {
        Outcome::Valid(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{columns, Column, ColumnData};

    fn table() -> TidyTable {
        TidyTable::from_columns(vec![Column::new(
            columns::VALUE,
            ColumnData::Float(vec![1.0, 2.0]),
        )])
        .unwrap()
    }

    #[test]
    fn test_error_is_absorbing() {
        let outcome = Outcome::error("Detrend error")
            .map(|t| t.ungroup())
            .and_then(|t| Outcome::Valid(t))
            .and_then(|_| Outcome::error("Windowing error"));

        assert_eq!(outcome.error_message(), Some("Detrend error"));
    }

    #[test]
    fn test_valid_chains() {
        let outcome = Outcome::from(table()).and_then(|t| {
            let t = t.with_column("scaled", ColumnData::Float(vec![2.0, 4.0])).unwrap();
            Outcome::Valid(t)
        });
        assert!(outcome.is_valid());
        assert!(outcome.table().unwrap().has_column("scaled"));
    }

    #[test]
    fn test_try_and_then_skips_on_error() {
        let result: Result<Outcome, String> = Outcome::error("Not enough time samples")
            .try_and_then(|_| Err("should not run".to_string()));
        assert_eq!(
            result.unwrap().into_result().unwrap_err(),
            "Not enough time samples"
        );
    }
}
