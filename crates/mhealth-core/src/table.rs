//! TidyTable: canonical long-format container for multi-axis time series

use crate::error::{SensorError, SensorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Well-known column names shared by every stage
pub mod columns {
    pub const T: &str = "t";
    pub const AXIS: &str = "axis";
    pub const VALUE: &str = "value";
    pub const WINDOW: &str = "window";
    pub const WINDOW_START_TIME: &str = "window_start_time";
    pub const WINDOW_END_TIME: &str = "window_end_time";
    pub const IMF: &str = "imf";
}

/// Storage for a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// Numeric measurements and timestamps
    Float(Vec<f64>),
    /// Categorical labels such as axis names
    Label(Vec<String>),
    /// Integer keys such as window or IMF indices
    Index(Vec<usize>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Label(v) => v.len(),
            ColumnData::Index(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            ColumnData::Float(_) => "a float column",
            ColumnData::Label(_) => "a label column",
            ColumnData::Index(_) => "an index column",
        }
    }

    /// Gather the given rows into a new column
    pub fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Label(v) => ColumnData::Label(rows.iter().map(|&i| v[i].clone()).collect()),
            ColumnData::Index(v) => ColumnData::Index(rows.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Grouping key at a row; floats are never keys
    pub fn key_at(&self, row: usize) -> Option<KeyValue> {
        match self {
            ColumnData::Float(_) => None,
            ColumnData::Label(v) => v.get(row).map(|s| KeyValue::Label(s.clone())),
            ColumnData::Index(v) => v.get(row).map(|&i| KeyValue::Index(i)),
        }
    }

    fn append(&mut self, other: &ColumnData, name: &str) -> SensorResult<()> {
        match (self, other) {
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend_from_slice(b),
            (ColumnData::Label(a), ColumnData::Label(b)) => a.extend_from_slice(b),
            (ColumnData::Index(a), ColumnData::Index(b)) => a.extend_from_slice(b),
            (this, _) => {
                return Err(SensorError::ColumnType {
                    column: name.to_string(),
                    expected: this.kind(),
                })
            }
        }
        Ok(())
    }
}

/// Value of one grouping key for one group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Label(String),
    Index(usize),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Label(s) => write!(f, "{}", s),
            KeyValue::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Named column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Column {
            name: name.into(),
            data,
        }
    }
}

/// One group of rows sharing the same grouping key values
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    /// Key values, in the order of the table's group keys
    pub keys: Vec<KeyValue>,
    /// Row indices in table order
    pub rows: Vec<usize>,
}

/// Long-format table of `(keys..., t, value)` rows with explicit grouping.
///
/// Tables are never mutated once handed to a stage: every operation below
/// consumes or borrows and returns a fresh table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TidyTable {
    columns: Vec<Column>,
    group_keys: Vec<String>,
    n_rows: usize,
}

impl TidyTable {
    /// Create an empty table with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns of equal length
    pub fn from_columns(columns: Vec<Column>) -> SensorResult<Self> {
        let n_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for (i, column) in columns.iter().enumerate() {
            if column.data.len() != n_rows {
                return Err(SensorError::LengthMismatch {
                    what: column.name.clone(),
                    expected: n_rows,
                    actual: column.data.len(),
                });
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SensorError::malformed(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }

        Ok(TidyTable {
            columns,
            group_keys: Vec::new(),
            n_rows,
        })
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    fn require(&self, name: &str) -> SensorResult<&ColumnData> {
        self.column(name)
            .ok_or_else(|| SensorError::missing_column(name))
    }

    /// Borrow a float column
    pub fn floats(&self, name: &str) -> SensorResult<&[f64]> {
        match self.require(name)? {
            ColumnData::Float(v) => Ok(v),
            _ => Err(SensorError::ColumnType {
                column: name.to_string(),
                expected: "a float column",
            }),
        }
    }

    /// Borrow a label column
    pub fn labels(&self, name: &str) -> SensorResult<&[String]> {
        match self.require(name)? {
            ColumnData::Label(v) => Ok(v),
            _ => Err(SensorError::ColumnType {
                column: name.to_string(),
                expected: "a label column",
            }),
        }
    }

    /// Borrow an index column
    pub fn indices(&self, name: &str) -> SensorResult<&[usize]> {
        match self.require(name)? {
            ColumnData::Index(v) => Ok(v),
            _ => Err(SensorError::ColumnType {
                column: name.to_string(),
                expected: "an index column",
            }),
        }
    }

    /// Replace a column of the same name, or append a new one
    pub fn with_column(mut self, name: &str, data: ColumnData) -> SensorResult<Self> {
        if !self.columns.is_empty() && data.len() != self.n_rows {
            return Err(SensorError::LengthMismatch {
                what: name.to_string(),
                expected: self.n_rows,
                actual: data.len(),
            });
        }
        if self.columns.is_empty() {
            self.n_rows = data.len();
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.data = data,
            None => self.columns.push(Column::new(name, data)),
        }
        Ok(self)
    }

    /// Drop a column (and its grouping role) if present
    pub fn without_column(mut self, name: &str) -> Self {
        self.columns.retain(|c| c.name != name);
        self.group_keys.retain(|k| k != name);
        if self.columns.is_empty() {
            self.n_rows = 0;
        }
        self
    }

    /// Current grouping keys, outermost first
    pub fn group_keys(&self) -> &[String] {
        &self.group_keys
    }

    /// Replace the grouping keys
    pub fn group_by(mut self, keys: &[&str]) -> SensorResult<Self> {
        for key in keys {
            if let ColumnData::Float(_) = self.require(key)? {
                return Err(SensorError::ColumnType {
                    column: key.to_string(),
                    expected: "a label or index column",
                });
            }
        }
        self.group_keys = keys.iter().map(|k| k.to_string()).collect();
        Ok(self)
    }

    /// Append one grouping key to the existing ones
    pub fn add_group_key(self, key: &str) -> SensorResult<Self> {
        let mut keys: Vec<String> = self.group_keys.clone();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.group_by(&keys)
    }

    /// Remove all grouping
    pub fn ungroup(mut self) -> Self {
        self.group_keys.clear();
        self
    }

    /// Gather rows into a new table with the same schema and grouping
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        TidyTable {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.take(rows)))
                .collect(),
            group_keys: self.group_keys.clone(),
            n_rows: rows.len(),
        }
    }

    /// Keep rows for which the predicate holds
    pub fn filter_rows(&self, keep: impl Fn(usize) -> bool) -> Self {
        let rows: Vec<usize> = (0..self.n_rows).filter(|&i| keep(i)).collect();
        self.take_rows(&rows)
    }

    /// Stable sort of all rows by one column
    pub fn arrange(&self, name: &str) -> SensorResult<Self> {
        let mut rows: Vec<usize> = (0..self.n_rows).collect();
        match self.require(name)? {
            ColumnData::Float(v) => rows.sort_by(|&a, &b| v[a].total_cmp(&v[b])),
            ColumnData::Label(v) => rows.sort_by(|&a, &b| v[a].cmp(&v[b])),
            ColumnData::Index(v) => rows.sort_by_key(|&i| v[i]),
        }
        Ok(self.take_rows(&rows))
    }

    /// Partition rows by the grouping keys, in order of first appearance.
    ///
    /// An ungrouped, non-empty table is a single group with no key values.
    pub fn groups(&self) -> Vec<Group> {
        if self.n_rows == 0 {
            return Vec::new();
        }
        if self.group_keys.is_empty() {
            return vec![Group {
                keys: Vec::new(),
                rows: (0..self.n_rows).collect(),
            }];
        }

        let key_columns: Vec<&ColumnData> = self
            .group_keys
            .iter()
            .filter_map(|k| self.column(k))
            .collect();

        let mut groups: Vec<Group> = Vec::new();
        let mut lookup: HashMap<Vec<KeyValue>, usize> = HashMap::new();
        for row in 0..self.n_rows {
            let keys: Vec<KeyValue> = key_columns
                .iter()
                .filter_map(|c| c.key_at(row))
                .collect();
            match lookup.get(&keys) {
                Some(&g) => groups[g].rows.push(row),
                None => {
                    lookup.insert(keys.clone(), groups.len());
                    groups.push(Group {
                        keys,
                        rows: vec![row],
                    });
                }
            }
        }
        groups
    }

    /// Apply `f` to each group's sub-table and stack the results.
    ///
    /// Stops at the first error returned by `f`.
    pub fn map_groups<E, F>(&self, mut f: F) -> Result<TidyTable, E>
    where
        E: From<SensorError>,
        F: FnMut(&Group, TidyTable) -> Result<TidyTable, E>,
    {
        let mut parts = Vec::new();
        for group in self.groups() {
            let sub = self.take_rows(&group.rows);
            parts.push(f(&group, sub)?);
        }
        if parts.is_empty() {
            return Ok(self.clone());
        }
        Ok(TidyTable::concat(parts)?)
    }

    /// Stack tables with identical schemas; grouping follows the first
    pub fn concat(parts: Vec<TidyTable>) -> SensorResult<TidyTable> {
        let mut iter = parts.into_iter();
        let mut out = match iter.next() {
            Some(first) => first,
            None => return Ok(TidyTable::new()),
        };

        for part in iter {
            if part.columns.len() != out.columns.len() {
                return Err(SensorError::malformed(format!(
                    "cannot stack tables with {} and {} columns",
                    out.columns.len(),
                    part.columns.len()
                )));
            }
            for column in out.columns.iter_mut() {
                let other = part
                    .column(&column.name)
                    .ok_or_else(|| SensorError::missing_column(column.name.clone()))?;
                column.data.append(other, &column.name)?;
            }
            out.n_rows += part.n_rows;
        }
        Ok(out)
    }
}

/// Sampling rate of a timestamp vector: `(n - 1) / (t_last - t_first)`.
///
/// `None` for fewer than two samples or a non-positive duration.
pub fn sampling_rate(t: &[f64]) -> Option<f64> {
    let (first, last) = (t.first()?, t.last()?);
    let duration = last - first;
    if t.len() < 2 || !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    Some((t.len() - 1) as f64 / duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TidyTable {
        TidyTable::from_columns(vec![
            Column::new(columns::T, ColumnData::Float(vec![0.0, 0.1, 0.0, 0.1])),
            Column::new(
                columns::AXIS,
                ColumnData::Label(vec!["x".into(), "x".into(), "y".into(), "y".into()]),
            ),
            Column::new(columns::VALUE, ColumnData::Float(vec![1.0, 2.0, 3.0, 4.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_rejects_ragged() {
        let result = TidyTable::from_columns(vec![
            Column::new("a", ColumnData::Float(vec![1.0])),
            Column::new("b", ColumnData::Float(vec![1.0, 2.0])),
        ]);
        assert!(matches!(result, Err(SensorError::LengthMismatch { .. })));
    }

    #[test]
    fn test_groups_preserve_first_appearance() {
        let table = sample_table().group_by(&[columns::AXIS]).unwrap();
        let groups = table.groups();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].keys, vec![KeyValue::Label("x".into())]);
        assert_eq!(groups[0].rows, vec![0, 1]);
        assert_eq!(groups[1].rows, vec![2, 3]);
    }

    #[test]
    fn test_ungrouped_is_single_group() {
        let groups = sample_table().groups();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].keys.is_empty());
        assert_eq!(groups[0].rows.len(), 4);
    }

    #[test]
    fn test_group_by_float_rejected() {
        let result = sample_table().group_by(&[columns::VALUE]);
        assert!(matches!(result, Err(SensorError::ColumnType { .. })));
    }

    #[test]
    fn test_map_groups_restacks() {
        let table = sample_table().group_by(&[columns::AXIS]).unwrap();
        let doubled = table
            .map_groups(|_, sub| -> SensorResult<TidyTable> {
                let values: Vec<f64> = sub.floats(columns::VALUE)?.iter().map(|v| v * 2.0).collect();
                sub.with_column(columns::VALUE, ColumnData::Float(values))
            })
            .unwrap();

        assert_eq!(doubled.floats(columns::VALUE).unwrap(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(doubled.group_keys(), &[columns::AXIS.to_string()]);
    }

    #[test]
    fn test_arrange_is_explicit_and_stable() {
        let sorted = sample_table().arrange(columns::T).unwrap();
        assert_eq!(sorted.floats(columns::VALUE).unwrap(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_without_column_drops_group_key() {
        let table = sample_table()
            .group_by(&[columns::AXIS])
            .unwrap()
            .without_column(columns::AXIS);
        assert!(table.group_keys().is_empty());
        assert!(!table.has_column(columns::AXIS));
    }

    #[test]
    fn test_sampling_rate() {
        let t: Vec<f64> = (0..101).map(|i| i as f64 * 0.01).collect();
        let fs = sampling_rate(&t).unwrap();
        assert!((fs - 100.0).abs() < 1e-9);

        assert!(sampling_rate(&[0.0]).is_none());
        assert!(sampling_rate(&[1.0, 1.0]).is_none());
    }
}
