//! Row and columnar sample representations.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::columns::{SampleColumn, SampleColumns};

/// One timestamped observation.
///
/// Every column is optional; a sample with no values at all is a
/// placeholder standing in for missing data.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    values: [Option<f64>; SampleColumn::COUNT],
}

impl Sample {
    /// Create a sample with every column absent.
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            values: [None; SampleColumn::COUNT],
        }
    }

    /// Create a placeholder sample. Identical to [`Sample::new`], named for
    /// readability at gap-filling call sites.
    #[must_use]
    pub fn placeholder(timestamp: i64) -> Self {
        Self::new(timestamp)
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, column: SampleColumn, value: f64) -> Self {
        self.values[column.index()] = Some(value);
        self
    }

    /// Value of a column, if present.
    #[must_use]
    pub fn get(&self, column: SampleColumn) -> Option<f64> {
        self.values[column.index()]
    }

    /// Set or clear a column.
    pub fn set(&mut self, column: SampleColumn, value: Option<f64>) {
        self.values[column.index()] = value;
    }

    /// Whether no column carries a value.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Clear every column not in `columns`.
    pub fn retain_columns(&mut self, columns: SampleColumns) {
        for column in SampleColumn::ALL {
            if !columns.contains(column) {
                self.values[column.index()] = None;
            }
        }
    }

    /// Whether the values of `columns` match `other` exactly.
    #[must_use]
    pub fn same_values(&self, other: &Sample, columns: SampleColumns) -> bool {
        columns.iter().all(|c| match (self.get(c), other.get(c)) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            (None, None) => true,
            _ => false,
        })
    }

    /// Timestamp as a UTC date-time.
    #[must_use]
    pub fn time(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.timestamp).ok()
    }
}

/// Columnar query result.
///
/// Holds one ordered timestamp sequence and one index-aligned value sequence
/// per requested column. All sequences always have the same length.
///
/// # Example
///
/// ```
/// use wxcache_types::{Sample, SampleColumn, SampleColumns, SampleSet};
///
/// let columns = SampleColumns::from(SampleColumn::Temperature);
/// let rows = vec![
///     Sample::new(0).with(SampleColumn::Temperature, 12.5),
///     Sample::placeholder(300),
/// ];
/// let set = SampleSet::from_rows(columns, &rows);
///
/// assert_eq!(set.len(), 2);
/// assert_eq!(set.column(SampleColumn::Temperature).unwrap(), &[Some(12.5), None]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleSet {
    columns: SampleColumns,
    timestamps: Vec<i64>,
    values: BTreeMap<SampleColumn, Vec<Option<f64>>>,
}

impl SampleSet {
    /// Create an empty set for the given columns.
    #[must_use]
    pub fn new(columns: SampleColumns) -> Self {
        Self::with_capacity(columns, 0)
    }

    /// Create an empty set with room for `capacity` rows.
    #[must_use]
    pub fn with_capacity(columns: SampleColumns, capacity: usize) -> Self {
        Self {
            columns,
            timestamps: Vec::with_capacity(capacity),
            values: columns
                .iter()
                .map(|c| (c, Vec::with_capacity(capacity)))
                .collect(),
        }
    }

    /// Build a set from rows, keeping only `columns`.
    #[must_use]
    pub fn from_rows(columns: SampleColumns, rows: &[Sample]) -> Self {
        let mut set = Self::with_capacity(columns, rows.len());
        for row in rows {
            set.push(row);
        }
        set
    }

    /// Append one row.
    pub fn push(&mut self, sample: &Sample) {
        self.timestamps.push(sample.timestamp);
        for (column, values) in self.values.iter_mut() {
            values.push(sample.get(*column));
        }
    }

    /// Columns carried by this set.
    #[must_use]
    pub fn columns(&self) -> SampleColumns {
        self.columns
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the set has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Row timestamps, ascending.
    #[must_use]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Values for one column, or `None` if it was not requested.
    #[must_use]
    pub fn column(&self, column: SampleColumn) -> Option<&[Option<f64>]> {
        self.values.get(&column).map(Vec::as_slice)
    }

    /// Reassemble row `index` as a [`Sample`].
    #[must_use]
    pub fn row(&self, index: usize) -> Option<Sample> {
        let timestamp = *self.timestamps.get(index)?;
        let mut sample = Sample::new(timestamp);
        for (column, values) in &self.values {
            sample.set(*column, values[index]);
        }
        Some(sample)
    }

    /// Iterate rows as [`Sample`]s.
    pub fn rows(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).filter_map(|i| self.row(i))
    }
}
