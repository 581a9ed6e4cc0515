//! Data set request descriptors.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::columns::SampleColumns;
use crate::error::{ParseError, ParseResult};

/// Reduction applied to each column within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum AggregateFunction {
    /// No aggregation; raw samples.
    #[default]
    None,
    Average,
    Minimum,
    Maximum,
    Sum,
    /// Per-group sum accumulated across groups in time order.
    RunningTotal,
}

impl AggregateFunction {
    /// SQL reducer for this function. Sum and running total share `sum`.
    #[must_use]
    pub const fn sql_reducer(self) -> Option<&'static str> {
        match self {
            AggregateFunction::None => None,
            AggregateFunction::Average => Some("avg"),
            AggregateFunction::Minimum => Some("min"),
            AggregateFunction::Maximum => Some("max"),
            AggregateFunction::Sum | AggregateFunction::RunningTotal => Some("sum"),
        }
    }

    /// Whether summable columns are summed rather than reduced normally.
    #[must_use]
    pub const fn is_summing(self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::RunningTotal)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFunction::None => "none",
            AggregateFunction::Average => "average",
            AggregateFunction::Minimum => "minimum",
            AggregateFunction::Maximum => "maximum",
            AggregateFunction::Sum => "sum",
            AggregateFunction::RunningTotal => "running_total",
        };
        f.write_str(name)
    }
}

impl FromStr for AggregateFunction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AggregateFunction::None),
            "average" | "avg" => Ok(AggregateFunction::Average),
            "minimum" | "min" => Ok(AggregateFunction::Minimum),
            "maximum" | "max" => Ok(AggregateFunction::Maximum),
            "sum" => Ok(AggregateFunction::Sum),
            "running_total" | "runningtotal" => Ok(AggregateFunction::RunningTotal),
            _ => Err(ParseError::UnknownAggregate(s.to_string())),
        }
    }
}

/// Time bucketing strategy for aggregated queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum GroupType {
    #[default]
    None,
    Hour,
    Day,
    Month,
    Year,
    /// Fixed buckets of [`DataSet::group_minutes`] minutes.
    Custom,
}

impl GroupType {
    /// Fixed bucket length in seconds, when the grouping has one.
    ///
    /// Months and years vary in length and return `None`.
    #[must_use]
    pub const fn fixed_seconds(self, group_minutes: u32) -> Option<i64> {
        match self {
            GroupType::Hour => Some(3600),
            GroupType::Day => Some(86_400),
            GroupType::Custom => Some(group_minutes as i64 * 60),
            GroupType::None | GroupType::Month | GroupType::Year => None,
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupType::None => "none",
            GroupType::Hour => "hour",
            GroupType::Day => "day",
            GroupType::Month => "month",
            GroupType::Year => "year",
            GroupType::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl FromStr for GroupType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(GroupType::None),
            "hour" => Ok(GroupType::Hour),
            "day" => Ok(GroupType::Day),
            "month" => Ok(GroupType::Month),
            "year" => Ok(GroupType::Year),
            "custom" => Ok(GroupType::Custom),
            _ => Err(ParseError::UnknownGroupType(s.to_string())),
        }
    }
}

/// A request for samples: columns, time range and aggregation.
///
/// # Example
///
/// ```
/// use time::macros::datetime;
/// use wxcache_types::{AggregateFunction, DataSet, SampleColumn, SampleColumns};
///
/// let ds = DataSet::new(
///     SampleColumns::from(SampleColumn::Temperature),
///     datetime!(2024-01-01 0:00 UTC),
///     datetime!(2024-01-02 0:00 UTC),
/// )
/// .aggregate(AggregateFunction::Average)
/// .custom_groups(60);
///
/// assert!(ds.is_aggregated());
/// assert_eq!(ds.group_seconds(), Some(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataSet {
    /// Caller-assigned identifier, echoed back in events.
    pub id: u32,
    /// Columns to return.
    pub columns: SampleColumns,
    /// Inclusive start of the range.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start: OffsetDateTime,
    /// Inclusive end of the range.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub end: OffsetDateTime,
    /// Reduction per group.
    pub aggregate: AggregateFunction,
    /// Bucketing strategy.
    pub group: GroupType,
    /// Bucket length for [`GroupType::Custom`].
    pub group_minutes: u32,
}

impl DataSet {
    /// Create a raw (non-aggregated) request.
    #[must_use]
    pub fn new(columns: SampleColumns, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            id: 0,
            columns,
            start,
            end,
            aggregate: AggregateFunction::None,
            group: GroupType::None,
            group_minutes: 0,
        }
    }

    /// Set the identifier.
    #[must_use]
    pub fn id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// Set the aggregate function.
    #[must_use]
    pub fn aggregate(mut self, function: AggregateFunction) -> Self {
        self.aggregate = function;
        self
    }

    /// Group by a calendar or fixed period.
    #[must_use]
    pub fn group_by(mut self, group: GroupType) -> Self {
        self.group = group;
        self
    }

    /// Group into fixed buckets of `minutes`.
    #[must_use]
    pub fn custom_groups(mut self, minutes: u32) -> Self {
        self.group = GroupType::Custom;
        self.group_minutes = minutes;
        self
    }

    /// Whether the request needs the grouped query path.
    ///
    /// Both an aggregate function and a grouping are required; either one
    /// alone falls back to raw samples.
    #[must_use]
    pub fn is_aggregated(&self) -> bool {
        self.aggregate != AggregateFunction::None && self.group != GroupType::None
    }

    /// Fixed bucket length in seconds, if any.
    #[must_use]
    pub fn group_seconds(&self) -> Option<i64> {
        self.group.fixed_seconds(self.group_minutes)
    }

    /// Start as unix seconds.
    #[must_use]
    pub fn start_timestamp(&self) -> i64 {
        self.start.unix_timestamp()
    }

    /// End as unix seconds.
    #[must_use]
    pub fn end_timestamp(&self) -> i64 {
        self.end.unix_timestamp()
    }

    /// Check the request is internally consistent.
    pub fn validate(&self) -> ParseResult<()> {
        if self.start > self.end {
            return Err(ParseError::InvalidDataSet(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.group == GroupType::Custom && self.group_minutes == 0 {
            return Err(ParseError::InvalidDataSet(
                "custom grouping requires a non-zero group length".to_string(),
            ));
        }
        Ok(())
    }
}
