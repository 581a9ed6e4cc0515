//! Sample query builder and aggregation planning.
//!
//! [`SampleQuery`] is a fluent description of what to read from the sample
//! table. [`SampleQuery::plan`] turns it into a [`QueryPlan`]: the SQL text
//! for the row query, the SQL text for the matching count query, and the
//! parameters to bind. Planning never touches the database.
//!
//! # Aggregation rules
//!
//! - The reducer follows the aggregate function (`avg`, `min`, `max`, and
//!   `sum` for both sum and running total).
//! - Under sum and running total only summable columns are summed. Every
//!   other requested column is averaged instead.
//! - Groups are ordered by a key that increases with time. The row timestamp
//!   is the earliest sample in the group.
//! - Running totals are not computed in SQL. Use [`apply_running_totals`] on
//!   the per-group sums.
//!
//! # Example
//!
//! ```
//! use wxcache_store::SampleQuery;
//! use wxcache_types::{AggregateFunction, SampleColumn, SampleColumns};
//!
//! let plan = SampleQuery::new(0, 7200)
//!     .columns(SampleColumns::empty() | SampleColumn::Temperature | SampleColumn::Rainfall)
//!     .aggregate(AggregateFunction::Sum)
//!     .custom_groups(60)
//!     .plan()?;
//!
//! assert!(plan.sql.contains("avg(temperature)"));
//! assert!(plan.sql.contains("sum(rainfall)"));
//! # Ok::<(), wxcache_store::Error>(())
//! ```

use rusqlite::types::Value;
use wxcache_types::{AggregateFunction, DataSet, GroupType, Sample, SampleColumn, SampleColumns};

use crate::error::{Error, Result};
use crate::models::StationId;

/// Fluent builder for sample queries.
///
/// The range is inclusive at both ends, in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleQuery {
    /// Columns to return.
    pub columns: SampleColumns,
    /// Inclusive start.
    pub start: i64,
    /// Inclusive end.
    pub end: i64,
    /// Reduction per group.
    pub aggregate: AggregateFunction,
    /// Grouping strategy.
    pub group: GroupType,
    /// Group length for custom grouping.
    pub group_minutes: u32,
}

impl SampleQuery {
    /// Raw query over `[start, end]` with no columns selected.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            columns: SampleColumns::empty(),
            start,
            end,
            aggregate: AggregateFunction::None,
            group: GroupType::None,
            group_minutes: 0,
        }
    }

    /// Query matching a data set request.
    pub fn from_data_set(data_set: &DataSet) -> Self {
        Self {
            columns: data_set.columns,
            start: data_set.start_timestamp(),
            end: data_set.end_timestamp(),
            aggregate: data_set.aggregate,
            group: data_set.group,
            group_minutes: data_set.group_minutes,
        }
    }

    /// Select these columns.
    pub fn columns(mut self, columns: SampleColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Restrict to `[start, end]`.
    pub fn range(mut self, start: i64, end: i64) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Reduce each group with `function`.
    pub fn aggregate(mut self, function: AggregateFunction) -> Self {
        self.aggregate = function;
        self
    }

    /// Group by a calendar or fixed period.
    pub fn group_by(mut self, group: GroupType) -> Self {
        self.group = group;
        self
    }

    /// Group into fixed buckets of `minutes`.
    pub fn custom_groups(mut self, minutes: u32) -> Self {
        self.group = GroupType::Custom;
        self.group_minutes = minutes;
        self
    }

    /// Whether this query takes the grouped path.
    pub fn is_aggregated(&self) -> bool {
        self.aggregate != AggregateFunction::None && self.group != GroupType::None
    }

    /// Build the query plan.
    pub fn plan(&self) -> Result<QueryPlan> {
        if self.is_aggregated() {
            self.plan_aggregated()
        } else {
            Ok(self.plan_raw())
        }
    }

    fn plan_raw(&self) -> QueryPlan {
        let columns: Vec<SampleColumn> = self.columns.iter().collect();
        let mut select = vec!["time_stamp".to_string()];
        select.extend(columns.iter().map(|c| c.name().to_string()));

        let sql = format!(
            "SELECT {} FROM sample {} ORDER BY time_stamp ASC",
            select.join(", "),
            WHERE_RANGE
        );
        let count_sql = format!("SELECT COUNT(*) FROM sample {}", WHERE_RANGE);

        QueryPlan {
            sql,
            count_sql,
            columns,
            start: self.start,
            end: self.end,
            group_seconds: None,
            running_total: self.aggregate == AggregateFunction::RunningTotal,
        }
    }

    fn plan_aggregated(&self) -> Result<QueryPlan> {
        let reducer = self
            .aggregate
            .sql_reducer()
            .ok_or_else(|| Error::InvalidQuery("aggregate function required".to_string()))?;

        let (group_key, group_seconds) = match self.group {
            GroupType::Custom => {
                if self.group_minutes == 0 {
                    return Err(Error::InvalidQuery(
                        "custom grouping requires a non-zero group length".to_string(),
                    ));
                }
                ("time_stamp / ?4", Some(i64::from(self.group_minutes) * 60))
            }
            GroupType::Hour => ("(time_stamp / 3600) * 3600", None),
            GroupType::Day => ("(time_stamp / 86400) * 86400", None),
            GroupType::Month => (
                "CAST(strftime('%s', time_stamp, 'unixepoch', 'start of month') AS INTEGER)",
                None,
            ),
            GroupType::Year => (
                "CAST(strftime('%s', time_stamp, 'unixepoch', 'start of year') AS INTEGER)",
                None,
            ),
            GroupType::None => {
                return Err(Error::InvalidQuery("grouping required".to_string()));
            }
        };

        let columns: Vec<SampleColumn> = self.columns.iter().collect();
        let mut select = vec!["MIN(time_stamp) AS time_stamp".to_string()];
        for column in &columns {
            // Summing an intensity is meaningless; average it instead.
            let column_reducer = if self.aggregate.is_summing() && !column.is_summable() {
                "avg"
            } else {
                reducer
            };
            select.push(format!("{}({}) AS {}", column_reducer, column.name(), column.name()));
        }
        select.push(format!("{} AS group_key", group_key));

        let sql = format!(
            "SELECT {} FROM sample {} GROUP BY group_key ORDER BY group_key ASC",
            select.join(", "),
            WHERE_RANGE
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM (SELECT {} AS group_key FROM sample {} GROUP BY group_key)",
            group_key, WHERE_RANGE
        );

        Ok(QueryPlan {
            sql,
            count_sql,
            columns,
            start: self.start,
            end: self.end,
            group_seconds,
            running_total: self.aggregate == AggregateFunction::RunningTotal,
        })
    }
}

const WHERE_RANGE: &str = "WHERE station_id = ?1 AND time_stamp >= ?2 AND time_stamp <= ?3";

/// An executable query.
///
/// Result rows are `time_stamp` followed by one value per entry of
/// [`QueryPlan::columns`], in that order. Aggregated plans carry a trailing
/// `group_key` column that callers ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Row query.
    pub sql: String,
    /// Query returning the number of rows [`QueryPlan::sql`] would produce.
    pub count_sql: String,
    /// Value columns in result order.
    pub columns: Vec<SampleColumn>,
    pub start: i64,
    pub end: i64,
    /// Custom group length bound as `?4`.
    pub group_seconds: Option<i64>,
    /// Caller must accumulate running totals over the rows.
    pub running_total: bool,
}

impl QueryPlan {
    /// Parameters to bind for `station_id`.
    pub fn params(&self, station_id: StationId) -> Vec<Value> {
        let mut params = vec![
            Value::Integer(station_id),
            Value::Integer(self.start),
            Value::Integer(self.end),
        ];
        if let Some(seconds) = self.group_seconds {
            params.push(Value::Integer(seconds));
        }
        params
    }

    /// Requested columns as a set.
    pub fn column_set(&self) -> SampleColumns {
        self.columns.iter().copied().collect()
    }
}

/// Turn per-group sums into running totals, in place.
///
/// Only summable columns (rainfall and evapotranspiration) are accumulated,
/// each with its own total. A group with no value keeps no value and leaves
/// the total unchanged.
pub fn apply_running_totals(rows: &mut [Sample], columns: SampleColumns) {
    for column in columns.summable().iter() {
        let mut total = 0.0;
        for row in rows.iter_mut() {
            if let Some(value) = row.get(column) {
                total += value;
                row.set(column, Some(total));
            }
        }
    }
}
