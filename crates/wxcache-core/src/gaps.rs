//! Placeholder rows for missing data.
//!
//! Charts draw a line between consecutive samples. When a station was
//! offline that line would bridge the outage, so empty rows are inserted
//! where consecutive samples are too far apart.

use wxcache_types::{AggregateFunction, GroupType, Sample};

/// Spacing used for gap detection, in seconds.
///
/// Raw queries use the station sample interval and fixed groupings use the
/// group length. Month and year groupings vary in length and get `None`, as
/// does a zero interval.
pub fn gap_interval(
    aggregate: AggregateFunction,
    group: GroupType,
    group_minutes: u32,
    station_interval: u32,
) -> Option<i64> {
    let interval = if aggregate == AggregateFunction::None || group == GroupType::None {
        Some(i64::from(station_interval))
    } else {
        group.fixed_seconds(group_minutes)
    };
    interval.filter(|i| *i > 0)
}

/// Insert placeholder rows into `rows`.
///
/// Starting from `start`, whenever the next real row is more than two
/// intervals after the previous timestamp, placeholders are added every
/// `interval` seconds up to and including one interval before that row.
/// `rows` must be sorted by timestamp. A non-positive interval returns the
/// rows unchanged.
pub fn synthesize(rows: Vec<Sample>, start: i64, interval: i64) -> Vec<Sample> {
    if interval <= 0 {
        return rows;
    }

    let mut out = Vec::with_capacity(rows.len());
    let mut last = start;
    for row in rows {
        if row.timestamp > last + 2 * interval {
            let mut t = last + interval;
            while t <= row.timestamp - interval {
                out.push(Sample::placeholder(t));
                t += interval;
            }
        }
        last = row.timestamp;
        out.push(row);
    }
    out
}
