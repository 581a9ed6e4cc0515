//! Data models for cached data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Row id of a station.
pub type StationId = i64;

/// Row id of a remote data file.
pub type RemoteFileId = i64;

/// Provenance of one remote month file as last observed on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMeta {
    /// Full URL of the file.
    pub url: String,
    /// `Last-Modified` as reported by the server.
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    /// Size in bytes.
    pub size: u64,
    /// The file covers its whole month without gaps.
    pub is_complete: bool,
    /// End of the gap-free run starting at the month start, if any.
    pub start_contiguous_to: Option<i64>,
    /// Start of the gap-free run ending at the month end, if any.
    pub end_contiguous_from: Option<i64>,
}

impl RemoteFileMeta {
    /// Meta for a file with no completeness information.
    pub fn new(url: impl Into<String>, last_modified: OffsetDateTime, size: u64) -> Self {
        Self {
            url: url.into(),
            last_modified,
            size,
            is_complete: false,
            start_contiguous_to: None,
            end_contiguous_from: None,
        }
    }
}

/// A remote file record stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRemoteFile {
    /// Database row ID.
    pub id: RemoteFileId,
    /// Owning station.
    pub station_id: StationId,
    /// Last observed server state.
    pub meta: RemoteFileMeta,
}

/// Cached samples attributed to one remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSampleStats {
    /// Earliest cached timestamp.
    pub first: i64,
    /// Latest cached timestamp.
    pub last: i64,
    /// Number of cached samples.
    pub count: u64,
}

impl FileSampleStats {
    /// Whether `timestamp` falls inside the cached window.
    pub fn covers(&self, timestamp: i64) -> bool {
        timestamp >= self.first && timestamp <= self.last
    }
}

/// Earliest and latest cached sample for a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRange {
    pub earliest: i64,
    pub latest: i64,
}

impl SampleRange {
    /// Whether `[start, end]` lies entirely inside this range.
    pub fn contains(&self, start: i64, end: i64) -> bool {
        start >= self.earliest && end <= self.latest
    }

    /// Clip `[start, end]` to this range. `None` when they do not overlap.
    pub fn clip(&self, start: i64, end: i64) -> Option<(i64, i64)> {
        let start = start.max(self.earliest);
        let end = end.min(self.latest);
        (start <= end).then_some((start, end))
    }
}

/// Result of caching one data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWrite {
    /// Remote file record that was written.
    pub file_id: RemoteFileId,
    /// Samples removed before inserting.
    pub truncated: usize,
    /// Samples inserted or updated.
    pub inserted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_range_contains() {
        let range = SampleRange {
            earliest: 100,
            latest: 200,
        };
        assert!(range.contains(100, 200));
        assert!(range.contains(150, 160));
        assert!(!range.contains(50, 160));
        assert!(!range.contains(150, 260));
    }

    #[test]
    fn test_sample_range_clip() {
        let range = SampleRange {
            earliest: 100,
            latest: 200,
        };
        assert_eq!(range.clip(0, 1000), Some((100, 200)));
        assert_eq!(range.clip(150, 1000), Some((150, 200)));
        assert_eq!(range.clip(300, 400), None);
    }

    #[test]
    fn test_file_stats_covers() {
        let stats = FileSampleStats {
            first: 10,
            last: 20,
            count: 3,
        };
        assert!(stats.covers(10));
        assert!(stats.covers(20));
        assert!(!stats.covers(21));
    }
}
