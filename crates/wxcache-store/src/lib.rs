//! Local sample cache for weather station data.
//!
//! This crate provides the SQLite-backed cache that sits between the remote
//! data publisher and the charting client. It stores station metadata,
//! provenance for every downloaded month file, and the samples themselves,
//! and answers raw and aggregated queries over them.
//!
//! # Features
//!
//! - Station metadata and extra sensor configuration
//! - Per-file provenance with completeness tracking
//! - Idempotent bulk sample inserts (last write wins)
//! - Raw and grouped queries (average, min, max, sum, running total)
//! - CSV export
//!
//! # Example
//!
//! ```no_run
//! use wxcache_store::{SampleQuery, Store};
//! use wxcache_types::{AggregateFunction, GroupType, SampleColumn};
//!
//! let store = Store::open_default()?;
//! let station = store.get_or_create_station("https://example.com/weather/data/sb/")?;
//!
//! let query = SampleQuery::new(1_704_067_200, 1_706_745_599)
//!     .columns(SampleColumn::Temperature.into())
//!     .aggregate(AggregateFunction::Average)
//!     .group_by(GroupType::Day);
//! let rows = store.query_samples(station, &query)?;
//! # Ok::<(), wxcache_store::Error>(())
//! ```

mod error;
pub mod export;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{
    CacheWrite, FileSampleStats, RemoteFileId, RemoteFileMeta, SampleRange, StationId,
    StoredRemoteFile,
};
pub use queries::{QueryPlan, SampleQuery, apply_running_totals};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/wxcache/cache.db`
/// - macOS: `~/Library/Application Support/wxcache/cache.db`
/// - Windows: `C:\Users\<user>\AppData\Local\wxcache\cache.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("wxcache")
        .join("cache.db")
}
