//! Fetch weather station samples through a local cache.
//!
//! This crate downloads monthly sample files from a weather data server,
//! reconciles them with the SQLite cache in `wxcache-store`, and answers
//! raw or aggregated queries from the cache.
//!
//! # Features
//!
//! - **Incremental sync**: only months that changed on the server are
//!   downloaded, and complete months are never downloaded twice
//! - **Reconciliation**: grown files append, rewritten files replace
//! - **Aggregation**: average, min, max, sum and running totals over
//!   custom, hourly, daily, monthly and yearly groups
//! - **Gap filling**: placeholder rows where the station was offline
//! - **Single flight**: one fetch per station at a time, cancellable
//! - **Progress events**: step and file events on a broadcast channel
//!
//! # Server layout
//!
//! | Document | URL |
//! |----------|-----|
//! | Station configuration | `<base>data/sysconfig.json` |
//! | Sample range | `<base>data/<code>/samplerange.json` |
//! | Rain totals | `<base>data/<code>/rain_summary.json` |
//! | Month file | `<base>data/<code>/<year>/<month>/samples.dat` |
//!
//! # Quick Start
//!
//! ```no_run
//! use time::macros::datetime;
//! use wxcache_core::{Config, DataSource, FetchRequest};
//! use wxcache_types::{AggregateFunction, DataSet, GroupType, SampleColumn, SampleColumns};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default()?;
//!     let source = DataSource::from_config(&config)?;
//!
//!     let columns = SampleColumns::from(SampleColumn::Temperature) | SampleColumn::Rainfall;
//!     let data_set = DataSet::new(
//!         columns,
//!         datetime!(2024-01-01 0:00 UTC),
//!         datetime!(2024-02-01 0:00 UTC),
//!     )
//!     .aggregate(AggregateFunction::Average)
//!     .group_by(GroupType::Day);
//!
//!     let samples = source.fetch(FetchRequest::new("sb", data_set)).await?;
//!     println!("{} daily rows", samples.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datafile;
pub mod error;
pub mod events;
pub mod gaps;
pub mod json;
pub mod mock;
pub mod remote;
pub mod source;
pub mod sync;
pub mod tasks;
pub mod urls;

pub use config::{Config, ConfigError, RemoteConfig, StorageConfig, SyncConfig, ValidationError};
pub use datafile::{Completeness, detect_completeness, parse_data_file};
pub use error::{Error, NetworkFailure, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, FetchEvent, SkipReason};
pub use gaps::{gap_interval, synthesize};
pub use mock::MockRemote;
pub use remote::{HttpRemote, RemoteBody, RemoteHead, RemoteSource};
pub use source::{DataSource, FetchHandle, FetchRequest};
pub use sync::{FileTarget, RemoteFileSync, SyncOptions, SyncOutcome, SyncReport, SyncState};
pub use tasks::{FetchContext, SessionState, Step, TaskQueue};
pub use urls::StationUrls;

// Re-export the data model and cache
pub use wxcache_store::Store;
pub use wxcache_types;
