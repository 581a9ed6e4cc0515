//! Shared types for the wxcache weather data cache.
//!
//! This crate holds the plain data types passed between the cache store,
//! the synchronisation engine and the GUI layer. It does no I/O.
//!
//! # Features
//!
//! - Closed set of measurement columns split into standard and extra tiers
//! - Column bitsets for requests and station capabilities
//! - Row ([`Sample`]) and columnar ([`SampleSet`]) sample representations
//! - Request descriptors ([`DataSet`]) with aggregate and grouping options
//! - Station metadata
//!
//! # Example
//!
//! ```
//! use time::macros::datetime;
//! use wxcache_types::{AggregateFunction, DataSet, GroupType, SampleColumn, SampleColumns};
//!
//! let request = DataSet::new(
//!     SampleColumns::empty() | SampleColumn::Temperature | SampleColumn::Rainfall,
//!     datetime!(2024-03-01 0:00 UTC),
//!     datetime!(2024-03-31 23:59 UTC),
//! )
//! .aggregate(AggregateFunction::RunningTotal)
//! .group_by(GroupType::Day);
//!
//! assert!(request.validate().is_ok());
//! ```

pub mod columns;
pub mod dataset;
pub mod error;
pub mod sample;
pub mod station;

pub use columns::{ColumnTier, SampleColumn, SampleColumns};
pub use dataset::{AggregateFunction, DataSet, GroupType};
pub use error::{ParseError, ParseResult};
pub use sample::{Sample, SampleSet};
pub use station::{Coordinates, ExtraSensor, HardwareType, RainTotals, StationInfo};
