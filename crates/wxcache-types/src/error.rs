//! Error types for parsing and validating wxcache values.

use thiserror::Error;

/// Errors that can occur when parsing or validating shared types.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// A column name did not match any known sample column.
    #[error("Unknown sample column: {0}")]
    UnknownColumn(String),

    /// An aggregate function name was not recognised.
    #[error("Unknown aggregate function: {0}")]
    UnknownAggregate(String),

    /// A group type name was not recognised.
    #[error("Unknown group type: {0}")]
    UnknownGroupType(String),

    /// A data set request is not internally consistent.
    #[error("Invalid data set: {0}")]
    InvalidDataSet(String),
}

/// Result type alias using wxcache-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
