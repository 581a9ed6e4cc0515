//! Error types for wxcache-core.
//!
//! Every failure that can end a fetch is one of the variants below. A fetch
//! operation delivers at most one error to its caller, and never retries on
//! its own.
//!
//! | Error | Typical cause | Cache state afterwards |
//! |-------|---------------|------------------------|
//! | [`Error::Network`] | Server unreachable, non-2xx status, bad URL | Earlier month files stay cached |
//! | [`Error::Parse`] | Malformed `samples.dat` line or JSON document | Offending file not written |
//! | [`Error::Storage`] | SQLite failure | Failing transaction rolled back |
//! | [`Error::Busy`] | Second fetch for a station already fetching | Untouched |
//! | [`Error::Cancelled`] | [`crate::FetchHandle::cancel`] | Committed writes kept |
//! | [`Error::InvalidRequest`] | Start after end, zero custom group length | Untouched |

use thiserror::Error;

/// Why a network request failed.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NetworkFailure {
    /// Connection, TLS or timeout failure.
    Transport(String),
    /// Server answered with a non-success status.
    Status(u16),
    /// URL could not be used.
    InvalidUrl(String),
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "{}", msg),
            Self::Status(status) => write!(f, "server returned HTTP {}", status),
            Self::InvalidUrl(msg) => write!(f, "invalid URL: {}", msg),
        }
    }
}

/// Errors that can occur while fetching and querying samples.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A request to the data server failed.
    #[error("Network error for {url}: {reason}")]
    Network {
        /// The URL being requested.
        url: String,
        /// What went wrong.
        reason: NetworkFailure,
    },

    /// A downloaded document could not be parsed.
    #[error("Parse error at {location}: {message}")]
    Parse {
        /// URL, with a line number for data files.
        location: String,
        /// Description of the problem.
        message: String,
    },

    /// The local cache failed.
    #[error(transparent)]
    Storage(#[from] wxcache_store::Error),

    /// The station already has a fetch in flight.
    #[error("A fetch is already running for station '{0}'")]
    Busy(String),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// The request can never succeed as given.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server does not publish the requested station.
    #[error("Station '{0}' not found on server")]
    StationNotFound(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a network error.
    pub fn network(url: impl Into<String>, reason: NetworkFailure) -> Self {
        Self::Network {
            url: url.into(),
            reason,
        }
    }

    /// Create a network error for a non-success HTTP status.
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self::network(url, NetworkFailure::Status(status))
    }

    /// Create a parse error.
    pub fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a parse error for one line of a data file.
    pub fn parse_line(url: &str, line: usize, message: impl Into<String>) -> Self {
        Self::parse(format!("{} line {}", url, line), message)
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl From<wxcache_types::ParseError> for Error {
    fn from(err: wxcache_types::ParseError) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

/// Result type alias using wxcache-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::status("http://example.com/a", 404);
        assert_eq!(
            err.to_string(),
            "Network error for http://example.com/a: server returned HTTP 404"
        );

        let err = Error::parse_line("http://example.com/samples.dat", 12, "expected 14 fields");
        assert_eq!(
            err.to_string(),
            "Parse error at http://example.com/samples.dat line 12: expected 14 fields"
        );

        let err = Error::Busy("sb".to_string());
        assert!(err.to_string().contains("'sb'"));

        assert_eq!(Error::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: Error = wxcache_store::Error::StationNotFound("x".to_string()).into();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(err.to_string(), "Station not found: x");
    }

    #[test]
    fn test_types_parse_error_conversion() {
        let err: Error = wxcache_types::ParseError::InvalidDataSet("bad".to_string()).into();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
