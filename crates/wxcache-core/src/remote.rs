//! HTTP access to the remote data server.
//!
//! [`RemoteSource`] abstracts the two requests the sync engine makes so
//! that tests can substitute [`crate::MockRemote`]. [`HttpRemote`] is the
//! real implementation on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use time::format_description::well_known::Rfc2822;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{Error, NetworkFailure, Result};

/// Metadata returned by a `HEAD` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteHead {
    /// `Last-Modified`, when the server sent a parseable one.
    pub last_modified: Option<OffsetDateTime>,
    /// `Content-Length`, when present.
    pub size: Option<u64>,
}

/// A downloaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBody {
    pub head: RemoteHead,
    pub text: String,
}

impl RemoteBody {
    /// Body size, falling back to the downloaded length.
    pub fn size(&self) -> u64 {
        self.head.size.unwrap_or(self.text.len() as u64)
    }
}

/// Source of remote documents.
///
/// Any non-success status must be reported as [`Error::Network`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch headers only.
    async fn head(&self, url: &str) -> Result<RemoteHead>;

    /// Fetch a document as text.
    async fn get(&self, url: &str) -> Result<RemoteBody>;
}

/// [`RemoteSource`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
}

impl HttpRemote {
    /// Create a client from remote settings.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                Error::network(&config.base_url, NetworkFailure::Transport(e.to_string()))
            })?;

        Ok(Self { client })
    }

    /// Create with a custom reqwest Client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::network(url, NetworkFailure::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status(url, status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn head(&self, url: &str) -> Result<RemoteHead> {
        debug!("HEAD {}", url);
        let response = self.send(self.client.head(url), url).await?;
        Ok(head_from_headers(response.headers()))
    }

    async fn get(&self, url: &str) -> Result<RemoteBody> {
        debug!("GET {}", url);
        let response = self.send(self.client.get(url), url).await?;
        let head = head_from_headers(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| Error::network(url, NetworkFailure::Transport(e.to_string())))?;
        Ok(RemoteBody { head, text })
    }
}

fn head_from_headers(headers: &HeaderMap) -> RemoteHead {
    RemoteHead {
        last_modified: headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date),
        size: headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok()),
    }
}

/// Parse an HTTP date such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    let value = value.trim();
    PrimitiveDateTime::parse(value, format)
        .map(PrimitiveDateTime::assume_utc)
        .or_else(|_| OffsetDateTime::parse(value, &Rfc2822))
        .ok()
}
