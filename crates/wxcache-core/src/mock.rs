//! Mock remote server for testing.
//!
//! [`MockRemote`] implements [`RemoteSource`] over an in-memory map of
//! documents, so the sync engine can be exercised without a web server.
//!
//! # Features
//!
//! - **Failure injection**: make a URL answer with an HTTP error status
//! - **Latency simulation**: delay every request
//! - **Pausing**: hold requests until [`MockRemote::resume`] is called
//! - **Request counters**: count `HEAD` and `GET` requests per mock

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::remote::{RemoteBody, RemoteHead, RemoteSource};

#[derive(Debug, Clone)]
struct MockDocument {
    text: String,
    last_modified: Option<OffsetDateTime>,
}

/// An in-memory remote server.
///
/// # Example
///
/// ```
/// use wxcache_core::{MockRemote, RemoteSource};
///
/// #[tokio::main]
/// async fn main() {
///     let remote = MockRemote::new().with_document("http://wx.test/a.json", "{}");
///     let body = remote.get("http://wx.test/a.json").await.unwrap();
///     assert_eq!(body.text, "{}");
///     assert!(remote.get("http://wx.test/missing").await.is_err());
/// }
/// ```
pub struct MockRemote {
    documents: RwLock<HashMap<String, MockDocument>>,
    failures: RwLock<HashMap<String, u16>>,
    requests: RwLock<Vec<String>>,
    head_count: AtomicU32,
    get_count: AtomicU32,
    /// Simulated latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    /// `true` while requests may proceed.
    gate: watch::Sender<bool>,
}

impl std::fmt::Debug for MockRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRemote")
            .field("head_count", &self.head_count())
            .field("get_count", &self.get_count())
            .field("paused", &!*self.gate.borrow())
            .finish()
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Create an empty mock. Every URL answers 404 until documents are added.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            documents: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            requests: RwLock::new(Vec::new()),
            head_count: AtomicU32::new(0),
            get_count: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
            gate,
        }
    }

    /// Add a document served with a `Last-Modified` header.
    pub fn with_file(
        self,
        url: &str,
        text: impl Into<String>,
        last_modified: OffsetDateTime,
    ) -> Self {
        self.set_file(url, text, last_modified);
        self
    }

    /// Add a document served without `Last-Modified`.
    pub fn with_document(self, url: &str, text: impl Into<String>) -> Self {
        self.insert(url, text.into(), None);
        self
    }

    /// Make `url` answer with `status`.
    pub fn with_failure(self, url: &str, status: u16) -> Self {
        self.set_failure(url, status);
        self
    }

    /// Add or replace a document served with a `Last-Modified` header.
    pub fn set_file(&self, url: &str, text: impl Into<String>, last_modified: OffsetDateTime) {
        self.insert(url, text.into(), Some(last_modified));
    }

    /// Add or replace a document served without `Last-Modified`.
    pub fn set_document(&self, url: &str, text: impl Into<String>) {
        self.insert(url, text.into(), None);
    }

    /// Remove a document; it answers 404 afterwards.
    pub fn remove(&self, url: &str) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// Make `url` answer with `status` until cleared.
    pub fn set_failure(&self, url: &str, status: u16) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), status);
    }

    /// Stop failing `url`.
    pub fn clear_failure(&self, url: &str) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    /// Set simulated latency.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Hold every request until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Release held requests.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Number of `HEAD` requests received.
    pub fn head_count(&self) -> u32 {
        self.head_count.load(Ordering::Relaxed)
    }

    /// Number of `GET` requests received.
    pub fn get_count(&self) -> u32 {
        self.get_count.load(Ordering::Relaxed)
    }

    /// Requests received so far, as `"METHOD url"`.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `GET` requests received for `url`.
    pub fn get_count_for(&self, url: &str) -> usize {
        let needle = format!("GET {}", url);
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| **r == needle)
            .count()
    }

    /// Reset counters and the request log.
    pub fn reset_counts(&self) {
        self.head_count.store(0, Ordering::Relaxed);
        self.get_count.store(0, Ordering::Relaxed);
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn insert(&self, url: &str, text: String, last_modified: Option<OffsetDateTime>) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), MockDocument {
                text,
                last_modified,
            });
    }

    async fn respond(&self, method: &str, url: &str) -> Result<MockDocument> {
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{} {}", method, url));

        let mut gate = self.gate.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = gate.wait_for(|open| *open).await;

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failure = self
            .failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied();
        if let Some(status) = failure {
            return Err(Error::status(url, status));
        }

        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| Error::status(url, 404))
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn head(&self, url: &str) -> Result<RemoteHead> {
        self.head_count.fetch_add(1, Ordering::Relaxed);
        let doc = self.respond("HEAD", url).await?;
        Ok(RemoteHead {
            last_modified: doc.last_modified,
            size: Some(doc.text.len() as u64),
        })
    }

    async fn get(&self, url: &str) -> Result<RemoteBody> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let doc = self.respond("GET", url).await?;
        Ok(RemoteBody {
            head: RemoteHead {
                last_modified: doc.last_modified,
                size: Some(doc.text.len() as u64),
            },
            text: doc.text,
        })
    }
}
