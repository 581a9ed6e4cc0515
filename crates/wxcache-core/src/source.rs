//! The data source facade.
//!
//! [`DataSource`] accepts fetch requests, runs each on the tokio runtime
//! through a [`TaskQueue`], and hands the outcome back through a
//! [`FetchHandle`]. At most one fetch runs per station at a time; fetches
//! for different stations run concurrently.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wxcache_store::Store;
use wxcache_types::{DataSet, RainTotals, SampleSet, StationInfo};

use crate::config::{Config, SyncConfig};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, FetchEvent};
use crate::json::RainSummaryDoc;
use crate::remote::{HttpRemote, RemoteSource};
use crate::tasks::{FetchContext, SessionState, TaskQueue, fetch_station_info};
use crate::urls::{StationUrls, normalize_base_url};

/// A request for samples from one station.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Station code, e.g. `"sb"`.
    pub station: String,
    /// Columns, time range and aggregation.
    pub data_set: DataSet,
    /// Download every month in range, ignoring completeness and recheck
    /// memos.
    pub force_download: bool,
}

impl FetchRequest {
    pub fn new(station: impl Into<String>, data_set: DataSet) -> Self {
        Self {
            station: station.into(),
            data_set,
            force_download: false,
        }
    }

    /// Download every month in range again.
    #[must_use]
    pub fn force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }
}

/// Handle to a running fetch.
#[derive(Debug)]
pub struct FetchHandle {
    station: String,
    request_id: u32,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<SampleSet>>,
}

impl FetchHandle {
    /// Station code of the fetch.
    pub fn station(&self) -> &str {
        &self.station
    }

    /// Identifier carried in this fetch's [`FetchEvent::Started`].
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Cancel the fetch. Steps already finished keep their cache writes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> Result<SampleSet> {
        // A dropped sender means the task was aborted with the runtime.
        self.result.await.unwrap_or(Err(Error::Cancelled))
    }
}

struct Inner {
    remote: Arc<dyn RemoteSource>,
    store: Arc<Mutex<Store>>,
    base_url: String,
    sync: SyncConfig,
    events: EventDispatcher,
    session: Arc<SessionState>,
    busy: StdMutex<HashSet<String>>,
    next_request_id: AtomicU32,
}

impl Inner {
    fn claim(&self, code: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.to_string())
    }

    fn release(&self, code: &str) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(code);
    }
}

/// Releases a station's busy flag when the fetch task ends, however it ends.
struct BusyGuard {
    inner: Arc<Inner>,
    code: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.release(&self.code);
    }
}

/// Entry point for fetching weather samples through the local cache.
///
/// Cloning is cheap; clones share the cache, the session state and the
/// event channel.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}

impl DataSource {
    /// Create a data source over an explicit remote and store.
    pub fn new(remote: Arc<dyn RemoteSource>, store: Store, config: &Config) -> Result<Self> {
        let base_url = normalize_base_url(&config.remote.base_url)?;
        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                store: Arc::new(Mutex::new(store)),
                base_url,
                sync: config.sync.clone(),
                events: EventDispatcher::new(config.sync.event_capacity),
                session: Arc::new(SessionState::default()),
                busy: StdMutex::new(HashSet::new()),
                next_request_id: AtomicU32::new(1),
            }),
        })
    }

    /// Create an HTTP-backed data source with the configured database.
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        let remote = HttpRemote::new(&config.remote)?;
        let store = Store::open(&config.storage.path)?;
        Self::new(Arc::new(remote), store, config)
    }

    /// Shared handle to the cache.
    pub fn store(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.inner.store)
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Whether a fetch is in flight for `station`.
    pub fn is_busy(&self, station: &str) -> bool {
        let code = station.trim().to_lowercase();
        self.inner
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&code)
    }

    fn urls(&self, station: &str) -> Result<StationUrls> {
        StationUrls::new(&self.inner.base_url, station)
    }

    /// Start a fetch.
    ///
    /// Fails with [`Error::Busy`] if the station already has a fetch in
    /// flight, and with [`Error::InvalidRequest`] if the request can never
    /// succeed. Must be called within a tokio runtime.
    pub fn submit(&self, request: FetchRequest) -> Result<FetchHandle> {
        request.data_set.validate()?;
        let urls = self.urls(&request.station)?;
        let code = urls.code().to_string();

        if !self.inner.claim(&code) {
            debug!("Rejecting fetch for busy station {}", code);
            return Err(Error::Busy(code));
        }
        let guard = BusyGuard {
            inner: Arc::clone(&self.inner),
            code: code.clone(),
        };

        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        self.inner.events.send(FetchEvent::Started {
            station: code.clone(),
            request_id,
        });
        info!(
            "Fetch {} for {} from {} to {}",
            request_id, code, request.data_set.start, request.data_set.end
        );

        let mut ctx = FetchContext {
            remote: Arc::clone(&self.inner.remote),
            store: Arc::clone(&self.inner.store),
            session: Arc::clone(&self.inner.session),
            events: self.inner.events.clone(),
            sync: self.inner.sync.clone(),
            urls,
            data_set: request.data_set,
            force_download: request.force_download,
            station: None,
            range_empty: false,
            result: None,
        };
        let mut queue = TaskQueue::for_fetch(cancel.clone());
        let events = self.inner.events.clone();

        tokio::spawn(async move {
            let outcome = match queue.run(&mut ctx).await {
                Ok(()) => Ok(ctx
                    .result
                    .take()
                    .unwrap_or_else(|| SampleSet::new(ctx.data_set.columns))),
                Err(e) => Err(e),
            };

            let station = ctx.urls.code().to_string();
            match &outcome {
                Ok(samples) => {
                    info!("Fetch {} for {} returned {} rows", request_id, station, samples.len());
                    events.send(FetchEvent::Completed {
                        station,
                        rows: samples.len(),
                    });
                }
                Err(Error::Cancelled) => {
                    info!("Fetch {} for {} cancelled", request_id, station);
                    events.send(FetchEvent::Cancelled { station });
                }
                Err(e) => {
                    warn!("Fetch {} for {} failed: {}", request_id, station, e);
                    events.send(FetchEvent::Failed {
                        station,
                        error: e.to_string(),
                    });
                }
            }

            // Free the station before the caller sees the outcome.
            drop(guard);
            let _ = tx.send(outcome);
        });

        Ok(FetchHandle {
            station: code,
            request_id,
            cancel,
            result: rx,
        })
    }

    /// Fetch and wait for the result.
    pub async fn fetch(&self, request: FetchRequest) -> Result<SampleSet> {
        self.submit(request)?.wait().await
    }

    /// Station metadata, from this session or the server.
    pub async fn station_info(&self, station: &str) -> Result<StationInfo> {
        let urls = self.urls(station)?;
        if let Some(info) = self.inner.session.station(&urls.station()) {
            return Ok(info);
        }

        let info = fetch_station_info(self.inner.remote.as_ref(), &urls).await?;
        self.inner.store.lock().await.update_station_info(&info)?;
        self.inner.session.remember_station(info.clone());
        Ok(info)
    }

    /// Today's, this month's and this year's rainfall from the server.
    pub async fn rain_totals(&self, station: &str) -> Result<RainTotals> {
        let urls = self.urls(station)?;
        let url = urls.rain_summary();
        let body = self.inner.remote.get(&url).await?;
        RainSummaryDoc::parse(&body.text, &url)
    }

    /// Delete every cached sample and file record.
    ///
    /// Station metadata survives. Months checked this session will be
    /// checked again on the next fetch.
    pub async fn clear_cache(&self) -> Result<()> {
        self.inner.store.lock().await.clear_samples()?;
        self.inner.session.forget_checked();
        info!("Sample cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::mock::MockRemote;
    use time::macros::{date, datetime};
    use wxcache_types::SampleColumns;

    fn source(remote: MockRemote) -> DataSource {
        let config = Config {
            remote: RemoteConfig {
                base_url: "http://wx.test".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        DataSource::new(Arc::new(remote), Store::open_in_memory().unwrap(), &config).unwrap()
    }

    fn data_set() -> DataSet {
        DataSet::new(
            SampleColumns::all(),
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-01-02 0:00 UTC),
        )
    }

    #[test]
    fn test_fetch_request_builder() {
        let request = FetchRequest::new("sb", data_set()).force_download(true);
        assert_eq!(request.station, "sb");
        assert!(request.force_download);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let ds = source(MockRemote::new());
        let backwards = DataSet::new(
            SampleColumns::all(),
            datetime!(2024-01-02 0:00 UTC),
            datetime!(2024-01-01 0:00 UTC),
        );

        let err = ds.submit(FetchRequest::new("sb", backwards)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = ds.submit(FetchRequest::new("a/b", data_set())).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(!ds.is_busy("sb"));
    }

    #[tokio::test]
    async fn test_busy_flag_released_after_failure() {
        let ds = source(MockRemote::new());

        let handle = ds.submit(FetchRequest::new("SB", data_set())).unwrap();
        assert_eq!(handle.station(), "sb");
        assert!(ds.is_busy("sb"));

        // Nothing is served, so the station lookup fails.
        assert!(matches!(handle.wait().await, Err(Error::Network { .. })));
        assert!(!ds.is_busy("sb"));
    }

    #[tokio::test]
    async fn test_rain_totals() {
        let remote = MockRemote::new().with_document(
            "http://wx.test/data/sb/rain_summary.json",
            r#"{"today": {"start": "2024-03-05T00:00:00", "total": 1.2},
                "this_month": {"total": 10.5}, "this_year": {"total": 120.0}}"#,
        );
        let ds = source(remote);

        let totals = ds.rain_totals("sb").await.unwrap();
        assert_eq!(totals.today, 1.2);
        assert_eq!(totals.this_month, 10.5);
        assert_eq!(totals.this_year, 120.0);
        assert_eq!(totals.date, date!(2024-03-05));
    }
}
