//! Synchronisation of one monthly data file with the cache.
//!
//! [`RemoteFileSync`] walks a small state machine:
//!
//! ```text
//! CheckingCache -> HeadRequest -> UpToDate
//!                              -> NeedsDownload -> GetRequest -> Parsing
//!                                 -> Reconciling -> Caching -> Done
//! ```
//!
//! Only `Last-Modified` decides whether a cached file is stale. A downloaded
//! file is reconciled with the rows already cached for it: when the number of
//! rows inside the cached window is unchanged, only the new rows are
//! inserted; otherwise the cached rows are replaced. A file covering its
//! whole month always replaces the cached rows.

use std::fmt;
use std::sync::Arc;

use time::{Month, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, error};

use wxcache_store::{CacheWrite, RemoteFileMeta, Store, StoredRemoteFile};
use wxcache_types::{Sample, SampleColumns};

use crate::datafile::{Completeness, detect_completeness, parse_data_file};
use crate::error::{Error, Result};
use crate::events::SkipReason;
use crate::remote::{RemoteHead, RemoteSource};

/// States of a file sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    CheckingCache,
    HeadRequest,
    UpToDate,
    NeedsDownload,
    GetRequest,
    Parsing,
    Reconciling,
    Caching,
    Done,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckingCache => "checking cache",
            Self::HeadRequest => "head request",
            Self::UpToDate => "up to date",
            Self::NeedsDownload => "needs download",
            Self::GetRequest => "get request",
            Self::Parsing => "parsing",
            Self::Reconciling => "reconciling",
            Self::Caching => "caching",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Options for a file sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Download even when the cache says the file is complete or unchanged.
    pub force: bool,
    /// Compare overlapping values as well as row counts.
    pub verify_overlap_values: bool,
}

/// What a sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No download was needed.
    Skipped(SkipReason),
    /// The file was downloaded and written.
    Cached {
        write: CacheWrite,
        /// Previously cached rows were discarded.
        replaced: bool,
    },
}

/// Result of [`RemoteFileSync::run`].
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub url: String,
    pub outcome: SyncOutcome,
    /// Completeness of the downloaded file, when one was downloaded.
    pub completeness: Option<Completeness>,
    /// States visited, in order.
    pub states: Vec<SyncState>,
}

impl SyncReport {
    /// Rows inserted into the cache.
    pub fn inserted(&self) -> usize {
        match &self.outcome {
            SyncOutcome::Cached { write, .. } => write.inserted,
            SyncOutcome::Skipped(_) => 0,
        }
    }
}

/// One month file of one station.
#[derive(Debug, Clone)]
pub struct FileTarget {
    pub station_url: String,
    pub url: String,
    pub year: i32,
    pub month: Month,
    pub has_solar: bool,
    /// Station sample interval in seconds.
    pub interval: u32,
}

/// Reconciliation decision for a downloaded file.
#[derive(Debug)]
enum Plan {
    /// Insert only these rows, keep what is cached.
    Append(Vec<Sample>),
    /// Replace the cached rows with these.
    Replace(Vec<Sample>),
}

/// Sync state machine for one file.
pub struct RemoteFileSync<'a> {
    remote: &'a dyn RemoteSource,
    store: &'a Arc<Mutex<Store>>,
    target: &'a FileTarget,
    options: SyncOptions,
    states: Vec<SyncState>,
}

impl<'a> RemoteFileSync<'a> {
    pub fn new(
        remote: &'a dyn RemoteSource,
        store: &'a Arc<Mutex<Store>>,
        target: &'a FileTarget,
        options: SyncOptions,
    ) -> Self {
        Self {
            remote,
            store,
            target,
            options,
            states: Vec::new(),
        }
    }

    fn enter(&mut self, state: SyncState) {
        debug!("{}: {}", self.target.url, state);
        self.states.push(state);
    }

    fn finish(
        mut self,
        outcome: SyncOutcome,
        completeness: Option<Completeness>,
    ) -> SyncReport {
        self.enter(SyncState::Done);
        SyncReport {
            url: self.target.url.clone(),
            outcome,
            completeness,
            states: self.states,
        }
    }

    /// Run the state machine to completion.
    pub async fn run(mut self) -> Result<SyncReport> {
        let url = self.target.url.clone();

        self.enter(SyncState::CheckingCache);
        let cached = self.store_op(|store| store.remote_file_info(&url)).await?;

        if let Some(cached) = &cached
            && cached.meta.is_complete
            && !self.options.force
        {
            debug!("{} is complete in the cache", url);
            return Ok(self.finish(SyncOutcome::Skipped(SkipReason::Complete), None));
        }

        let mut head = RemoteHead::default();
        if let Some(cached) = &cached {
            self.enter(SyncState::HeadRequest);
            head = self.remote.head(&url).await?;
            if !self.options.force && head.last_modified == Some(cached.meta.last_modified) {
                self.enter(SyncState::UpToDate);
                return Ok(self.finish(SyncOutcome::Skipped(SkipReason::NotModified), None));
            }
        }
        self.enter(SyncState::NeedsDownload);

        self.enter(SyncState::GetRequest);
        let body = self.remote.get(&url).await?;

        self.enter(SyncState::Parsing);
        let mut samples = parse_data_file(&url, &body.text, self.target.has_solar)?;
        samples.sort_by_key(|s| s.timestamp);
        samples.dedup_by_key(|s| s.timestamp);
        let completeness = detect_completeness(
            &samples,
            self.target.year,
            self.target.month,
            self.target.interval,
        );

        let mut meta = RemoteFileMeta::new(
            url.clone(),
            body.head
                .last_modified
                .or(head.last_modified)
                .unwrap_or_else(OffsetDateTime::now_utc),
            body.size(),
        );
        meta.is_complete = completeness.is_complete;
        meta.start_contiguous_to = completeness.start_contiguous_to;
        meta.end_contiguous_from = completeness.end_contiguous_from;

        self.enter(SyncState::Reconciling);
        let plan = self
            .reconcile(cached.as_ref(), samples, completeness.is_complete)
            .await?;

        self.enter(SyncState::Caching);
        let (rows, replace) = match plan {
            Plan::Append(rows) => (rows, false),
            Plan::Replace(rows) => (rows, true),
        };
        let station_url = self.target.station_url.clone();
        let write = self
            .store_op(|store| store.cache_data_file(&station_url, &meta, &rows, replace))
            .await?;

        debug!("{}: {} rows cached, replace={}", url, write.inserted, replace);

        Ok(self.finish(
            SyncOutcome::Cached {
                write,
                replaced: replace,
            },
            Some(completeness),
        ))
    }

    async fn reconcile(
        &self,
        cached: Option<&StoredRemoteFile>,
        samples: Vec<Sample>,
        complete: bool,
    ) -> Result<Plan> {
        let Some(cached) = cached else {
            return Ok(Plan::Append(samples));
        };
        let file_id = cached.id;
        let Some(stats) = self.store_op(|store| store.file_sample_stats(file_id)).await? else {
            return Ok(Plan::Append(samples));
        };

        // A gap-free month gains no rows, so a new download can only carry
        // corrected values.
        if complete {
            debug!("{}: file is complete; replacing cached rows", self.target.url);
            return Ok(Plan::Replace(samples));
        }

        let (overlap, outside): (Vec<Sample>, Vec<Sample>) =
            samples.into_iter().partition(|s| stats.covers(s.timestamp));

        if overlap.len() as u64 != stats.count {
            debug!(
                "{}: {} cached rows in window, {} downloaded; replacing",
                self.target.url,
                stats.count,
                overlap.len()
            );
            return Ok(Plan::Replace(merge(overlap, outside)));
        }

        if self.options.verify_overlap_values {
            let existing = self
                .store_op(|store| store.file_samples(file_id, stats.first, stats.last))
                .await?;
            let unchanged = existing.len() == overlap.len()
                && existing.iter().zip(&overlap).all(|(old, new)| {
                    old.timestamp == new.timestamp && old.same_values(new, SampleColumns::all())
                });
            if !unchanged {
                debug!("{}: cached values differ; replacing", self.target.url);
                return Ok(Plan::Replace(merge(overlap, outside)));
            }
        } else {
            debug!(
                "{}: {} overlapping rows matched by count only",
                self.target.url, stats.count
            );
        }

        Ok(Plan::Append(outside))
    }

    /// Run a store operation under the lock, logging failures with context.
    async fn store_op<T>(
        &self,
        op: impl FnOnce(&mut Store) -> wxcache_store::Result<T>,
    ) -> Result<T> {
        let mut store = self.store.lock().await;
        op(&mut *store).map_err(|e| {
            error!(
                "Storage failure for station {} file {}: {}",
                self.target.station_url, self.target.url, e
            );
            Error::from(e)
        })
    }
}

fn merge(overlap: Vec<Sample>, outside: Vec<Sample>) -> Vec<Sample> {
    let mut rows = overlap;
    rows.extend(outside);
    rows.sort_by_key(|s| s.timestamp);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;
    use time::macros::datetime;
    use wxcache_types::SampleColumn;

    const STATION: &str = "http://wx.test/data/sb/";
    const FILE: &str = "http://wx.test/data/sb/2024/1/samples.dat";

    fn line(t: OffsetDateTime, temperature: f64) -> String {
        let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        format!(
            "{} {} 5.0 10.0 10.0 80 1013.2 20.0 45 0.0 1.0 2.0 180\n",
            t.format(format).unwrap(),
            temperature
        )
    }

    fn file(count: i64, temperature: f64) -> String {
        let start = datetime!(2024-01-01 0:00 UTC);
        (0..count)
            .map(|i| line(start + time::Duration::minutes(5 * i), temperature))
            .collect()
    }

    fn target() -> FileTarget {
        FileTarget {
            station_url: STATION.to_string(),
            url: FILE.to_string(),
            year: 2024,
            month: Month::January,
            has_solar: false,
            interval: 300,
        }
    }

    fn store() -> Arc<Mutex<Store>> {
        Arc::new(Mutex::new(Store::open_in_memory().unwrap()))
    }

    async fn sync(
        remote: &MockRemote,
        store: &Arc<Mutex<Store>>,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let target = target();
        RemoteFileSync::new(remote, store, &target, options).run().await
    }

    #[tokio::test]
    async fn test_first_download_inserts_everything() {
        let remote = MockRemote::new().with_file(FILE, file(10, 1.0), datetime!(2024-01-02 0:00 UTC));
        let store = store();

        let report = sync(&remote, &store, SyncOptions::default()).await.unwrap();
        assert_eq!(report.inserted(), 10);
        assert_eq!(remote.head_count(), 0);
        assert_eq!(
            report.states,
            vec![
                SyncState::CheckingCache,
                SyncState::NeedsDownload,
                SyncState::GetRequest,
                SyncState::Parsing,
                SyncState::Reconciling,
                SyncState::Caching,
                SyncState::Done,
            ]
        );
        assert_eq!(report.completeness.map(|c| c.is_complete), Some(false));
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_downloaded() {
        let modified = datetime!(2024-01-02 0:00 UTC);
        let remote = MockRemote::new().with_file(FILE, file(10, 1.0), modified);
        let store = store();

        sync(&remote, &store, SyncOptions::default()).await.unwrap();
        let report = sync(&remote, &store, SyncOptions::default()).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Skipped(SkipReason::NotModified));
        assert!(report.states.contains(&SyncState::UpToDate));
        assert_eq!(remote.get_count(), 1);
        assert_eq!(remote.head_count(), 1);
    }

    #[tokio::test]
    async fn test_grown_file_appends_new_rows() {
        let remote = MockRemote::new().with_file(FILE, file(10, 1.0), datetime!(2024-01-02 0:00 UTC));
        let store = store();
        sync(&remote, &store, SyncOptions::default()).await.unwrap();

        remote.set_file(FILE, file(15, 1.0), datetime!(2024-01-03 0:00 UTC));
        let report = sync(&remote, &store, SyncOptions::default()).await.unwrap();

        let SyncOutcome::Cached { write, replaced } = report.outcome else {
            panic!("expected a cache write");
        };
        assert!(!replaced);
        assert_eq!(write.inserted, 5);
        assert_eq!(write.truncated, 0);
    }

    #[tokio::test]
    async fn test_changed_count_replaces_rows() {
        let remote = MockRemote::new().with_file(FILE, file(10, 1.0), datetime!(2024-01-02 0:00 UTC));
        let store = store();
        sync(&remote, &store, SyncOptions::default()).await.unwrap();

        // Drop the third row; the window count no longer matches.
        let text: String = file(12, 2.0)
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .map(|(_, l)| format!("{}\n", l))
            .collect();
        remote.set_file(FILE, text, datetime!(2024-01-03 0:00 UTC));
        let report = sync(&remote, &store, SyncOptions::default()).await.unwrap();

        let SyncOutcome::Cached { write, replaced } = report.outcome else {
            panic!("expected a cache write");
        };
        assert!(replaced);
        assert_eq!(write.truncated, 10);
        assert_eq!(write.inserted, 11);

        let guard = store.lock().await;
        let file_id = guard.remote_file_info(FILE).unwrap().unwrap().id;
        let rows = guard.file_samples(file_id, i64::MIN, i64::MAX).unwrap();
        assert_eq!(rows.len(), 11);
        assert!(rows.iter().all(|r| r.get(SampleColumn::Temperature) == Some(2.0)));
    }

    #[tokio::test]
    async fn test_value_verification_detects_edits() {
        let remote = MockRemote::new().with_file(FILE, file(10, 1.0), datetime!(2024-01-02 0:00 UTC));
        let store = store();
        sync(&remote, &store, SyncOptions::default()).await.unwrap();

        remote.set_file(FILE, file(10, 3.0), datetime!(2024-01-03 0:00 UTC));

        let counts_only = sync(&remote, &store, SyncOptions::default()).await.unwrap();
        assert!(matches!(
            counts_only.outcome,
            SyncOutcome::Cached { replaced: false, .. }
        ));
        assert_eq!(counts_only.inserted(), 0);

        let options = SyncOptions {
            force: true,
            verify_overlap_values: true,
        };
        let verified = sync(&remote, &store, options).await.unwrap();
        assert!(matches!(
            verified.outcome,
            SyncOutcome::Cached { replaced: true, .. }
        ));
        assert_eq!(verified.inserted(), 10);
    }

    #[tokio::test]
    async fn test_complete_file_skips_network() {
        let remote = MockRemote::new().with_file(
            FILE,
            file(31 * 288, 1.0),
            datetime!(2024-02-01 0:00 UTC),
        );
        let store = store();

        let report = sync(&remote, &store, SyncOptions::default()).await.unwrap();
        assert_eq!(report.completeness.map(|c| c.is_complete), Some(true));

        let again = sync(&remote, &store, SyncOptions::default()).await.unwrap();
        assert_eq!(again.outcome, SyncOutcome::Skipped(SkipReason::Complete));
        assert_eq!(remote.head_count(), 0);
        assert_eq!(remote.get_count(), 1);
    }

    #[tokio::test]
    async fn test_forced_complete_file_replaces_corrected_values() {
        let remote = MockRemote::new().with_file(
            FILE,
            file(31 * 288, 1.0),
            datetime!(2024-02-01 0:00 UTC),
        );
        let store = store();
        sync(&remote, &store, SyncOptions::default()).await.unwrap();

        // Same rows, corrected values.
        remote.set_file(FILE, file(31 * 288, 4.0), datetime!(2024-02-05 0:00 UTC));
        let options = SyncOptions {
            force: true,
            verify_overlap_values: false,
        };
        let report = sync(&remote, &store, options).await.unwrap();

        let SyncOutcome::Cached { write, replaced } = report.outcome else {
            panic!("expected a cache write");
        };
        assert!(replaced);
        assert_eq!(write.truncated, 31 * 288);
        assert_eq!(write.inserted, 31 * 288);

        let guard = store.lock().await;
        let file_id = guard.remote_file_info(FILE).unwrap().unwrap().id;
        let rows = guard.file_samples(file_id, i64::MIN, i64::MAX).unwrap();
        assert_eq!(rows.len(), 31 * 288);
        assert!(rows.iter().all(|r| r.get(SampleColumn::Temperature) == Some(4.0)));
    }

    #[tokio::test]
    async fn test_network_error_leaves_cache_untouched() {
        let remote = MockRemote::new().with_failure(FILE, 500);
        let store = store();

        let err = sync(&remote, &store, SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
        assert!(store.lock().await.remote_file_info(FILE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parse_error_writes_nothing() {
        let remote = MockRemote::new().with_file(
            FILE,
            "2024-01-01 00:00:00 not numbers\n",
            datetime!(2024-01-02 0:00 UTC),
        );
        let store = store();

        let err = sync(&remote, &store, SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(store.lock().await.remote_file_info(FILE).unwrap().is_none());
    }
}
