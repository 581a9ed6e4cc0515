//! Step queue behind each fetch operation.
//!
//! A fetch is a FIFO of [`Step`]s run one at a time by [`TaskQueue::run`].
//! A finished step may queue follow-up steps; a failed step ends the fetch
//! and the rest of the queue is discarded. The initial queue is
//!
//! ```text
//! StationInfoStep, RangeRequestStep
//! ```
//!
//! and the range step queues one [`DataFileStep`] per month that needs a
//! download, followed by a [`SelectSamplesStep`] that produces the result.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use time::{Month, OffsetDateTime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wxcache_store::{SampleQuery, Store};
use wxcache_types::{DataSet, SampleSet, StationInfo};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, FetchEvent, SkipReason};
use crate::gaps::{gap_interval, synthesize};
use crate::json::{SampleRangeDoc, SysConfig};
use crate::remote::RemoteSource;
use crate::sync::{FileTarget, RemoteFileSync, SyncOptions, SyncOutcome};
use crate::urls::{StationUrls, months_between};

/// State kept for the lifetime of a [`crate::DataSource`].
#[derive(Debug, Default)]
pub struct SessionState {
    /// Station metadata fetched this session, by station URL.
    stations: StdMutex<HashMap<String, StationInfo>>,
    /// When each data file URL was last checked on the server.
    checked: StdMutex<HashMap<String, OffsetDateTime>>,
}

impl SessionState {
    pub fn station(&self, station_url: &str) -> Option<StationInfo> {
        self.stations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(station_url)
            .cloned()
    }

    pub fn remember_station(&self, info: StationInfo) {
        self.stations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.url.clone(), info);
    }

    pub fn mark_checked(&self, url: &str, at: OffsetDateTime) {
        self.checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), at);
    }

    /// Whether `url` was checked less than `interval_secs` before `now`.
    pub fn recently_checked(&self, url: &str, now: OffsetDateTime, interval_secs: u64) -> bool {
        let checked = self.checked.lock().unwrap_or_else(PoisonError::into_inner);
        checked
            .get(url)
            .is_some_and(|at| (now - *at).whole_seconds() < interval_secs as i64)
    }

    pub fn forget_checked(&self) {
        self.checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Everything a step can see and change.
pub struct FetchContext {
    pub remote: Arc<dyn RemoteSource>,
    pub store: Arc<Mutex<Store>>,
    pub session: Arc<SessionState>,
    pub events: EventDispatcher,
    pub sync: SyncConfig,
    pub urls: StationUrls,
    pub data_set: DataSet,
    /// Download every month even if cached or recently checked.
    pub force_download: bool,
    /// Station metadata, once known.
    pub station: Option<StationInfo>,
    /// The server holds no data in the requested range.
    pub range_empty: bool,
    /// The operation result, set by [`SelectSamplesStep`].
    pub result: Option<SampleSet>,
}

impl FetchContext {
    /// Station metadata, or defaults when it has not been loaded.
    pub fn station_info(&self) -> StationInfo {
        self.station
            .clone()
            .unwrap_or_else(|| StationInfo::new(self.urls.station(), self.urls.code()))
    }

    fn emit(&self, event: FetchEvent) {
        self.events.send(event);
    }

    fn code(&self) -> String {
        self.urls.code().to_string()
    }

    async fn store_op<T>(
        &self,
        op: impl FnOnce(&mut Store) -> wxcache_store::Result<T> + Send,
    ) -> Result<T> {
        let mut store = self.store.lock().await;
        op(&mut *store).map_err(|e| {
            error!("Storage failure for station {}: {}", self.urls.station(), e);
            Error::from(e)
        })
    }
}

/// A unit of work in a fetch.
#[async_trait]
pub trait Step: Send {
    /// Name used in logs and events.
    fn name(&self) -> String;

    /// Run the step, returning the steps to queue after it.
    async fn run(self: Box<Self>, ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>>;
}

/// FIFO of steps with a single scheduler loop.
pub struct TaskQueue {
    queue: VecDeque<Box<dyn Step>>,
    cancel: CancellationToken,
}

impl TaskQueue {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            queue: VecDeque::new(),
            cancel,
        }
    }

    /// Queue the steps every fetch starts with.
    pub fn for_fetch(cancel: CancellationToken) -> Self {
        let mut queue = Self::new(cancel);
        queue.push(Box::new(StationInfoStep));
        queue.push(Box::new(RangeRequestStep));
        queue
    }

    pub fn push(&mut self, step: Box<dyn Step>) {
        self.queue.push_back(step);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run steps until the queue is empty, a step fails, or the operation
    /// is cancelled.
    pub async fn run(&mut self, ctx: &mut FetchContext) -> Result<()> {
        while let Some(step) = self.queue.pop_front() {
            if self.cancel.is_cancelled() {
                self.discard(ctx, "cancelled");
                return Err(Error::Cancelled);
            }

            let name = step.name();
            debug!("{}: step {} started", ctx.urls.code(), name);
            ctx.emit(FetchEvent::StepStarted {
                station: ctx.code(),
                step: name.clone(),
            });

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::Cancelled),
                outcome = step.run(ctx) => outcome,
            };

            match outcome {
                Ok(follow_ups) => {
                    ctx.emit(FetchEvent::StepFinished {
                        station: ctx.code(),
                        step: name,
                        follow_ups: follow_ups.len(),
                    });
                    self.queue.extend(follow_ups);
                }
                Err(e) => {
                    warn!("{}: step {} failed: {}", ctx.urls.code(), name, e);
                    self.discard(ctx, "aborted");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn discard(&mut self, ctx: &FetchContext, why: &str) {
        if !self.queue.is_empty() {
            debug!(
                "{}: {}, discarding {} queued steps",
                ctx.urls.code(),
                why,
                self.queue.len()
            );
        }
        self.queue.clear();
    }
}

/// Fetch station metadata from the server's `sysconfig.json`.
pub async fn fetch_station_info(remote: &dyn RemoteSource, urls: &StationUrls) -> Result<StationInfo> {
    let url = urls.sysconfig();
    let body = remote.get(&url).await?;
    SysConfig::parse(&body.text, &url)?
        .station_info(&urls.station(), urls.code())
        .ok_or_else(|| Error::StationNotFound(urls.code().to_string()))
}

/// Loads station metadata, once per session.
pub struct StationInfoStep;

#[async_trait]
impl Step for StationInfoStep {
    fn name(&self) -> String {
        "station_info".to_string()
    }

    async fn run(self: Box<Self>, ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>> {
        let station_url = ctx.urls.station();
        if let Some(info) = ctx.session.station(&station_url) {
            ctx.station = Some(info);
            return Ok(Vec::new());
        }

        let info = fetch_station_info(ctx.remote.as_ref(), &ctx.urls).await?;
        ctx.store_op(|store| store.update_station_info(&info)).await?;
        info!("Loaded station {} ({})", info.code, info.title);

        ctx.session.remember_station(info.clone());
        ctx.station = Some(info);
        Ok(Vec::new())
    }
}

/// Works out which month files need syncing.
pub struct RangeRequestStep;

#[async_trait]
impl Step for RangeRequestStep {
    fn name(&self) -> String {
        "range_request".to_string()
    }

    async fn run(self: Box<Self>, ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>> {
        let start = ctx.data_set.start_timestamp();
        let end = ctx.data_set.end_timestamp();
        let station_url = ctx.urls.station();

        let cached = ctx
            .store_op(|store| {
                let id = store.get_or_create_station(&station_url)?;
                store.sample_range(id)
            })
            .await?;
        // The server has supplied this whole range before, so only the
        // month files need checking for gaps.
        let covered = !ctx.force_download && cached.is_some_and(|r| r.contains(start, end));
        let (clipped_start, clipped_end) = if covered {
            debug!("{}: cache covers the request, skipping range check", ctx.urls.code());
            (ctx.data_set.start, ctx.data_set.end)
        } else {
            let url = ctx.urls.sample_range();
            let body = ctx.remote.get(&url).await?;
            let (oldest, latest) = SampleRangeDoc::parse(&body.text, &url)?;
            (ctx.data_set.start.max(oldest), ctx.data_set.end.min(latest))
        };

        if clipped_start > clipped_end {
            info!(
                "{}: no server data between {} and {}",
                ctx.urls.code(),
                ctx.data_set.start,
                ctx.data_set.end
            );
            ctx.range_empty = true;
            ctx.emit(FetchEvent::RangeEmpty { station: ctx.code() });
            return Ok(vec![Box::new(SelectSamplesStep)]);
        }

        let now = OffsetDateTime::now_utc();
        let current_month = (now.year(), now.month());
        let mut steps: Vec<Box<dyn Step>> = Vec::new();

        for (year, month) in months_between(clipped_start, clipped_end) {
            let url = ctx.urls.data_file(year, month);
            if !ctx.force_download {
                let file = ctx.store_op(|store| store.remote_file_info(&url)).await?;
                let reason = if file.is_some_and(|f| f.meta.is_complete) {
                    Some(SkipReason::Complete)
                } else if (year, month) != current_month
                    && ctx
                        .session
                        .recently_checked(&url, now, ctx.sync.recheck_interval_secs)
                {
                    Some(SkipReason::RecentlyChecked)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    debug!("{}: skipping {} ({:?})", ctx.urls.code(), url, reason);
                    ctx.emit(FetchEvent::FileSkipped {
                        station: ctx.code(),
                        url,
                        reason,
                    });
                    continue;
                }
            }
            steps.push(Box::new(DataFileStep { year, month, url }));
        }

        debug!("{}: {} month files to sync", ctx.urls.code(), steps.len());
        steps.push(Box::new(SelectSamplesStep));
        Ok(steps)
    }
}

/// Syncs one month file.
pub struct DataFileStep {
    pub year: i32,
    pub month: Month,
    pub url: String,
}

#[async_trait]
impl Step for DataFileStep {
    fn name(&self) -> String {
        format!("data_file {}/{}", self.year, u8::from(self.month))
    }

    async fn run(self: Box<Self>, ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>> {
        let station = ctx.station_info();
        let target = FileTarget {
            station_url: ctx.urls.station(),
            url: self.url.clone(),
            year: self.year,
            month: self.month,
            has_solar: station.has_solar,
            interval: station.sample_interval,
        };
        let options = SyncOptions {
            force: ctx.force_download,
            verify_overlap_values: ctx.sync.verify_overlap_values,
        };

        let report = RemoteFileSync::new(ctx.remote.as_ref(), &ctx.store, &target, options)
            .run()
            .await?;
        ctx.session.mark_checked(&self.url, OffsetDateTime::now_utc());

        let event = match report.outcome {
            SyncOutcome::Skipped(reason) => FetchEvent::FileSkipped {
                station: ctx.code(),
                url: report.url,
                reason,
            },
            SyncOutcome::Cached { write, replaced } => FetchEvent::FileCached {
                station: ctx.code(),
                url: report.url,
                inserted: write.inserted,
                replaced,
            },
        };
        ctx.emit(event);
        Ok(Vec::new())
    }
}

/// Reads the requested samples from the cache.
pub struct SelectSamplesStep;

#[async_trait]
impl Step for SelectSamplesStep {
    fn name(&self) -> String {
        "select_samples".to_string()
    }

    async fn run(self: Box<Self>, ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>> {
        let station = ctx.station_info();
        let columns = ctx.data_set.columns & station.available_columns();
        if ctx.range_empty {
            ctx.result = Some(SampleSet::new(columns));
            return Ok(Vec::new());
        }

        let station_url = ctx.urls.station();
        let (station_id, range) = ctx
            .store_op(|store| {
                let id = store.get_or_create_station(&station_url)?;
                Ok((id, store.sample_range(id)?))
            })
            .await?;

        let requested = (ctx.data_set.start_timestamp(), ctx.data_set.end_timestamp());
        let Some((start, end)) = range.and_then(|r| r.clip(requested.0, requested.1)) else {
            debug!("{}: nothing cached in the requested range", ctx.urls.code());
            ctx.result = Some(SampleSet::new(columns));
            return Ok(Vec::new());
        };

        let query = SampleQuery::from_data_set(&ctx.data_set)
            .columns(columns)
            .range(start, end);
        let (count, rows) = ctx
            .store_op(|store| {
                let count = store.count_aggregated_groups(station_id, &query)?;
                if count == 0 {
                    return Ok((0, Vec::new()));
                }
                Ok((count, store.query_samples(station_id, &query)?))
            })
            .await?;
        debug!("{}: {} rows selected", ctx.urls.code(), count);

        let interval = gap_interval(
            ctx.data_set.aggregate,
            ctx.data_set.group,
            ctx.data_set.group_minutes,
            station.sample_interval,
        );
        let rows = match interval {
            Some(interval) => synthesize(rows, start, interval),
            None => rows,
        };

        ctx.result = Some(SampleSet::from_rows(columns, &rows));
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;
    use wxcache_store::RemoteFileMeta;
    use wxcache_types::{Sample, SampleColumn, SampleColumns};

    use crate::mock::MockRemote;

    struct Counting {
        label: &'static str,
        ran: Arc<AtomicUsize>,
        follow_ups: usize,
        fail: bool,
    }

    #[async_trait]
    impl Step for Counting {
        fn name(&self) -> String {
            self.label.to_string()
        }

        async fn run(self: Box<Self>, _ctx: &mut FetchContext) -> Result<Vec<Box<dyn Step>>> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::invalid_request("boom"));
            }
            Ok((0..self.follow_ups)
                .map(|_| {
                    Box::new(Counting {
                        label: "child",
                        ran: Arc::clone(&self.ran),
                        follow_ups: 0,
                        fail: false,
                    }) as Box<dyn Step>
                })
                .collect())
        }
    }

    fn step(ran: &Arc<AtomicUsize>, follow_ups: usize, fail: bool) -> Box<dyn Step> {
        Box::new(Counting {
            label: "counting",
            ran: Arc::clone(ran),
            follow_ups,
            fail,
        })
    }

    fn context() -> FetchContext {
        FetchContext {
            remote: Arc::new(MockRemote::new()),
            store: Arc::new(Mutex::new(Store::open_in_memory().unwrap())),
            session: Arc::new(SessionState::default()),
            events: EventDispatcher::default(),
            sync: SyncConfig::default(),
            urls: StationUrls::new("http://wx.test/", "sb").unwrap(),
            data_set: DataSet::new(
                SampleColumns::all(),
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2024-01-02 0:00 UTC),
            ),
            force_download: false,
            station: None,
            range_empty: false,
            result: None,
        }
    }

    #[tokio::test]
    async fn test_follow_ups_run_after_queue() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut ctx = context();
        let mut events = ctx.events.subscribe();

        let mut queue = TaskQueue::new(CancellationToken::new());
        queue.push(step(&ran, 2, false));
        queue.push(step(&ran, 0, false));
        queue.run(&mut ctx).await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert!(queue.is_empty());

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let FetchEvent::StepStarted { step, .. } = event {
                names.push(step);
            }
        }
        assert_eq!(names, vec!["counting", "counting", "child", "child"]);
    }

    #[tokio::test]
    async fn test_failure_drains_queue() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut ctx = context();

        let mut queue = TaskQueue::new(CancellationToken::new());
        queue.push(step(&ran, 0, true));
        queue.push(step(&ran, 0, false));
        queue.push(step(&ran, 0, false));

        let err = queue.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut ctx = context();
        let cancel = CancellationToken::new();

        let mut queue = TaskQueue::new(cancel.clone());
        queue.push(step(&ran, 0, false));
        cancel.cancel();

        assert!(matches!(queue.run(&mut ctx).await, Err(Error::Cancelled)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_recheck_memo() {
        let session = SessionState::default();
        let url = "http://wx.test/data/sb/2024/1/samples.dat";
        let checked = datetime!(2024-02-10 12:00 UTC);

        assert!(!session.recently_checked(url, checked, 3600));
        session.mark_checked(url, checked);
        assert!(session.recently_checked(url, checked + time::Duration::minutes(30), 3600));
        assert!(!session.recently_checked(url, checked + time::Duration::hours(2), 3600));

        session.forget_checked();
        assert!(!session.recently_checked(url, checked, 3600));
    }

    #[tokio::test]
    async fn test_covered_range_still_syncs_missing_months() {
        let remote = Arc::new(MockRemote::new());
        let mut ctx = context();
        ctx.remote = Arc::clone(&remote) as Arc<dyn RemoteSource>;
        ctx.data_set = DataSet::new(
            SampleColumns::all(),
            datetime!(2020-07-01 0:00 UTC),
            datetime!(2020-07-01 1:00 UTC),
        );

        // June and August are cached, so the cached range spans July.
        {
            let mut store = ctx.store.lock().await;
            let station = ctx.urls.station();
            for (month, at) in [
                (Month::June, datetime!(2020-06-01 0:00 UTC)),
                (Month::August, datetime!(2020-08-01 0:00 UTC)),
            ] {
                let meta = RemoteFileMeta::new(ctx.urls.data_file(2020, month), at, 100);
                let sample = Sample::new(at.unix_timestamp()).with(SampleColumn::Temperature, 1.0);
                store.cache_data_file(&station, &meta, &[sample], false).unwrap();
            }
        }

        let follow_ups = Box::new(RangeRequestStep).run(&mut ctx).await.unwrap();
        let names: Vec<String> = follow_ups.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["data_file 2020/7", "select_samples"]);
        assert!(!ctx.range_empty);
        // The server range is not needed when the cache spans the request.
        assert_eq!(remote.get_count(), 0);
    }

    #[tokio::test]
    async fn test_select_without_cache_is_empty() {
        let mut ctx = context();
        let follow_ups = Box::new(SelectSamplesStep).run(&mut ctx).await.unwrap();

        assert!(follow_ups.is_empty());
        let result = ctx.result.unwrap();
        assert!(result.is_empty());
        // Unknown hardware only reports the basic columns.
        assert_eq!(result.columns(), StationInfo::new("x", "sb").available_columns());
    }
}
