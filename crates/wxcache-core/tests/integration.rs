//! End-to-end fetches against a mock data server.

use std::sync::Arc;
use std::time::Duration;

use time::macros::{datetime, format_description};
use time::{Month, OffsetDateTime};
use wxcache_core::{
    Config, DataSource, Error, FetchEvent, FetchRequest, MockRemote, NetworkFailure, SkipReason,
};
use wxcache_store::Store;
use wxcache_types::{AggregateFunction, DataSet, GroupType, SampleColumn, SampleColumns};

const BASE: &str = "http://wx.test/";
const SYSCONFIG_URL: &str = "http://wx.test/data/sysconfig.json";
const RANGE_URL: &str = "http://wx.test/data/sb/samplerange.json";
const STATION_URL: &str = "http://wx.test/data/sb/";

const SYSCONFIG: &str = r#"{
    "stations": [
        {"code": "sb", "name": "Sandy Bay", "hw_type": {"code": "FOWH1080"}, "interval": 300},
        {"code": "hb", "name": "Hobart", "hw_type": {"code": "FOWH1080"}, "interval": 300}
    ]
}"#;

const SAMPLE_RANGE: &str = r#"{"oldest": "2020-06-01T00:00:00Z", "latest": "2021-01-01T00:00:00Z"}"#;

/// Months the server has data for.
const SERVED: [(i32, u8); 8] = [
    (2020, 6),
    (2020, 7),
    (2020, 8),
    (2020, 9),
    (2020, 10),
    (2020, 11),
    (2020, 12),
    (2021, 1),
];

fn file_url(year: i32, month: u8) -> String {
    format!("http://wx.test/data/sb/{}/{}/samples.dat", year, month)
}

fn line(t: OffsetDateTime, temperature: f64, rainfall: f64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    format!(
        "{} {} 5.0 10.0 10.0 80 1013.2 20.0 45 {} 1.0 2.0 None\n",
        t.format(format).unwrap(),
        temperature,
        rainfall
    )
}

/// `count` samples five minutes apart from the first of the month, with the
/// temperature set to the sample index.
fn month_file(year: i32, month: u8, count: i64) -> String {
    let month = Month::try_from(month).unwrap();
    let start = time::Date::from_calendar_date(year, month, 1)
        .unwrap()
        .midnight()
        .assume_utc();
    let mut text = String::from("# date time temperature ...\n");
    for i in 0..count {
        text.push_str(&line(start + time::Duration::minutes(5 * i), i as f64, 0.2));
    }
    text
}

/// Log to the test output when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn server() -> Arc<MockRemote> {
    init_tracing();
    let remote = MockRemote::new()
        .with_document(SYSCONFIG_URL, SYSCONFIG)
        .with_document(RANGE_URL, SAMPLE_RANGE);
    let modified = datetime!(2021-01-02 0:00 UTC);
    for (year, month) in SERVED {
        remote.set_file(&file_url(year, month), month_file(year, month, 24), modified);
    }
    // Outside the published range; must never be requested.
    remote.set_file(&file_url(2020, 5), month_file(2020, 5, 24), modified);
    remote.set_file(&file_url(2021, 2), month_file(2021, 2, 24), modified);
    Arc::new(remote)
}

fn config() -> Config {
    let mut config = Config::default();
    config.remote.base_url = BASE.to_string();
    config
}

fn data_source(remote: &Arc<MockRemote>, store: Store) -> DataSource {
    DataSource::new(remote.clone(), store, &config()).unwrap()
}

/// Daily averages over far more than the server holds.
fn everything() -> DataSet {
    DataSet::new(
        SampleColumns::from(SampleColumn::Temperature) | SampleColumn::Rainfall,
        datetime!(2000-01-01 0:00 UTC),
        datetime!(2030-01-01 0:00 UTC),
    )
    .aggregate(AggregateFunction::Average)
    .group_by(GroupType::Day)
}

fn data_file_requests(remote: &MockRemote) -> Vec<String> {
    remote
        .requests()
        .into_iter()
        .filter(|r| r.starts_with("GET ") && r.ends_with("samples.dat"))
        .map(|r| r.trim_start_matches("GET ").to_string())
        .collect()
}

fn drain(events: &mut wxcache_core::EventReceiver) -> Vec<FetchEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn cached_rows(source: &DataSource) -> u64 {
    let store = source.store();
    let store = store.lock().await;
    let Some(id) = store.station_id(STATION_URL).unwrap() else {
        return 0;
    };
    store.count_samples(id, i64::MIN, i64::MAX).unwrap()
}

#[tokio::test]
async fn range_is_clipped_to_server_data() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let samples = source.fetch(FetchRequest::new("sb", everything())).await.unwrap();

    let expected: Vec<String> = SERVED.iter().map(|(y, m)| file_url(*y, *m)).collect();
    assert_eq!(data_file_requests(&remote), expected);
    assert_eq!(remote.get_count_for(&file_url(2020, 5)), 0);
    assert_eq!(remote.get_count_for(&file_url(2021, 2)), 0);

    // One day per month, plus placeholder days for the gaps between them.
    let days: Vec<i64> = samples
        .rows()
        .filter(|r| !r.is_placeholder())
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(days.len(), 8);
    assert_eq!(days[0], datetime!(2020-06-01 0:00 UTC).unix_timestamp());
    assert_eq!(days[7], datetime!(2021-01-01 0:00 UTC).unix_timestamp());
    assert!(samples.len() > days.len());
    let means = samples.column(SampleColumn::Temperature).unwrap();
    assert!((means[0].unwrap() - 11.5).abs() < 1e-9);
    assert_eq!(cached_rows(&source).await, 8 * 24);
}

#[tokio::test]
async fn second_fetch_is_idempotent() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let first = source.fetch(FetchRequest::new("sb", everything())).await.unwrap();
    let gets = remote.get_count();

    let mut events = source.subscribe();
    let second = source.fetch(FetchRequest::new("sb", everything())).await.unwrap();

    assert_eq!(first, second);
    // Only samplerange.json was fetched again.
    assert_eq!(remote.get_count(), gets + 1);

    let events = drain(&mut events);
    assert!(!events.iter().any(|e| matches!(e, FetchEvent::FileCached { .. })));
    let rechecks = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                FetchEvent::FileSkipped {
                    reason: SkipReason::RecentlyChecked,
                    ..
                }
            )
        })
        .count();
    assert_eq!(rechecks, 8);
}

#[tokio::test]
async fn new_session_revalidates_with_head_requests() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let remote = server();

    let first = data_source(&remote, Store::open(&path).unwrap())
        .fetch(FetchRequest::new("sb", everything()))
        .await
        .unwrap();
    assert_eq!(remote.head_count(), 0);
    remote.reset_counts();

    let source = data_source(&remote, Store::open(&path).unwrap());
    let mut events = source.subscribe();
    let second = source.fetch(FetchRequest::new("sb", everything())).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(remote.head_count(), 8);
    assert!(data_file_requests(&remote).is_empty());

    let not_modified = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                FetchEvent::FileSkipped {
                    reason: SkipReason::NotModified,
                    ..
                }
            )
        })
        .count();
    assert_eq!(not_modified, 8);
}

#[tokio::test]
async fn rewritten_month_replaces_cached_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let remote = server();
    data_source(&remote, Store::open(&path).unwrap())
        .fetch(FetchRequest::new("sb", everything()))
        .await
        .unwrap();

    // June shrinks to 12 samples, all at 99 degrees.
    let text: String = (0..12)
        .map(|i| line(datetime!(2020-06-01 0:00 UTC) + time::Duration::minutes(5 * i), 99.0, 0.0))
        .collect();
    remote.set_file(&file_url(2020, 6), text, datetime!(2021-02-01 0:00 UTC));

    // A new session, so June is not in the recheck memo.
    let source = data_source(&remote, Store::open(&path).unwrap());
    let mut events = source.subscribe();
    let june = DataSet::new(
        SampleColumns::from(SampleColumn::Temperature),
        datetime!(2020-06-01 0:00 UTC),
        datetime!(2020-06-01 2:00 UTC),
    );
    let samples = source.fetch(FetchRequest::new("sb", june)).await.unwrap();

    assert_eq!(samples.len(), 12);
    let temperatures = samples.column(SampleColumn::Temperature).unwrap();
    assert!(temperatures.iter().all(|t| *t == Some(99.0)));

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        FetchEvent::FileCached {
            inserted: 12,
            replaced: true,
            ..
        }
    )));
}

#[tokio::test]
async fn month_inside_cached_range_is_downloaded() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    let hour = |start: OffsetDateTime| {
        DataSet::new(
            SampleColumns::from(SampleColumn::Temperature),
            start,
            start + time::Duration::hours(1),
        )
    };

    source
        .fetch(FetchRequest::new("sb", hour(datetime!(2020-06-01 0:00 UTC))))
        .await
        .unwrap();
    source
        .fetch(FetchRequest::new("sb", hour(datetime!(2020-08-01 0:00 UTC))))
        .await
        .unwrap();
    assert_eq!(remote.get_count_for(&file_url(2020, 7)), 0);

    // June and August bracket July in the cache, but July was never fetched.
    let july = source
        .fetch(FetchRequest::new("sb", hour(datetime!(2020-07-01 0:00 UTC))))
        .await
        .unwrap();

    assert_eq!(remote.get_count_for(&file_url(2020, 7)), 1);
    assert_eq!(remote.get_count_for(RANGE_URL), 2);
    assert_eq!(july.len(), 13);
    let temperatures = july.column(SampleColumn::Temperature).unwrap();
    assert!(temperatures.iter().all(Option::is_some));
    assert_eq!(temperatures[0], Some(0.0));
}

#[tokio::test]
async fn hourly_average_through_facade() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let data_set = DataSet::new(
        SampleColumns::from(SampleColumn::Temperature),
        datetime!(2020-06-01 0:00 UTC),
        datetime!(2020-06-01 2:00 UTC),
    )
    .aggregate(AggregateFunction::Average)
    .group_by(GroupType::Hour);
    let samples = source.fetch(FetchRequest::new("sb", data_set)).await.unwrap();

    assert_eq!(
        samples.timestamps(),
        &[
            datetime!(2020-06-01 0:00 UTC).unix_timestamp(),
            datetime!(2020-06-01 1:00 UTC).unix_timestamp(),
        ]
    );
    let means = samples.column(SampleColumn::Temperature).unwrap();
    assert!((means[0].unwrap() - 5.5).abs() < 1e-9);
    assert!((means[1].unwrap() - 17.5).abs() < 1e-9);

    // Only June was needed.
    assert_eq!(data_file_requests(&remote), vec![file_url(2020, 6)]);
}

#[tokio::test]
async fn raw_query_fills_gaps_between_months() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let data_set = DataSet::new(
        SampleColumns::from(SampleColumn::Temperature),
        datetime!(2020-06-01 0:00 UTC),
        datetime!(2020-07-01 1:55 UTC),
    );
    let samples = source.fetch(FetchRequest::new("sb", data_set)).await.unwrap();

    let last_june = datetime!(2020-06-01 1:55 UTC).unix_timestamp();
    let first_july = datetime!(2020-07-01 0:00 UTC).unix_timestamp();
    let placeholders = ((first_july - last_june) / 300 - 1) as usize;
    assert_eq!(samples.len(), 48 + placeholders);

    let timestamps = samples.timestamps();
    assert!(timestamps.windows(2).all(|w| w[1] - w[0] == 300));
}

#[tokio::test]
async fn rain_running_total_through_facade() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let data_set = DataSet::new(
        SampleColumns::from(SampleColumn::Rainfall),
        datetime!(2020-06-01 0:00 UTC),
        datetime!(2020-06-01 0:20 UTC),
    )
    .aggregate(AggregateFunction::RunningTotal)
    .custom_groups(5);
    let samples = source.fetch(FetchRequest::new("sb", data_set)).await.unwrap();

    let totals: Vec<f64> = samples
        .column(SampleColumn::Rainfall)
        .unwrap()
        .iter()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(totals.len(), 5);
    for (i, total) in totals.iter().enumerate() {
        assert!((total - 0.2 * (i + 1) as f64).abs() < 1e-9);
    }
}

#[tokio::test]
async fn empty_range_yields_empty_result() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    let mut events = source.subscribe();

    let data_set = DataSet::new(
        SampleColumns::from(SampleColumn::Temperature),
        datetime!(2010-01-01 0:00 UTC),
        datetime!(2010-12-31 0:00 UTC),
    );
    let samples = source.fetch(FetchRequest::new("sb", data_set)).await.unwrap();

    assert!(samples.is_empty());
    assert!(data_file_requests(&remote).is_empty());
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, FetchEvent::RangeEmpty { .. })));
    assert!(events.iter().any(|e| matches!(e, FetchEvent::Completed { rows: 0, .. })));
}

#[tokio::test]
async fn busy_station_rejects_second_fetch() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    remote.pause();

    let first = source.submit(FetchRequest::new("sb", everything())).unwrap();
    assert!(source.is_busy("sb"));

    let err = source.submit(FetchRequest::new("SB", everything())).unwrap_err();
    assert!(matches!(err, Error::Busy(ref code) if code == "sb"));

    // Other stations are independent.
    let other = source.submit(FetchRequest::new("hb", everything())).unwrap();
    assert!(source.is_busy("hb"));
    other.cancel();

    remote.resume();
    assert!(first.wait().await.is_ok());
    assert!(!source.is_busy("sb"));

    // Free again once finished.
    source.fetch(FetchRequest::new("sb", everything())).await.unwrap();
}

#[tokio::test]
async fn cancel_discards_remaining_steps() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    let mut events = source.subscribe();
    remote.pause();

    let handle = source.submit(FetchRequest::new("sb", everything())).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
    assert!(!source.is_busy("sb"));
    remote.resume();

    assert!(data_file_requests(&remote).is_empty());
    assert_eq!(cached_rows(&source).await, 0);
    assert!(drain(&mut events).iter().any(|e| matches!(e, FetchEvent::Cancelled { .. })));
}

#[tokio::test]
async fn failed_month_aborts_fetch_and_keeps_earlier_months() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    let mut events = source.subscribe();
    remote.set_failure(&file_url(2020, 9), 500);

    let err = source.fetch(FetchRequest::new("sb", everything())).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Network {
            reason: NetworkFailure::Status(500),
            ..
        }
    ));
    assert_eq!(remote.get_count_for(&file_url(2020, 10)), 0);
    assert_eq!(cached_rows(&source).await, 3 * 24);
    assert!(drain(&mut events).iter().any(|e| matches!(e, FetchEvent::Failed { .. })));

    // No automatic retry; the next fetch picks up where this one stopped.
    remote.clear_failure(&file_url(2020, 9));
    remote.reset_counts();
    source.fetch(FetchRequest::new("sb", everything())).await.unwrap();

    let expected: Vec<String> = SERVED[3..].iter().map(|(y, m)| file_url(*y, *m)).collect();
    assert_eq!(data_file_requests(&remote), expected);
    assert_eq!(cached_rows(&source).await, 8 * 24);
}

#[tokio::test]
async fn unknown_station_is_reported() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let err = source.fetch(FetchRequest::new("nowhere", everything())).await.unwrap_err();
    assert!(matches!(err, Error::StationNotFound(ref code) if code == "nowhere"));
}

#[tokio::test]
async fn station_info_is_fetched_once_per_session() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());

    let info = source.station_info("sb").await.unwrap();
    assert_eq!(info.title, "Sandy Bay");
    assert_eq!(info.sample_interval, 300);

    source.fetch(FetchRequest::new("sb", everything())).await.unwrap();
    source.station_info("sb").await.unwrap();
    assert_eq!(remote.get_count_for(SYSCONFIG_URL), 1);

    let stored = source.store().lock().await.station_info(STATION_URL).unwrap();
    assert_eq!(stored.map(|s| s.title), Some("Sandy Bay".to_string()));
}

#[tokio::test]
async fn clear_cache_forces_fresh_download() {
    let remote = server();
    let source = data_source(&remote, Store::open_in_memory().unwrap());
    source.fetch(FetchRequest::new("sb", everything())).await.unwrap();

    source.clear_cache().await.unwrap();
    assert_eq!(cached_rows(&source).await, 0);

    remote.reset_counts();
    source.fetch(FetchRequest::new("sb", everything())).await.unwrap();
    assert_eq!(data_file_requests(&remote).len(), 8);
    assert_eq!(cached_rows(&source).await, 8 * 24);
}
