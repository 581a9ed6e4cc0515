//! Main store implementation.

use std::path::Path;
use std::sync::LazyLock;

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use wxcache_types::{
    Coordinates, ExtraSensor, HardwareType, Sample, SampleColumn, SampleColumns, StationInfo,
};

use crate::error::{Error, Operation, Result};
use crate::models::{
    CacheWrite, FileSampleStats, RemoteFileId, RemoteFileMeta, SampleRange, StationId,
    StoredRemoteFile,
};
use crate::queries::{QueryPlan, SampleQuery, apply_running_totals};
use crate::schema;

/// Upsert for one sample row. Parameters are station, file, timestamp and
/// then every column in storage order.
static INSERT_SAMPLE_SQL: LazyLock<String> = LazyLock::new(|| {
    let names: Vec<&str> = SampleColumn::ALL.iter().map(|c| c.name()).collect();
    let placeholders: Vec<String> = (1..=names.len() + 3).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = names
        .iter()
        .map(|n| format!("{n} = excluded.{n}"))
        .collect();

    format!(
        "INSERT INTO sample (station_id, data_file_id, time_stamp, {})
         VALUES ({})
         ON CONFLICT(station_id, time_stamp) DO UPDATE SET
            data_file_id = excluded.data_file_id, {}",
        names.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
});

/// Every value column, in storage order.
static ALL_COLUMNS_SQL: LazyLock<String> = LazyLock::new(|| {
    SampleColumn::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
});

/// SQLite-based cache for weather station samples.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening sample cache at {}", path.display());
        let conn = Connection::open(path).during("open")?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .during("open")?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().during("open")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .during("open")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// === Station operations ===
impl Store {
    /// Get or create the station identified by `url`.
    ///
    /// Calling this repeatedly with the same URL always yields the same id.
    pub fn get_or_create_station(&self, url: &str) -> Result<StationId> {
        ensure_station(&self.conn, url)
    }

    /// Look up a station id without creating it.
    pub fn station_id(&self, url: &str) -> Result<Option<StationId>> {
        self.conn
            .query_row("SELECT id FROM station WHERE url = ?1", [url], |row| {
                row.get(0)
            })
            .optional()
            .during("station_id")
    }

    /// Persist station metadata, replacing the extra sensor configuration.
    pub fn update_station_info(&mut self, info: &StationInfo) -> Result<StationId> {
        let tx = self.conn.transaction().during("update_station_info")?;

        let coordinates = info.coordinates;
        let station_id: StationId = tx
            .query_row(
                "INSERT INTO station (url, code, title, description, hardware_type,
                    sample_interval, latitude, longitude, altitude, solar_available,
                    wireless_available, davis_broadcast_id, archived, archived_time,
                    archived_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(url) DO UPDATE SET
                    code = excluded.code,
                    title = excluded.title,
                    description = excluded.description,
                    hardware_type = excluded.hardware_type,
                    sample_interval = excluded.sample_interval,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    altitude = excluded.altitude,
                    solar_available = excluded.solar_available,
                    wireless_available = excluded.wireless_available,
                    davis_broadcast_id = excluded.davis_broadcast_id,
                    archived = excluded.archived,
                    archived_time = excluded.archived_time,
                    archived_message = excluded.archived_message
                 RETURNING id",
                rusqlite::params![
                    &info.url,
                    &info.code,
                    &info.title,
                    &info.description,
                    info.hardware.code(),
                    info.sample_interval,
                    coordinates.map(|c| c.latitude),
                    coordinates.map(|c| c.longitude),
                    coordinates.map(|c| c.altitude),
                    info.has_solar,
                    info.is_wireless,
                    info.davis_broadcast_id,
                    info.archived,
                    info.archived_time.map(|t| t.unix_timestamp()),
                    &info.archived_message,
                ],
                |row| row.get(0),
            )
            .during("update_station_info")?;

        tx.execute(
            "DELETE FROM sensor_config WHERE station_id = ?1",
            [station_id],
        )
        .during("update_station_info")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO sensor_config (station_id, sensor, name, enabled)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .during("update_station_info")?;

            for sensor in &info.extra_sensors {
                let Some(key) = sensor.column.sensor_key() else {
                    warn!("Ignoring sensor config for non-sensor column {}", sensor.column);
                    continue;
                };
                stmt.execute(rusqlite::params![station_id, key, &sensor.name, sensor.enabled])
                    .during("update_station_info")?;
            }
        }

        tx.commit().during("update_station_info")?;

        debug!(
            "Updated station info for {} (id={}, interval={}s)",
            info.url, station_id, info.sample_interval
        );
        Ok(station_id)
    }

    /// Load station metadata.
    pub fn station_info(&self, url: &str) -> Result<Option<StationInfo>> {
        let station = self
            .conn
            .query_row(
                "SELECT id, url, code, title, description, hardware_type, sample_interval,
                    latitude, longitude, altitude, solar_available, wireless_available,
                    davis_broadcast_id, archived, archived_time, archived_message
                 FROM station WHERE url = ?1",
                [url],
                |row| {
                    let id: StationId = row.get(0)?;
                    let code: Option<String> = row.get(2)?;
                    let coordinates = match (
                        row.get::<_, Option<f64>>(7)?,
                        row.get::<_, Option<f64>>(8)?,
                        row.get::<_, Option<f64>>(9)?,
                    ) {
                        (Some(latitude), Some(longitude), altitude) => Some(Coordinates {
                            latitude,
                            longitude,
                            altitude: altitude.unwrap_or_default(),
                        }),
                        _ => None,
                    };
                    let archived_time = row
                        .get::<_, Option<i64>>(14)?
                        .map(|ts| datetime_from_column(14, ts))
                        .transpose()?;

                    let mut info = StationInfo::new(row.get::<_, String>(1)?, code.unwrap_or_default());
                    if let Some(title) = row.get::<_, Option<String>>(3)? {
                        info.title = title;
                    }
                    info.description = row.get::<_, Option<String>>(4)?.unwrap_or_default();
                    info.hardware = HardwareType::from_code(&row.get::<_, String>(5)?);
                    info.sample_interval = row.get(6)?;
                    info.coordinates = coordinates;
                    info.has_solar = row.get(10)?;
                    info.is_wireless = row.get(11)?;
                    info.davis_broadcast_id = row.get(12)?;
                    info.archived = row.get(13)?;
                    info.archived_time = archived_time;
                    info.archived_message = row.get(15)?;
                    Ok((id, info))
                },
            )
            .optional()
            .during("station_info")?;

        let Some((station_id, mut info)) = station else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT sensor, name, enabled FROM sensor_config
                 WHERE station_id = ?1 ORDER BY sensor",
            )
            .during("station_info")?;
        let rows = stmt
            .query_map([station_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .during("station_info")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .during("station_info")?;

        for (key, name, enabled) in rows {
            match SampleColumn::from_sensor_key(&key) {
                Some(column) => info.extra_sensors.push(ExtraSensor {
                    column,
                    name,
                    enabled,
                }),
                None => warn!("Unknown sensor key {} for station {}", key, url),
            }
        }

        Ok(Some(info))
    }

    /// Sample interval in seconds. Unknown stations get the default.
    pub fn sample_interval(&self, url: &str) -> Result<u32> {
        let interval: Option<u32> = self
            .conn
            .query_row(
                "SELECT sample_interval FROM station WHERE url = ?1",
                [url],
                |row| row.get(0),
            )
            .optional()
            .during("sample_interval")?;

        Ok(interval.unwrap_or(StationInfo::DEFAULT_SAMPLE_INTERVAL))
    }

    /// Whether the station has been archived. Unknown stations are not.
    pub fn station_is_archived(&self, url: &str) -> Result<bool> {
        let archived: Option<bool> = self
            .conn
            .query_row("SELECT archived FROM station WHERE url = ?1", [url], |row| {
                row.get(0)
            })
            .optional()
            .during("station_is_archived")?;

        Ok(archived.unwrap_or(false))
    }
}

// === Remote file operations ===
impl Store {
    /// Load the provenance record for a remote file.
    pub fn remote_file_info(&self, url: &str) -> Result<Option<StoredRemoteFile>> {
        self.conn
            .query_row(
                "SELECT id, station_id, url, last_modified, size, is_complete,
                    start_contiguous_to, end_contiguous_from
                 FROM data_file WHERE url = ?1 LIMIT 1",
                [url],
                |row| {
                    Ok(StoredRemoteFile {
                        id: row.get(0)?,
                        station_id: row.get(1)?,
                        meta: RemoteFileMeta {
                            url: row.get(2)?,
                            last_modified: datetime_from_column(3, row.get(3)?)?,
                            size: row.get::<_, i64>(4)?.max(0) as u64,
                            is_complete: row.get(5)?,
                            start_contiguous_to: row.get(6)?,
                            end_contiguous_from: row.get(7)?,
                        },
                    })
                },
            )
            .optional()
            .during("remote_file_info")
    }

    /// Insert or update a remote file record.
    pub fn upsert_remote_file(
        &self,
        station_id: StationId,
        meta: &RemoteFileMeta,
    ) -> Result<RemoteFileId> {
        upsert_file(&self.conn, station_id, meta)
    }

    /// Delete every cached sample that came from a remote file.
    pub fn truncate_remote_file(&self, file_id: RemoteFileId) -> Result<usize> {
        truncate_file(&self.conn, file_id)
    }

    /// Cached sample statistics for one remote file.
    pub fn file_sample_stats(&self, file_id: RemoteFileId) -> Result<Option<FileSampleStats>> {
        let (first, last, count): (Option<i64>, Option<i64>, i64) = self
            .conn
            .query_row(
                "SELECT MIN(time_stamp), MAX(time_stamp), COUNT(*)
                 FROM sample WHERE data_file_id = ?1",
                [file_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .during("file_sample_stats")?;

        Ok(match (first, last) {
            (Some(first), Some(last)) => Some(FileSampleStats {
                first,
                last,
                count: count as u64,
            }),
            _ => None,
        })
    }

    /// Cached samples of one remote file within `[start, end]`, every column.
    pub fn file_samples(&self, file_id: RemoteFileId, start: i64, end: i64) -> Result<Vec<Sample>> {
        let sql = format!(
            "SELECT time_stamp, {} FROM sample
             WHERE data_file_id = ?1 AND time_stamp >= ?2 AND time_stamp <= ?3
             ORDER BY time_stamp ASC",
            ALL_COLUMNS_SQL.as_str()
        );

        let mut stmt = self.conn.prepare(&sql).during("file_samples")?;
        let samples = stmt
            .query_map(rusqlite::params![file_id, start, end], |row| {
                read_sample(row, &SampleColumn::ALL)
            })
            .during("file_samples")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .during("file_samples")?;

        Ok(samples)
    }
}

// === Sample operations ===
impl Store {
    /// Insert samples in one transaction. Existing rows with the same
    /// timestamp are overwritten.
    pub fn bulk_insert_samples(
        &mut self,
        station_id: StationId,
        file_id: RemoteFileId,
        samples: &[Sample],
    ) -> Result<usize> {
        let tx = self.conn.transaction().during("bulk_insert_samples")?;
        let written = insert_samples(&tx, station_id, file_id, samples)?;
        tx.commit().during("bulk_insert_samples")?;

        debug!("Inserted {} samples for station {}", written, station_id);
        Ok(written)
    }

    /// Record a downloaded data file and its samples in one transaction.
    ///
    /// Creates the station if needed, upserts the file record, removes the
    /// file's previously cached samples when `replace` is set, and inserts
    /// `samples`. Nothing is written if any step fails.
    pub fn cache_data_file(
        &mut self,
        station_url: &str,
        meta: &RemoteFileMeta,
        samples: &[Sample],
        replace: bool,
    ) -> Result<CacheWrite> {
        let tx = self.conn.transaction().during("cache_data_file")?;

        let station_id = ensure_station(&tx, station_url)?;
        let file_id = upsert_file(&tx, station_id, meta)?;
        let truncated = if replace {
            truncate_file(&tx, file_id)?
        } else {
            0
        };
        let inserted = insert_samples(&tx, station_id, file_id, samples)?;

        tx.commit().during("cache_data_file")?;

        info!(
            "Cached {} samples from {} (replaced {})",
            inserted, meta.url, truncated
        );
        Ok(CacheWrite {
            file_id,
            truncated,
            inserted,
        })
    }

    /// Number of samples for a station within `[start, end]`.
    pub fn count_samples(&self, station_id: StationId, start: i64, end: i64) -> Result<u64> {
        let plan = SampleQuery::new(start, end).plan()?;
        self.count_plan(station_id, &plan, "count_samples")
    }

    /// Number of rows an aggregated query would return.
    pub fn count_aggregated_groups(&self, station_id: StationId, query: &SampleQuery) -> Result<u64> {
        let plan = query.plan()?;
        self.count_plan(station_id, &plan, "count_aggregated_groups")
    }

    /// Raw samples for `columns` within `[start, end]`, oldest first.
    pub fn query_raw(
        &self,
        station_id: StationId,
        columns: SampleColumns,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sample>> {
        let plan = SampleQuery::new(start, end).columns(columns).plan()?;
        self.run_plan(station_id, &plan, "query_raw")
    }

    /// One row per group, ordered by group key.
    ///
    /// Running-total queries return plain per-group sums here; see
    /// [`Store::query_samples`].
    pub fn query_aggregated(&self, station_id: StationId, query: &SampleQuery) -> Result<Vec<Sample>> {
        if !query.is_aggregated() {
            return Err(Error::InvalidQuery(
                "aggregated query needs an aggregate function and a grouping".to_string(),
            ));
        }
        let plan = query.plan()?;
        self.run_plan(station_id, &plan, "query_aggregated")
    }

    /// Run a raw or aggregated query, accumulating running totals.
    pub fn query_samples(&self, station_id: StationId, query: &SampleQuery) -> Result<Vec<Sample>> {
        let plan = query.plan()?;
        let operation = if query.is_aggregated() {
            "query_aggregated"
        } else {
            "query_raw"
        };
        let mut rows = self.run_plan(station_id, &plan, operation)?;
        if plan.running_total {
            apply_running_totals(&mut rows, plan.column_set());
        }
        Ok(rows)
    }

    /// Earliest and latest cached sample for a station.
    pub fn sample_range(&self, station_id: StationId) -> Result<Option<SampleRange>> {
        let (earliest, latest): (Option<i64>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT MIN(time_stamp), MAX(time_stamp) FROM sample WHERE station_id = ?1",
                [station_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .during("sample_range")?;

        Ok(match (earliest, latest) {
            (Some(earliest), Some(latest)) => Some(SampleRange { earliest, latest }),
            _ => None,
        })
    }

    /// Delete every sample and remote file record, then reclaim space.
    ///
    /// Station metadata is kept.
    pub fn clear_samples(&mut self) -> Result<()> {
        let tx = self.conn.transaction().during("clear_samples")?;
        let samples = tx.execute("DELETE FROM sample", []).during("clear_samples")?;
        let files = tx.execute("DELETE FROM data_file", []).during("clear_samples")?;
        tx.commit().during("clear_samples")?;

        self.conn.execute_batch("VACUUM").during("clear_samples")?;

        info!("Cleared {} samples from {} files", samples, files);
        Ok(())
    }

    /// Let SQLite refresh its planner statistics.
    pub fn optimize(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA optimize")
            .during("optimize")
    }

    fn count_plan(
        &self,
        station_id: StationId,
        plan: &QueryPlan,
        operation: &'static str,
    ) -> Result<u64> {
        debug!("Executing count: {}", plan.count_sql);
        let count: i64 = self
            .conn
            .query_row(
                &plan.count_sql,
                params_from_iter(plan.params(station_id)),
                |row| row.get(0),
            )
            .during(operation)?;
        Ok(count as u64)
    }

    fn run_plan(
        &self,
        station_id: StationId,
        plan: &QueryPlan,
        operation: &'static str,
    ) -> Result<Vec<Sample>> {
        debug!("Executing query: {}", plan.sql);

        let mut stmt = self.conn.prepare(&plan.sql).during(operation)?;
        let rows = stmt
            .query_map(params_from_iter(plan.params(station_id)), |row| {
                read_sample(row, &plan.columns)
            })
            .during(operation)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .during(operation)?;

        Ok(rows)
    }
}

fn ensure_station(conn: &Connection, url: &str) -> Result<StationId> {
    conn.execute(
        "INSERT INTO station (url) VALUES (?1) ON CONFLICT(url) DO NOTHING",
        [url],
    )
    .during("get_or_create_station")?;

    conn.query_row("SELECT id FROM station WHERE url = ?1", [url], |row| {
        row.get(0)
    })
    .during("get_or_create_station")
}

fn upsert_file(conn: &Connection, station_id: StationId, meta: &RemoteFileMeta) -> Result<RemoteFileId> {
    conn.query_row(
        "INSERT INTO data_file (station_id, url, last_modified, size, is_complete,
            start_contiguous_to, end_contiguous_from)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(station_id, url) DO UPDATE SET
            last_modified = excluded.last_modified,
            size = excluded.size,
            is_complete = excluded.is_complete,
            start_contiguous_to = excluded.start_contiguous_to,
            end_contiguous_from = excluded.end_contiguous_from
         RETURNING id",
        rusqlite::params![
            station_id,
            &meta.url,
            meta.last_modified.unix_timestamp(),
            i64::try_from(meta.size).unwrap_or(i64::MAX),
            meta.is_complete,
            meta.start_contiguous_to,
            meta.end_contiguous_from,
        ],
        |row| row.get(0),
    )
    .during("upsert_remote_file")
}

fn truncate_file(conn: &Connection, file_id: RemoteFileId) -> Result<usize> {
    conn.execute("DELETE FROM sample WHERE data_file_id = ?1", [file_id])
        .during("truncate_remote_file")
}

fn insert_samples(
    conn: &Connection,
    station_id: StationId,
    file_id: RemoteFileId,
    samples: &[Sample],
) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(INSERT_SAMPLE_SQL.as_str())
        .during("bulk_insert_samples")?;

    let mut written = 0;
    for sample in samples {
        let mut values = Vec::with_capacity(SampleColumn::COUNT + 3);
        values.push(Value::Integer(station_id));
        values.push(Value::Integer(file_id));
        values.push(Value::Integer(sample.timestamp));
        values.extend(
            SampleColumn::ALL
                .iter()
                .map(|&c| sample.get(c).map_or(Value::Null, Value::Real)),
        );

        written += stmt
            .execute(params_from_iter(values))
            .during("bulk_insert_samples")?;
    }

    Ok(written)
}

/// Read `time_stamp` followed by one value per entry of `columns`.
fn read_sample(row: &rusqlite::Row<'_>, columns: &[SampleColumn]) -> rusqlite::Result<Sample> {
    let mut sample = Sample::new(row.get(0)?);
    for (i, &column) in columns.iter().enumerate() {
        sample.set(column, row.get(i + 1)?);
    }
    Ok(sample)
}

fn datetime_from_column(index: usize, timestamp: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Integer, Box::new(e)))
}
