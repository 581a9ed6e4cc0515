//! Database schema and migrations.

use rusqlite::Connection;
use wxcache_types::SampleColumn;

use crate::error::{Operation, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        // Fresh database - create all tables
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .during("get_schema_version")?;

    if !exists {
        return Ok(0);
    }

    conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .during("get_schema_version")
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )
    .during("set_schema_version")?;
    Ok(())
}

/// DDL for the sample table. One nullable REAL column per measurement.
fn sample_table_sql() -> String {
    let columns: Vec<String> = SampleColumn::ALL
        .iter()
        .map(|c| format!("            {} REAL,", c.name()))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS sample (
            station_id INTEGER NOT NULL REFERENCES station(id),
            data_file_id INTEGER NOT NULL REFERENCES data_file(id),
            time_stamp INTEGER NOT NULL,
{}
            PRIMARY KEY (station_id, time_stamp)
        );
        CREATE INDEX IF NOT EXISTS idx_sample_data_file
            ON sample(data_file_id, time_stamp);",
        columns.join("\n")
    )
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Stations, keyed by their data URL
        CREATE TABLE IF NOT EXISTS station (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            code TEXT,
            title TEXT,
            description TEXT,
            hardware_type TEXT NOT NULL DEFAULT 'GENERIC',
            sample_interval INTEGER NOT NULL DEFAULT 300,
            latitude REAL,
            longitude REAL,
            altitude REAL,
            solar_available INTEGER NOT NULL DEFAULT 0,
            wireless_available INTEGER NOT NULL DEFAULT 0,
            davis_broadcast_id INTEGER,
            archived INTEGER NOT NULL DEFAULT 0,
            archived_time INTEGER,
            archived_message TEXT
        );

        -- Extra sensor names and enablement
        CREATE TABLE IF NOT EXISTS sensor_config (
            station_id INTEGER NOT NULL REFERENCES station(id) ON DELETE CASCADE,
            sensor TEXT NOT NULL,
            name TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            PRIMARY KEY (station_id, sensor)
        );

        -- Provenance for each downloaded month file
        CREATE TABLE IF NOT EXISTS data_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            station_id INTEGER NOT NULL REFERENCES station(id),
            url TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            size INTEGER NOT NULL,
            is_complete INTEGER NOT NULL DEFAULT 0,
            start_contiguous_to INTEGER,
            end_contiguous_from INTEGER,
            UNIQUE(station_id, url)
        );
        CREATE INDEX IF NOT EXISTS idx_data_file_url ON data_file(url);
        "#,
    )
    .during("create_schema")?;

    conn.execute_batch(&sample_table_sql())
        .during("create_schema")?;

    Ok(())
}

/// Run migrations from old_version to current.
fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    // Add future migrations here
    // if old_version < 2 { migrate_to_v2(conn)?; }

    let _ = old_version;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"station".to_string()));
        assert!(tables.contains(&"sensor_config".to_string()));
        assert!(tables.contains(&"data_file".to_string()));
        assert!(tables.contains(&"sample".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_sample_table_has_every_column() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let names: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('sample')")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for column in SampleColumn::ALL {
            assert!(names.iter().any(|n| n == column.name()), "missing {column}");
        }
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        // Re-initialising an up to date database is a no-op
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
