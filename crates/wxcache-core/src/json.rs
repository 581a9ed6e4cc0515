//! Typed JSON documents published by the data server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use wxcache_types::{
    Coordinates, ExtraSensor, HardwareType, RainTotals, SampleColumn, StationInfo,
};

use crate::error::{Error, Result};

/// `sysconfig.json`: every station the server publishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysConfig {
    /// API level.
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(default)]
    pub stations: Vec<SysConfigStation>,
}

/// One station in `sysconfig.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysConfigStation {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub hw_type: HardwareTypeDoc,
    #[serde(default)]
    pub hw_config: HardwareConfigDoc,
    #[serde(default)]
    pub coordinates: CoordinatesDoc,
    /// Sample interval in seconds.
    #[serde(default)]
    pub interval: Option<u32>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archived: Option<ArchivedDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareTypeDoc {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfigDoc {
    #[serde(default)]
    pub has_solar_and_uv: bool,
    #[serde(default)]
    pub is_wireless: bool,
    #[serde(default)]
    pub broadcast_id: Option<i64>,
    /// Keyed by sensor name, e.g. `soil_moisture_1`.
    #[serde(default)]
    pub sensor_config: BTreeMap<String, SensorDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorDoc {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatesDoc {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchivedDoc {
    pub time: Option<String>,
    pub message: Option<String>,
}

impl SysConfig {
    /// Parse `sysconfig.json` fetched from `url`.
    pub fn parse(body: &str, url: &str) -> Result<Self> {
        parse_json(body, url)
    }

    /// Metadata for station `code`, matched case-insensitively.
    pub fn station_info(&self, station_url: &str, code: &str) -> Option<StationInfo> {
        let station = self
            .stations
            .iter()
            .find(|s| s.code.eq_ignore_ascii_case(code))?;
        Some(station.to_station_info(station_url))
    }
}

impl SysConfigStation {
    /// Convert to the cache's station record.
    ///
    /// Solar, wireless and extra sensor settings only apply to Davis
    /// hardware and are ignored for everything else.
    pub fn to_station_info(&self, station_url: &str) -> StationInfo {
        let mut info = StationInfo::new(station_url, self.code.to_lowercase());
        if !self.name.is_empty() {
            info.title = self.name.clone();
        }
        info.description = self.desc.clone();
        info.hardware = HardwareType::from_code(&self.hw_type.code);
        info.sample_interval = self
            .interval
            .filter(|i| *i > 0)
            .unwrap_or(StationInfo::DEFAULT_SAMPLE_INTERVAL);

        if let (Some(latitude), Some(longitude)) =
            (self.coordinates.latitude, self.coordinates.longitude)
        {
            info.coordinates = Some(Coordinates {
                latitude,
                longitude,
                altitude: self.coordinates.altitude.unwrap_or_default(),
            });
        }

        if info.hardware == HardwareType::Davis {
            info.has_solar = self.hw_config.has_solar_and_uv;
            info.is_wireless = self.hw_config.is_wireless;
            info.davis_broadcast_id = self.hw_config.broadcast_id;

            for (key, sensor) in &self.hw_config.sensor_config {
                let Some(column) = SampleColumn::from_sensor_key(key) else {
                    debug!("Ignoring unknown sensor {}", key);
                    continue;
                };
                info.extra_sensors.push(ExtraSensor {
                    column,
                    name: sensor
                        .name
                        .clone()
                        .unwrap_or_else(|| default_sensor_name(key)),
                    enabled: sensor.enabled,
                });
            }
        }

        info.archived = self.is_archived;
        if self.is_archived
            && let Some(archived) = &self.archived
        {
            info.archived_time = archived.time.as_deref().and_then(parse_timestamp);
            info.archived_message = archived.message.clone();
        }

        info
    }
}

/// `samplerange.json`: oldest and latest sample on the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRangeDoc {
    pub oldest: String,
    pub latest: String,
}

impl SampleRangeDoc {
    /// Parse `samplerange.json` fetched from `url` into `(oldest, latest)`.
    pub fn parse(body: &str, url: &str) -> Result<(OffsetDateTime, OffsetDateTime)> {
        let doc: SampleRangeDoc = parse_json(body, url)?;
        let oldest = parse_timestamp(&doc.oldest)
            .ok_or_else(|| Error::parse(url, format!("invalid oldest timestamp '{}'", doc.oldest)))?;
        let latest = parse_timestamp(&doc.latest)
            .ok_or_else(|| Error::parse(url, format!("invalid latest timestamp '{}'", doc.latest)))?;
        Ok((oldest, latest))
    }
}

/// `rain_summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainSummaryDoc {
    pub today: RainDayDoc,
    pub this_month: RainTotalDoc,
    pub this_year: RainTotalDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainDayDoc {
    pub start: String,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainTotalDoc {
    pub total: f64,
}

impl RainSummaryDoc {
    /// Parse `rain_summary.json` fetched from `url`.
    pub fn parse(body: &str, url: &str) -> Result<RainTotals> {
        let doc: RainSummaryDoc = parse_json(body, url)?;
        let start = parse_timestamp(&doc.today.start)
            .ok_or_else(|| Error::parse(url, format!("invalid start '{}'", doc.today.start)))?;
        Ok(RainTotals {
            date: start.date(),
            today: doc.today.total,
            this_month: doc.this_month.total,
            this_year: doc.this_year.total,
        })
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str, url: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        warn!("JSON parse error for {}: {}", url, e);
        Error::parse(url, e.to_string())
    })
}

/// Parse an ISO 8601 timestamp.
///
/// Accepts RFC 3339, and date-times without an offset (taken as UTC) with
/// either a `T` or a space separator.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(t) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(t);
    }

    let t_separated = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let space_separated = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(value, t_separated)
        .or_else(|_| PrimitiveDateTime::parse(value, space_separated))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// `leaf_wetness_1` becomes `Leaf Wetness 1`.
fn default_sensor_name(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
