//! Station metadata.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::columns::{SampleColumn, SampleColumns};

/// Station hardware family.
///
/// Determines which columns a station can ever report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum HardwareType {
    /// Davis Vantage Pro2 / Vue.
    Davis,
    /// Fine Offset WH1080 and compatibles.
    FineOffset,
    /// Anything else.
    #[default]
    Generic,
}

impl HardwareType {
    /// Map a hardware code as published by the server.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "DAVIS" => HardwareType::Davis,
            "FOWH1080" => HardwareType::FineOffset,
            _ => HardwareType::Generic,
        }
    }

    /// Code stored in the cache.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            HardwareType::Davis => "DAVIS",
            HardwareType::FineOffset => "FOWH1080",
            HardwareType::Generic => "GENERIC",
        }
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Station location.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    pub altitude: f64,
}

/// One configured extra sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtraSensor {
    pub column: SampleColumn,
    /// User-facing name, e.g. "Vegetable garden".
    pub name: String,
    pub enabled: bool,
}

/// Everything known about a station.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StationInfo {
    /// Station data URL. This is the station's identity in the cache.
    pub url: String,
    /// Short station code, e.g. `sb`.
    pub code: String,
    pub title: String,
    pub description: String,
    pub hardware: HardwareType,
    /// Sample interval in seconds.
    pub sample_interval: u32,
    pub coordinates: Option<Coordinates>,
    pub has_solar: bool,
    pub is_wireless: bool,
    pub davis_broadcast_id: Option<i64>,
    pub archived: bool,
    #[cfg_attr(feature = "serde", serde(default, with = "time::serde::rfc3339::option"))]
    pub archived_time: Option<OffsetDateTime>,
    pub archived_message: Option<String>,
    pub extra_sensors: Vec<ExtraSensor>,
}

impl StationInfo {
    /// Default sample interval used before metadata has been fetched.
    pub const DEFAULT_SAMPLE_INTERVAL: u32 = 300;

    /// Minimal record for a station nothing is known about yet.
    #[must_use]
    pub fn new(url: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            url: url.into(),
            title: code.clone(),
            code,
            description: String::new(),
            hardware: HardwareType::Generic,
            sample_interval: Self::DEFAULT_SAMPLE_INTERVAL,
            coordinates: None,
            has_solar: false,
            is_wireless: false,
            davis_broadcast_id: None,
            archived: false,
            archived_time: None,
            archived_message: None,
            extra_sensors: Vec::new(),
        }
    }

    /// Columns this station's hardware can report.
    ///
    /// Non-Davis stations only carry the basic set. Solar columns need
    /// solar sensors, reception needs a wireless station, and extra-sensor
    /// columns need the sensor to be enabled.
    #[must_use]
    pub fn available_columns(&self) -> SampleColumns {
        SampleColumns::all().filter(|column| {
            if self.hardware != HardwareType::Davis {
                return !column.is_davis_only();
            }
            if column.requires_solar() {
                return self.has_solar;
            }
            if column.requires_wireless() {
                return self.is_wireless;
            }
            if column.sensor_key().is_some() {
                return self
                    .extra_sensors
                    .iter()
                    .any(|s| s.column == column && s.enabled);
            }
            true
        })
    }

    /// User-facing name of an extra sensor column, if configured.
    #[must_use]
    pub fn sensor_name(&self, column: SampleColumn) -> Option<&str> {
        self.extra_sensors
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.name.as_str())
    }
}

/// Rainfall totals published by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RainTotals {
    /// Day the `today` total covers.
    pub date: Date,
    pub today: f64,
    pub this_month: f64,
    pub this_year: f64,
}
