//! Parser for monthly `samples.dat` files.
//!
//! Each line holds one sample as whitespace-separated tokens:
//!
//! ```text
//! 2024-01-01 00:05:00  12.1 8.2 11.0 12.1 76 1016.2 21.0 45 0.0 1.2 3.4 270
//! ```
//!
//! The first two tokens are the UTC date and time. Twelve basic values
//! follow. Davis stations append a block of eleven more values, and stations
//! with extra sensors append seventeen after that. Each block is all or
//! nothing. `None`, `?` and empty tokens mean no value.

use time::macros::format_description;
use time::{Month, OffsetDateTime, PrimitiveDateTime};

use wxcache_types::{Sample, SampleColumn};

use crate::error::{Error, Result};

/// Columns of the basic block, in file order.
const BASIC_COLUMNS: [SampleColumn; 12] = [
    SampleColumn::Temperature,
    SampleColumn::DewPoint,
    SampleColumn::ApparentTemperature,
    SampleColumn::WindChill,
    SampleColumn::Humidity,
    SampleColumn::Pressure,
    SampleColumn::IndoorTemperature,
    SampleColumn::IndoorHumidity,
    SampleColumn::Rainfall,
    SampleColumn::AverageWindSpeed,
    SampleColumn::GustWindSpeed,
    SampleColumn::WindDirection,
];

/// Columns of the Davis block, in file order.
const DAVIS_COLUMNS: [SampleColumn; 11] = [
    SampleColumn::UvIndex,
    SampleColumn::SolarRadiation,
    SampleColumn::Reception,
    SampleColumn::HighTemperature,
    SampleColumn::LowTemperature,
    SampleColumn::HighRainRate,
    SampleColumn::GustWindDirection,
    SampleColumn::Evapotranspiration,
    SampleColumn::HighSolarRadiation,
    SampleColumn::HighUvIndex,
    SampleColumn::ForecastRuleId,
];

/// Columns of the extra sensor block, in file order.
const EXTRA_COLUMNS: [SampleColumn; 17] = [
    SampleColumn::SoilMoisture1,
    SampleColumn::SoilMoisture2,
    SampleColumn::SoilMoisture3,
    SampleColumn::SoilMoisture4,
    SampleColumn::SoilTemperature1,
    SampleColumn::SoilTemperature2,
    SampleColumn::SoilTemperature3,
    SampleColumn::SoilTemperature4,
    SampleColumn::LeafWetness1,
    SampleColumn::LeafWetness2,
    SampleColumn::LeafTemperature1,
    SampleColumn::LeafTemperature2,
    SampleColumn::ExtraHumidity1,
    SampleColumn::ExtraHumidity2,
    SampleColumn::ExtraTemperature1,
    SampleColumn::ExtraTemperature2,
    SampleColumn::ExtraTemperature3,
];

const BASIC_FIELDS: usize = 2 + BASIC_COLUMNS.len();
const DAVIS_FIELDS: usize = BASIC_FIELDS + DAVIS_COLUMNS.len();
const EXTRA_FIELDS: usize = DAVIS_FIELDS + EXTRA_COLUMNS.len();

/// Parse a data file.
///
/// Solar readings are dropped when `has_solar` is false. `url` is only used
/// to locate errors.
pub fn parse_data_file(url: &str, text: &str, has_solar: bool) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let columns: Vec<SampleColumn> = match tokens.len() {
            BASIC_FIELDS => BASIC_COLUMNS.to_vec(),
            DAVIS_FIELDS => [&BASIC_COLUMNS[..], &DAVIS_COLUMNS[..]].concat(),
            EXTRA_FIELDS => [&BASIC_COLUMNS[..], &DAVIS_COLUMNS[..], &EXTRA_COLUMNS[..]].concat(),
            n => {
                return Err(Error::parse_line(
                    url,
                    line_number,
                    format!(
                        "expected {}, {} or {} fields, found {}",
                        BASIC_FIELDS, DAVIS_FIELDS, EXTRA_FIELDS, n
                    ),
                ));
            }
        };

        let timestamp = parse_line_timestamp(tokens[0], tokens[1])
            .ok_or_else(|| {
                Error::parse_line(
                    url,
                    line_number,
                    format!("invalid timestamp '{} {}'", tokens[0], tokens[1]),
                )
            })?
            .unix_timestamp();

        let mut sample = Sample::new(timestamp);
        for (column, token) in columns.iter().zip(&tokens[2..]) {
            let value = parse_value(token).map_err(|_| {
                Error::parse_line(
                    url,
                    line_number,
                    format!("invalid value '{}' for {}", token, column),
                )
            })?;
            if column.requires_solar() && !has_solar {
                continue;
            }
            sample.set(*column, value);
        }

        samples.push(sample);
    }

    Ok(samples)
}

fn parse_line_timestamp(date: &str, time: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(&format!("{} {}", date, time), format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

fn parse_value(token: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    match token {
        "None" | "?" | "" => Ok(None),
        _ => token.parse().map(Some),
    }
}

/// How much of its month a data file covers without gaps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Completeness {
    /// Gap-free from the first instant of the month to the last.
    pub is_complete: bool,
    /// End of the gap-free run that starts at the month start.
    pub start_contiguous_to: Option<i64>,
    /// Start of the gap-free run that reaches the month end.
    pub end_contiguous_from: Option<i64>,
}

/// Work out how much of the month starting at `(year, month)` the samples
/// cover.
///
/// Two samples are contiguous when they are at most one and a half sample
/// intervals apart. The month start and end count as samples for this
/// purpose. `samples` must be sorted by timestamp.
pub fn detect_completeness(samples: &[Sample], year: i32, month: Month, interval: u32) -> Completeness {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Completeness::default();
    };
    let (Some(month_start), Some(month_end)) = (month_start(year, month), next_month_start(year, month)) else {
        return Completeness::default();
    };

    let threshold = i64::from(interval) * 3 / 2;
    let contiguous = |a: i64, b: i64| b - a <= threshold;

    let start_contiguous_to = contiguous(month_start, first.timestamp).then(|| {
        samples
            .windows(2)
            .find(|pair| !contiguous(pair[0].timestamp, pair[1].timestamp))
            .map_or(last.timestamp, |pair| pair[0].timestamp)
    });

    let end_contiguous_from = contiguous(last.timestamp, month_end).then(|| {
        samples
            .windows(2)
            .rev()
            .find(|pair| !contiguous(pair[0].timestamp, pair[1].timestamp))
            .map_or(first.timestamp, |pair| pair[1].timestamp)
    });

    Completeness {
        is_complete: start_contiguous_to == Some(last.timestamp) && end_contiguous_from.is_some(),
        start_contiguous_to,
        end_contiguous_from,
    }
}

/// First instant of a UTC month, in unix seconds.
pub fn month_start(year: i32, month: Month) -> Option<i64> {
    time::Date::from_calendar_date(year, month, 1)
        .ok()
        .map(|d| d.midnight().assume_utc().unix_timestamp())
}

/// First instant of the following UTC month, in unix seconds.
pub fn next_month_start(year: i32, month: Month) -> Option<i64> {
    let year = if month == Month::December { year + 1 } else { year };
    month_start(year, month.next())
}
