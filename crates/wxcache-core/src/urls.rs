//! URL layout of the remote data server.
//!
//! ```text
//! <base>data/sysconfig.json
//! <base>data/<code>/samplerange.json
//! <base>data/<code>/rain_summary.json
//! <base>data/<code>/<year>/<month>/samples.dat
//! ```
//!
//! Months are not zero padded.

use time::{Month, OffsetDateTime, UtcOffset};

use crate::error::{Error, NetworkFailure, Result};

/// URLs for one station on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationUrls {
    base: String,
    code: String,
}

impl StationUrls {
    /// URLs for station `code` under `base_url`.
    ///
    /// The base URL must be http or https. A missing trailing slash is added
    /// and the station code is lowercased.
    pub fn new(base_url: &str, code: &str) -> Result<Self> {
        let base = normalize_base_url(base_url)?;
        let code = code.trim().to_lowercase();
        if code.is_empty() || code.contains('/') {
            return Err(Error::invalid_request(format!("invalid station code '{}'", code)));
        }
        Ok(Self { base, code })
    }

    /// Station code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Station data URL. This is the station's identity in the cache.
    pub fn station(&self) -> String {
        format!("{}data/{}/", self.base, self.code)
    }

    /// Server-wide station configuration document.
    pub fn sysconfig(&self) -> String {
        format!("{}data/sysconfig.json", self.base)
    }

    /// Oldest and latest sample timestamps.
    pub fn sample_range(&self) -> String {
        format!("{}samplerange.json", self.station())
    }

    /// Rainfall totals.
    pub fn rain_summary(&self) -> String {
        format!("{}rain_summary.json", self.station())
    }

    /// Samples for one month.
    pub fn data_file(&self, year: i32, month: Month) -> String {
        format!("{}{}/{}/samples.dat", self.station(), year, u8::from(month))
    }
}

/// Ensure a base URL is http(s) and ends with a slash.
pub fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(Error::network(
            trimmed,
            NetworkFailure::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                trimmed
            )),
        ));
    }

    let mut base = trimmed.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(base)
}

/// Every calendar month touched by `[start, end]`, oldest first.
pub fn months_between(start: OffsetDateTime, end: OffsetDateTime) -> Vec<(i32, Month)> {
    let start = start.to_offset(UtcOffset::UTC);
    let end = end.to_offset(UtcOffset::UTC);

    let mut months = Vec::new();
    if start > end {
        return months;
    }

    let (mut year, mut month) = (start.year(), start.month());
    let last = (end.year(), end.month());
    loop {
        months.push((year, month));
        if (year, month) == last {
            break;
        }
        if month == Month::December {
            year += 1;
        }
        month = month.next();
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_station_urls() {
        let urls = StationUrls::new("https://example.com/weather", "SB").unwrap();
        assert_eq!(urls.code(), "sb");
        assert_eq!(urls.station(), "https://example.com/weather/data/sb/");
        assert_eq!(urls.sysconfig(), "https://example.com/weather/data/sysconfig.json");
        assert_eq!(
            urls.sample_range(),
            "https://example.com/weather/data/sb/samplerange.json"
        );
        assert_eq!(
            urls.rain_summary(),
            "https://example.com/weather/data/sb/rain_summary.json"
        );
    }

    #[test]
    fn test_data_file_month_not_padded() {
        let urls = StationUrls::new("http://example.com/", "sb").unwrap();
        assert_eq!(
            urls.data_file(2020, Month::June),
            "http://example.com/data/sb/2020/6/samples.dat"
        );
        assert_eq!(
            urls.data_file(2020, Month::December),
            "http://example.com/data/sb/2020/12/samples.dat"
        );
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            StationUrls::new("ftp://example.com/", "sb"),
            Err(Error::Network {
                reason: NetworkFailure::InvalidUrl(_),
                ..
            })
        ));
        assert!(matches!(
            StationUrls::new("http://example.com/", ""),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_months_between_crosses_year() {
        let months = months_between(
            datetime!(2020-06-01 0:00 UTC),
            datetime!(2021-01-01 0:00 UTC),
        );
        assert_eq!(months.len(), 8);
        assert_eq!(months[0], (2020, Month::June));
        assert_eq!(months[6], (2020, Month::December));
        assert_eq!(months[7], (2021, Month::January));
    }

    #[test]
    fn test_months_between_single_and_empty() {
        let one = months_between(
            datetime!(2024-02-03 0:00 UTC),
            datetime!(2024-02-28 0:00 UTC),
        );
        assert_eq!(one, vec![(2024, Month::February)]);

        let none = months_between(
            datetime!(2024-03-01 0:00 UTC),
            datetime!(2024-02-01 0:00 UTC),
        );
        assert!(none.is_empty());
    }

    #[test]
    fn test_months_between_uses_utc() {
        // 2024-03-01 05:00 at +10:00 is still February in UTC
        let months = months_between(
            datetime!(2024-03-01 5:00 +10:00),
            datetime!(2024-03-02 0:00 UTC),
        );
        assert_eq!(months, vec![(2024, Month::February), (2024, Month::March)]);
    }
}
