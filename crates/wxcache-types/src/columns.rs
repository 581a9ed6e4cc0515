//! Sample columns and column sets.
//!
//! Every measurement a station can record is a variant of the closed
//! [`SampleColumn`] enum. Columns belong to one of two tiers:
//!
//! - [`ColumnTier::Standard`]: the core weather measurements every data file
//!   carries (temperature, wind, rain and the Davis-specific extras such as
//!   UV index or evapotranspiration).
//! - [`ColumnTier::Extra`]: the optional per-sensor columns (soil, leaf and
//!   additional temperature/humidity probes).
//!
//! [`SampleColumns`] is a fixed-size bitset over [`SampleColumn`] that keeps
//! the two tiers in separate words, so code that only cares about one tier can
//! test it cheaply.

use core::fmt;
use core::ops::{BitAnd, BitOr, Sub};
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Which tier a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColumnTier {
    /// Core measurements present in every data file.
    Standard,
    /// Optional extra-sensor measurements.
    Extra,
}

/// A single measurement column.
///
/// The declaration order is the storage and result order: standard columns
/// first, in data-file order, then the extra-sensor columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
#[repr(u8)]
pub enum SampleColumn {
    Temperature,
    DewPoint,
    ApparentTemperature,
    WindChill,
    Humidity,
    Pressure,
    IndoorTemperature,
    IndoorHumidity,
    Rainfall,
    AverageWindSpeed,
    GustWindSpeed,
    WindDirection,
    UvIndex,
    SolarRadiation,
    Reception,
    HighTemperature,
    LowTemperature,
    HighRainRate,
    GustWindDirection,
    Evapotranspiration,
    HighSolarRadiation,
    HighUvIndex,
    ForecastRuleId,
    SoilMoisture1,
    SoilMoisture2,
    SoilMoisture3,
    SoilMoisture4,
    SoilTemperature1,
    SoilTemperature2,
    SoilTemperature3,
    SoilTemperature4,
    LeafWetness1,
    LeafWetness2,
    LeafTemperature1,
    LeafTemperature2,
    ExtraHumidity1,
    ExtraHumidity2,
    ExtraTemperature1,
    ExtraTemperature2,
    ExtraTemperature3,
}

impl SampleColumn {
    /// Number of standard-tier columns.
    pub const STANDARD_COUNT: usize = 23;

    /// Total number of columns across both tiers.
    pub const COUNT: usize = 40;

    /// Every column, in storage order.
    pub const ALL: [SampleColumn; Self::COUNT] = [
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

    /// Position of this column in [`SampleColumn::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Tier this column belongs to.
    #[must_use]
    pub const fn tier(self) -> ColumnTier {
        if self.index() < Self::STANDARD_COUNT {
            ColumnTier::Standard
        } else {
            ColumnTier::Extra
        }
    }

    /// Bit for this column within its tier's word.
    #[must_use]
    pub const fn tier_bit(self) -> u32 {
        match self.tier() {
            ColumnTier::Standard => 1 << self.index(),
            ColumnTier::Extra => 1 << (self.index() - Self::STANDARD_COUNT),
        }
    }

    /// Storage name of the column. Matches the serde name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SampleColumn::Temperature => "temperature",
            SampleColumn::DewPoint => "dew_point",
            SampleColumn::ApparentTemperature => "apparent_temperature",
            SampleColumn::WindChill => "wind_chill",
            SampleColumn::Humidity => "humidity",
            SampleColumn::Pressure => "pressure",
            SampleColumn::IndoorTemperature => "indoor_temperature",
            SampleColumn::IndoorHumidity => "indoor_humidity",
            SampleColumn::Rainfall => "rainfall",
            SampleColumn::AverageWindSpeed => "average_wind_speed",
            SampleColumn::GustWindSpeed => "gust_wind_speed",
            SampleColumn::WindDirection => "wind_direction",
            SampleColumn::UvIndex => "uv_index",
            SampleColumn::SolarRadiation => "solar_radiation",
            SampleColumn::Reception => "reception",
            SampleColumn::HighTemperature => "high_temperature",
            SampleColumn::LowTemperature => "low_temperature",
            SampleColumn::HighRainRate => "high_rain_rate",
            SampleColumn::GustWindDirection => "gust_wind_direction",
            SampleColumn::Evapotranspiration => "evapotranspiration",
            SampleColumn::HighSolarRadiation => "high_solar_radiation",
            SampleColumn::HighUvIndex => "high_uv_index",
            SampleColumn::ForecastRuleId => "forecast_rule_id",
            SampleColumn::SoilMoisture1 => "soil_moisture1",
            SampleColumn::SoilMoisture2 => "soil_moisture2",
            SampleColumn::SoilMoisture3 => "soil_moisture3",
            SampleColumn::SoilMoisture4 => "soil_moisture4",
            SampleColumn::SoilTemperature1 => "soil_temperature1",
            SampleColumn::SoilTemperature2 => "soil_temperature2",
            SampleColumn::SoilTemperature3 => "soil_temperature3",
            SampleColumn::SoilTemperature4 => "soil_temperature4",
            SampleColumn::LeafWetness1 => "leaf_wetness1",
            SampleColumn::LeafWetness2 => "leaf_wetness2",
            SampleColumn::LeafTemperature1 => "leaf_temperature1",
            SampleColumn::LeafTemperature2 => "leaf_temperature2",
            SampleColumn::ExtraHumidity1 => "extra_humidity1",
            SampleColumn::ExtraHumidity2 => "extra_humidity2",
            SampleColumn::ExtraTemperature1 => "extra_temperature1",
            SampleColumn::ExtraTemperature2 => "extra_temperature2",
            SampleColumn::ExtraTemperature3 => "extra_temperature3",
        }
    }

    /// Accumulating quantities that may be summed across a group.
    ///
    /// Summing an intensity such as temperature is meaningless, so only
    /// these columns honour the sum and running-total aggregates.
    #[must_use]
    pub const fn is_summable(self) -> bool {
        matches!(
            self,
            SampleColumn::Rainfall | SampleColumn::Evapotranspiration
        )
    }

    /// Columns only reported by stations with solar and UV sensors.
    #[must_use]
    pub const fn requires_solar(self) -> bool {
        matches!(
            self,
            SampleColumn::UvIndex
                | SampleColumn::SolarRadiation
                | SampleColumn::HighSolarRadiation
                | SampleColumn::HighUvIndex
        )
    }

    /// Columns only reported by wireless stations.
    #[must_use]
    pub const fn requires_wireless(self) -> bool {
        matches!(self, SampleColumn::Reception)
    }

    /// Columns only Davis hardware records.
    ///
    /// Everything after wind direction is Davis-specific.
    #[must_use]
    pub const fn is_davis_only(self) -> bool {
        self.index() > SampleColumn::WindDirection.index()
    }

    /// Key used for this column in a station's sensor configuration,
    /// e.g. `leaf_wetness_1`. `None` for standard-tier columns.
    #[must_use]
    pub fn sensor_key(self) -> Option<String> {
        if self.tier() != ColumnTier::Extra {
            return None;
        }
        let name = self.name();
        let split = name.len() - 1;
        Some(format!("{}_{}", &name[..split], &name[split..]))
    }

    /// Look up an extra-tier column by its sensor configuration key.
    #[must_use]
    pub fn from_sensor_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.sensor_key().as_deref() == Some(key))
    }
}

impl fmt::Display for SampleColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleColumn {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::UnknownColumn(s.to_string()))
    }
}

/// A set of [`SampleColumn`]s, stored as one bit word per tier.
///
/// # Example
///
/// ```
/// use wxcache_types::{SampleColumn, SampleColumns};
///
/// let cols = SampleColumns::empty()
///     .with(SampleColumn::Temperature)
///     .with(SampleColumn::SoilMoisture1);
///
/// assert!(cols.contains(SampleColumn::Temperature));
/// assert_eq!(cols.len(), 2);
/// assert_eq!(cols.extra_bits(), 1);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampleColumns {
    standard: u32,
    extra: u32,
}

impl SampleColumns {
    const STANDARD_MASK: u32 = (1 << SampleColumn::STANDARD_COUNT) - 1;
    const EXTRA_MASK: u32 = (1 << (SampleColumn::COUNT - SampleColumn::STANDARD_COUNT)) - 1;

    /// The empty set. Used with an aggregate function for count-only plans.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            standard: 0,
            extra: 0,
        }
    }

    /// Every column in both tiers.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            standard: Self::STANDARD_MASK,
            extra: Self::EXTRA_MASK,
        }
    }

    /// Every standard-tier column.
    #[must_use]
    pub const fn all_standard() -> Self {
        Self {
            standard: Self::STANDARD_MASK,
            extra: 0,
        }
    }

    /// Every extra-tier column.
    #[must_use]
    pub const fn all_extra() -> Self {
        Self {
            standard: 0,
            extra: Self::EXTRA_MASK,
        }
    }

    /// Build a set from raw tier words. Unknown bits are dropped.
    #[must_use]
    pub const fn from_bits(standard: u32, extra: u32) -> Self {
        Self {
            standard: standard & Self::STANDARD_MASK,
            extra: extra & Self::EXTRA_MASK,
        }
    }

    /// Raw standard-tier word.
    #[must_use]
    pub const fn standard_bits(self) -> u32 {
        self.standard
    }

    /// Raw extra-tier word.
    #[must_use]
    pub const fn extra_bits(self) -> u32 {
        self.extra
    }

    /// Returns a copy of this set with `column` added.
    #[must_use]
    pub const fn with(mut self, column: SampleColumn) -> Self {
        match column.tier() {
            ColumnTier::Standard => self.standard |= column.tier_bit(),
            ColumnTier::Extra => self.extra |= column.tier_bit(),
        }
        self
    }

    /// Add a column.
    pub fn insert(&mut self, column: SampleColumn) {
        *self = self.with(column);
    }

    /// Remove a column.
    pub fn remove(&mut self, column: SampleColumn) {
        match column.tier() {
            ColumnTier::Standard => self.standard &= !column.tier_bit(),
            ColumnTier::Extra => self.extra &= !column.tier_bit(),
        }
    }

    /// Whether `column` is in the set.
    #[must_use]
    pub const fn contains(self, column: SampleColumn) -> bool {
        match column.tier() {
            ColumnTier::Standard => self.standard & column.tier_bit() != 0,
            ColumnTier::Extra => self.extra & column.tier_bit() != 0,
        }
    }

    /// Whether the set has no columns in either tier.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.standard == 0 && self.extra == 0
    }

    /// Whether the given tier has any columns set.
    #[must_use]
    pub const fn has_tier(self, tier: ColumnTier) -> bool {
        match tier {
            ColumnTier::Standard => self.standard != 0,
            ColumnTier::Extra => self.extra != 0,
        }
    }

    /// Number of columns in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        (self.standard.count_ones() + self.extra.count_ones()) as usize
    }

    /// Columns in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self {
            standard: self.standard & other.standard,
            extra: self.extra & other.extra,
        }
    }

    /// Columns in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            standard: self.standard | other.standard,
            extra: self.extra | other.extra,
        }
    }

    /// Columns in `self` but not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self {
            standard: self.standard & !other.standard,
            extra: self.extra & !other.extra,
        }
    }

    /// The subset of columns that can be summed.
    #[must_use]
    pub fn summable(self) -> Self {
        self.filter(SampleColumn::is_summable)
    }

    /// The subset of columns matching `predicate`.
    #[must_use]
    pub fn filter(self, predicate: impl Fn(SampleColumn) -> bool) -> Self {
        self.iter().filter(|c| predicate(*c)).collect()
    }

    /// Iterate columns in storage order.
    pub fn iter(self) -> impl Iterator<Item = SampleColumn> {
        SampleColumn::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl From<SampleColumn> for SampleColumns {
    fn from(column: SampleColumn) -> Self {
        Self::empty().with(column)
    }
}

impl FromIterator<SampleColumn> for SampleColumns {
    fn from_iter<I: IntoIterator<Item = SampleColumn>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, column| set.with(column))
    }
}

impl BitOr for SampleColumns {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOr<SampleColumn> for SampleColumns {
    type Output = Self;

    fn bitor(self, rhs: SampleColumn) -> Self {
        self.with(rhs)
    }
}

impl BitAnd for SampleColumns {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl Sub for SampleColumns {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

impl fmt::Display for SampleColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(SampleColumn::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
