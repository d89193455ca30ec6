//! Core data types for facilities and their weather

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable facility identifier, assigned once when the fleet is loaded
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacilityId(String);

impl FacilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FacilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FacilityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Coordinate validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("Latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("Longitude out of range: {0}")]
    LongitudeOutOfRange(f64),
}

/// A WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Validate and build a coordinate. Non-finite values are rejected by the range checks.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn is_valid(&self) -> bool {
        Self::new(self.latitude, self.longitude).is_ok()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4},{:.4})", self.latitude, self.longitude)
    }
}

/// A fixed physical location tracked by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FacilityRecord {
    pub id: FacilityId,
    pub name: String,
    pub state: String,
    /// City or location label
    pub city: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub address: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,

    #[serde(default)]
    pub weather: WeatherSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_updated_at: Option<DateTime<Utc>>,
}

fn default_kind() -> String {
    "Warehouse".to_string()
}

/// Weather condition as reported upstream (code, group, icon)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub code: u16,
    pub main: String,
    pub description: String,
    pub icon: String,
}

impl Condition {
    pub fn category(&self) -> ConditionCategory {
        ConditionCategory::classify(self.code, &self.description)
    }
}

/// Icon family used by the map and the detail cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionCategory {
    Storm,
    Rain,
    Snow,
    Atmosphere,
    Clear,
    Clouds,
    Unknown,
}

impl ConditionCategory {
    /// Classify by condition code, falling back to keywords in the description
    pub fn classify(code: u16, description: &str) -> Self {
        match code {
            200..=232 => return Self::Storm,
            300..=321 | 500..=531 => return Self::Rain,
            600..=622 => return Self::Snow,
            701..=781 => return Self::Atmosphere,
            800 => return Self::Clear,
            801..=804 => return Self::Clouds,
            _ => {}
        }

        let description = description.to_lowercase();
        if description.contains("thunder") {
            Self::Storm
        } else if description.contains("rain") || description.contains("drizzle") {
            Self::Rain
        } else if description.contains("snow") || description.contains("sleet") {
            Self::Snow
        } else if description.contains("cloud") {
            Self::Clouds
        } else if description.contains("clear") {
            Self::Clear
        } else {
            Self::Unknown
        }
    }
}

/// Hourly forecast entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlyForecast {
    pub timestamp: DateTime<Utc>,
    pub temperature_k: f64,
    pub condition: Condition,
}

/// Daily forecast entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyForecast {
    pub timestamp: DateTime<Utc>,
    pub temp_min_k: f64,
    pub temp_max_k: f64,
    pub temp_day_k: f64,
    pub condition: Condition,
}

/// Active weather alert issued for a location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherAlert {
    pub sender: String,
    pub event: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Current conditions plus optional forecast and alerts for one location.
///
/// Temperatures are Kelvin; conversion happens at presentation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherSnapshot {
    pub temperature_k: f64,
    pub feels_like_k: f64,
    /// Relative humidity, percent in [0, 100]
    pub humidity: f64,
    pub wind_speed_mps: f64,
    /// Wind direction, degrees in [0, 360)
    pub wind_deg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<f64>,
    pub description: String,
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub hourly: Vec<HourlyForecast>,
    #[serde(default)]
    pub daily: Vec<DailyForecast>,
    #[serde(default)]
    pub alerts: Vec<WeatherAlert>,
}

impl Default for WeatherSnapshot {
    fn default() -> Self {
        Self {
            temperature_k: 0.0,
            feels_like_k: 0.0,
            humidity: 0.0,
            wind_speed_mps: 0.0,
            wind_deg: 0.0,
            uv_index: None,
            description: String::new(),
            condition: Condition::default(),
            observed_at: None,
            hourly: Vec::new(),
            daily: Vec::new(),
            alerts: Vec::new(),
        }
    }
}

impl WeatherSnapshot {
    /// True for the placeholder snapshot carried before any fetch succeeded
    pub fn is_placeholder(&self) -> bool {
        self.observed_at.is_none() && self.temperature_k == 0.0 && self.description.is_empty()
    }
}
