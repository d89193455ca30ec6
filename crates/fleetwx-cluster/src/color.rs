//! Heat-map colouring of point markers

use crate::ClusterError;
use fleetwx_core::{kelvin_to_fahrenheit, mps_to_mph, WeatherSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let channel = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
        Rgb::new(
            channel(self.r, other.r),
            channel(self.g, other.g),
            channel(self.b, other.b),
        )
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = ClusterError;

    /// Parse `#rrggbb` or `#rgb`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClusterError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let byte = |h: &str| u8::from_str_radix(h, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Rgb::new(byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?)),
            3 => {
                let nibble = |i: usize| byte(&hex[i..i + 1]).map(|v| v * 17);
                Ok(Rgb::new(nibble(0)?, nibble(1)?, nibble(2)?))
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Rgb {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Default marker colour outside heat-map mode
pub const MARKER_COLOR: Rgb = Rgb::new(0xff, 0x00, 0x00);

/// Three-stop linear colour scale (cool, neutral, hot), clamped at both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScaleParts")]
pub struct ColorScale {
    stops: [f64; 3],
    colors: [Rgb; 3],
}

#[derive(Deserialize)]
struct ScaleParts {
    stops: [f64; 3],
    colors: [Rgb; 3],
}

impl TryFrom<ScaleParts> for ColorScale {
    type Error = ClusterError;

    fn try_from(parts: ScaleParts) -> Result<Self, Self::Error> {
        ColorScale::new(parts.stops, parts.colors)
    }
}

impl Default for ColorScale {
    /// 60F / 75F / 90F, green to yellow to red
    fn default() -> Self {
        Self {
            stops: [60.0, 75.0, 90.0],
            colors: [
                Rgb::new(0x00, 0xff, 0x00),
                Rgb::new(0xff, 0xff, 0x00),
                Rgb::new(0xff, 0x00, 0x00),
            ],
        }
    }
}

impl ColorScale {
    /// Stops must be finite and strictly increasing
    pub fn new(stops: [f64; 3], colors: [Rgb; 3]) -> Result<Self, ClusterError> {
        if !stops.iter().all(|s| s.is_finite()) || !(stops[0] < stops[1] && stops[1] < stops[2]) {
            return Err(ClusterError::InvalidOptions(format!(
                "color stops must be finite and strictly increasing, got {stops:?}"
            )));
        }
        Ok(Self { stops, colors })
    }

    pub fn colors(&self) -> [Rgb; 3] {
        self.colors
    }

    pub fn color(&self, value: f64) -> Rgb {
        let [low, mid, high] = self.stops;
        if value.is_nan() {
            return self.colors[1];
        }
        if value <= low {
            return self.colors[0];
        }
        if value >= high {
            return self.colors[2];
        }
        if value <= mid {
            self.colors[0].lerp(self.colors[1], (value - low) / (mid - low))
        } else {
            self.colors[1].lerp(self.colors[2], (value - mid) / (high - mid))
        }
    }
}

/// Marker display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Plain,
    HeatMap,
}

/// Weather attribute driving the heat map, in presentation units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatAttribute {
    /// Fahrenheit
    #[default]
    Temperature,
    /// Fahrenheit
    FeelsLike,
    /// Percent
    Humidity,
    /// mph
    WindSpeed,
    UvIndex,
}

impl HeatAttribute {
    /// The attribute's value, or None when the snapshot has no real data for it
    pub fn value(&self, weather: &WeatherSnapshot) -> Option<f64> {
        if weather.is_placeholder() {
            return None;
        }
        match self {
            HeatAttribute::Temperature => Some(kelvin_to_fahrenheit(weather.temperature_k)),
            HeatAttribute::FeelsLike => Some(kelvin_to_fahrenheit(weather.feels_like_k)),
            HeatAttribute::Humidity => Some(weather.humidity),
            HeatAttribute::WindSpeed => Some(mps_to_mph(weather.wind_speed_mps)),
            HeatAttribute::UvIndex => weather.uv_index,
        }
    }
}

impl FromStr for HeatAttribute {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" | "temp" => Ok(Self::Temperature),
            "feels_like" => Ok(Self::FeelsLike),
            "humidity" => Ok(Self::Humidity),
            "wind_speed" | "wind" => Ok(Self::WindSpeed),
            "uv_index" | "uvi" => Ok(Self::UvIndex),
            other => Err(ClusterError::InvalidOptions(format!(
                "unknown heat map attribute: {other}"
            ))),
        }
    }
}

/// Fill colour for a point marker
pub fn point_fill(
    weather: &WeatherSnapshot,
    mode: DisplayMode,
    scale: &ColorScale,
    attribute: HeatAttribute,
) -> Rgb {
    match mode {
        DisplayMode::Plain => MARKER_COLOR,
        DisplayMode::HeatMap => attribute
            .value(weather)
            .map(|v| scale.color(v))
            .unwrap_or(MARKER_COLOR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetwx_core::fahrenheit_to_kelvin;

    #[test]
    fn test_scale_stops_and_clamp() {
        let scale = ColorScale::default();
        assert_eq!(scale.color(60.0).to_string(), "#00ff00");
        assert_eq!(scale.color(75.0).to_string(), "#ffff00");
        assert_eq!(scale.color(90.0).to_string(), "#ff0000");
        assert_eq!(scale.color(-40.0), scale.color(60.0));
        assert_eq!(scale.color(130.0), scale.color(90.0));
        assert_eq!(scale.color(f64::INFINITY), scale.color(90.0));
    }

    #[test]
    fn test_scale_interpolates() {
        let scale = ColorScale::default();
        // halfway between green and yellow
        assert_eq!(scale.color(67.5), Rgb::new(0x80, 0xff, 0x00));
        assert_eq!(scale.color(82.5), Rgb::new(0xff, 0x80, 0x00));
    }

    #[test]
    fn test_scale_rejects_unordered_stops() {
        let colors = ColorScale::default().colors();
        assert!(ColorScale::new([90.0, 75.0, 60.0], colors).is_err());
        assert!(ColorScale::new([60.0, 60.0, 90.0], colors).is_err());
        assert!(ColorScale::new([0.0, 0.5, 1.0], colors).is_ok());
    }

    #[test]
    fn test_scale_deserialize_validates() {
        let scale: ColorScale = serde_json::from_value(serde_json::json!({
            "stops": [20.0, 50.0, 80.0],
            "colors": ["#0000ff", "#ffffff", "#ff0000"]
        }))
        .unwrap();
        assert_eq!(scale.color(20.0), Rgb::new(0, 0, 0xff));

        let unordered = serde_json::from_value::<ColorScale>(serde_json::json!({
            "stops": [90.0, 75.0, 60.0],
            "colors": ["#00ff00", "#ffff00", "#ff0000"]
        }));
        assert!(unordered.is_err());

        let round_trip: ColorScale =
            serde_json::from_value(serde_json::to_value(ColorScale::default()).unwrap()).unwrap();
        assert_eq!(round_trip, ColorScale::default());
    }

    #[test]
    fn test_rgb_parsing() {
        assert_eq!("#F00".parse::<Rgb>().unwrap(), Rgb::new(255, 0, 0));
        assert_eq!("#00ff7f".parse::<Rgb>().unwrap(), Rgb::new(0, 255, 127));
        assert!("00ff00".parse::<Rgb>().is_err());
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("#gg0000".parse::<Rgb>().is_err());

        let json = serde_json::to_string(&Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(json, "\"#010203\"");
    }

    #[test]
    fn test_point_fill() {
        let hot = WeatherSnapshot {
            temperature_k: fahrenheit_to_kelvin(100.0),
            feels_like_k: fahrenheit_to_kelvin(104.0),
            humidity: 20.0,
            description: "clear sky".into(),
            observed_at: Some(Utc::now()),
            ..Default::default()
        };
        let scale = ColorScale::default();

        assert_eq!(
            point_fill(&hot, DisplayMode::Plain, &scale, HeatAttribute::Temperature),
            MARKER_COLOR
        );
        assert_eq!(
            point_fill(&hot, DisplayMode::HeatMap, &scale, HeatAttribute::Temperature),
            Rgb::new(0xff, 0x00, 0x00)
        );
        assert_eq!(
            point_fill(&hot, DisplayMode::HeatMap, &scale, HeatAttribute::Humidity),
            Rgb::new(0x00, 0xff, 0x00)
        );
        // no UV reading falls back to the plain colour
        assert_eq!(
            point_fill(&hot, DisplayMode::HeatMap, &scale, HeatAttribute::UvIndex),
            MARKER_COLOR
        );
        assert_eq!(
            point_fill(
                &WeatherSnapshot::default(),
                DisplayMode::HeatMap,
                &scale,
                HeatAttribute::Temperature
            ),
            MARKER_COLOR
        );
    }
}
