//! Web Mercator projection into the unit square
//!
//! x grows eastward from 0 at -180°, y grows southward from 0 at the top of
//! the map. At zoom z the world is `extent * 2^z` pixels wide.

use std::f64::consts::PI;

/// Longitude (degrees) to projected x in [0, 1]
pub fn lng_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

/// Latitude (degrees) to projected y in [0, 1], clamped at the poles
pub fn lat_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    y.clamp(0.0, 1.0)
}

pub fn x_lng(x: f64) -> f64 {
    (x - 0.5) * 360.0
}

pub fn y_lat(y: f64) -> f64 {
    let y2 = (180.0 - y * 360.0) * PI / 180.0;
    360.0 * y2.exp().atan() / PI - 90.0
}

/// Size of the world in pixels at a zoom level
pub fn world_size_px(extent: f64, zoom: u8) -> f64 {
    extent * f64::from(1u32 << zoom)
}

/// Clustering radius in projected units for a pixel radius at a zoom level
pub fn radius_at_zoom(radius_px: f64, extent: f64, zoom: u8) -> f64 {
    radius_px / world_size_px(extent, zoom)
}
