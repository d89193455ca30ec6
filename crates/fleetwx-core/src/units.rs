//! Unit conversion utilities
//!
//! Weather values are stored in standard units (Kelvin, m/s) and converted
//! here when they are presented.

pub const ABSOLUTE_ZERO_C: f64 = -273.15;

const MPS_TO_MPH: f64 = 2.236_936;

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin + ABSOLUTE_ZERO_C
}

pub fn kelvin_to_fahrenheit(kelvin: f64) -> f64 {
    kelvin_to_celsius(kelvin) * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_kelvin(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0 - ABSOLUTE_ZERO_C
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

/// Eight-point compass label for a wind direction in degrees
pub fn compass_direction(degrees: f64) -> &'static str {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let normalized = degrees.rem_euclid(360.0);
    let index = ((normalized / 45.0).round() as usize) % 8;
    DIRECTIONS[index]
}
