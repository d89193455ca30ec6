//! Core data types, units, and fleet summaries for fleetwx
//!
//! This crate provides the facility and weather data model shared by the
//! clustering engine, the fetch pipeline and the HTTP surface.

pub mod seed;
pub mod summary;
pub mod thresholds;
pub mod types;
pub mod units;

pub use seed::*;
pub use summary::*;
pub use thresholds::*;
pub use types::*;
pub use units::*;
