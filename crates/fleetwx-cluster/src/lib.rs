//! Spatial clustering of facility markers
//!
//! Groups geo-located points into cluster and single-point markers for a
//! viewport, answers marker clicks and hovers, and colours point markers for
//! the heat-map display mode.

pub mod color;
pub mod index;
pub mod interaction;
pub mod projection;

pub use color::*;
pub use index::*;
pub use interaction::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Unknown cluster id: {0}")]
    UnknownCluster(ClusterId),

    #[error("Invalid cluster options: {0}")]
    InvalidOptions(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("Invalid color: {0}")]
    InvalidColor(String),
}
