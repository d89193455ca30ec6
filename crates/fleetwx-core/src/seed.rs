//! Facility seed data
//!
//! The fleet is fixed for the lifetime of the process. It ships bundled with
//! the crate and can be replaced by a JSON file of the same shape.

use crate::types::{FacilityId, FacilityRecord};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

const BUNDLED_FACILITIES: &str = include_str!("../data/facilities.json");

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Invalid facility data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate facility id: {0}")]
    DuplicateId(FacilityId),

    #[error("Facility with empty id: {0}")]
    EmptyId(String),
}

pub type SeedResult<T> = Result<T, SeedError>;

/// The bundled fleet
pub fn seed_facilities() -> SeedResult<Vec<FacilityRecord>> {
    parse_facilities(BUNDLED_FACILITIES)
}

/// Load a fleet from a JSON file
pub fn load_facilities<P: AsRef<Path>>(path: P) -> SeedResult<Vec<FacilityRecord>> {
    let s = fs::read_to_string(path)?;
    parse_facilities(&s)
}

/// Parse a JSON array of facility records and check identity.
///
/// Records with invalid coordinates are kept; the clustering engine drops
/// and reports them.
pub fn parse_facilities(json: &str) -> SeedResult<Vec<FacilityRecord>> {
    let records: Vec<FacilityRecord> = serde_json::from_str(json)?;

    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if record.id.as_str().trim().is_empty() {
            return Err(SeedError::EmptyId(record.name.clone()));
        }
        if !seen.insert(record.id.clone()) {
            return Err(SeedError::DuplicateId(record.id.clone()));
        }
        if !record.coordinate.is_valid() {
            tracing::warn!(
                facility = %record.id,
                latitude = record.coordinate.latitude,
                longitude = record.coordinate.longitude,
                "facility has invalid coordinates"
            );
        }
    }

    Ok(records)
}
