//! Common test fixtures for rainfields tests.
//!
//! This module provides pre-defined domains, products and keys that
//! represent common scenarios in radar and nowcast storage.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rainfields_common::{Crs, Domain, GridGeometry, GridKey};

/// Common domain codes for testing.
pub mod domains {
    pub const AKL: &str = "AKL";
    pub const WLG: &str = "WLG";
    pub const CHC: &str = "CHC";
}

/// Common product codes for testing.
pub mod products {
    /// Radar rain rate analysis
    pub const RATE: &str = "RATE";
    /// Quantitative precipitation estimate
    pub const QPE: &str = "QPE";
    /// Nowcast ensemble
    pub const NOWCAST: &str = "NOWCAST";
    /// NWP forecast
    pub const NWP: &str = "NWP";
    pub const OTHER: &str = "OTHER";
}

/// A fixed reference time for tests (2024-01-01T00:00:00Z).
pub fn reference_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0)
        .single()
        .unwrap_or_default()
}

/// Reference time plus `minutes`.
pub fn minutes(minutes: i64) -> DateTime<Utc> {
    reference_time() + Duration::minutes(minutes)
}

/// Reference time plus `hours`.
pub fn hours(hours: i64) -> DateTime<Utc> {
    reference_time() + Duration::hours(hours)
}

/// Auckland radar domain: 2 km NZTM grid.
pub fn akl_domain() -> Domain {
    Domain {
        id: domains::AKL.to_string(),
        geometry: GridGeometry {
            start_x: 1_627_000.0,
            start_y: 5_854_000.0,
            cell_size: 2000.0,
            n_rows: 128,
            n_cols: 128,
        },
        crs: Crs::epsg("EPSG:2193"),
        description: Some("Auckland radar".to_string()),
    }
}

/// A small domain for tests that generate full fields.
pub fn small_domain(id: &str) -> Domain {
    Domain {
        id: id.to_string(),
        geometry: GridGeometry {
            start_x: 0.0,
            start_y: 0.0,
            cell_size: 1000.0,
            n_rows: 8,
            n_cols: 10,
        },
        crs: Crs::epsg("EPSG:2193"),
        description: None,
    }
}

/// Analysis key for AKL radar rain rate at the reference time plus `minutes`.
pub fn rain_key(minutes_after: i64) -> GridKey {
    GridKey::analysis(domains::AKL, products::RATE, minutes(minutes_after))
}

/// Nowcast ensemble member key with a base time at the reference time.
pub fn nowcast_key(lead_minutes: i64, member: u32) -> GridKey {
    GridKey::forecast(
        domains::AKL,
        products::NOWCAST,
        minutes(lead_minutes),
        reference_time(),
        Some(member),
    )
}

/// Metadata map from a JSON literal object.
pub fn metadata(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_time() {
        assert_eq!(reference_time().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(hours(3), minutes(180));
    }

    #[test]
    fn test_nowcast_key_lead_time() {
        assert_eq!(nowcast_key(30, 2).lead_time(), Some(Duration::minutes(30)));
        assert_eq!(rain_key(0).lead_time(), None);
    }
}
