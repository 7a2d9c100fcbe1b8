//! Summary statistics of a rain field, stored as `stats` records.

use serde::{Deserialize, Serialize};

use rainfields_common::{GridError, GridKey, GridResult};

use crate::record::Metadata;

/// Rain rate (mm/h) at or above which a cell counts as wet.
pub const WET_THRESHOLD: f64 = 1.0;

const DECIMALS: f64 = 1000.0;

/// Field statistics, rounded to three decimals.
///
/// Cells that are NaN or infinite (no-data) are ignored. A field without
/// any finite cell has all statistics at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub mean: f64,
    pub std_dev: f64,
    pub max: f64,
    /// Fraction of cells at or above [`WET_THRESHOLD`]
    pub wetted_area_ratio: f64,
    /// Seconds from base time to valid time; absent for analyses
    pub forecast_lead_time: Option<i64>,
    /// Number of finite cells the statistics were computed from
    pub cell_count: usize,
}

impl FieldStats {
    pub fn compute<T>(values: &[T], key: &GridKey) -> Self
    where
        T: Copy + Into<f64>,
    {
        let finite: Vec<f64> = values
            .iter()
            .map(|v| (*v).into())
            .filter(|v: &f64| v.is_finite())
            .collect();

        let forecast_lead_time = key.lead_time().map(|d| d.num_seconds());

        if finite.is_empty() {
            return Self {
                mean: 0.0,
                std_dev: 0.0,
                max: 0.0,
                wetted_area_ratio: 0.0,
                forecast_lead_time,
                cell_count: 0,
            };
        }

        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let wet = finite.iter().filter(|v| **v >= WET_THRESHOLD).count() as f64;

        Self {
            mean: round3(mean),
            std_dev: round3(variance.sqrt()),
            max: round3(max),
            wetted_area_ratio: round3(wet / n),
            forecast_lead_time,
            cell_count: finite.len(),
        }
    }

    /// Document form for a `stats` record.
    pub fn to_metadata(&self) -> GridResult<Metadata> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(GridError::Serialization(format!(
                "field statistics serialized to {}",
                other
            ))),
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> GridResult<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            metadata.clone(),
        ))?)
    }
}

fn round3(v: f64) -> f64 {
    (v * DECIMALS).round() / DECIMALS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_compute() {
        let valid = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let key = GridKey::forecast("AKL", "NWP", valid, valid - Duration::hours(6), None);
        let stats = FieldStats::compute(&[0.0f32, 0.5, 1.0, 4.5], &key);

        assert_eq!(stats.mean, 1.5);
        assert_eq!(stats.max, 4.5);
        assert_eq!(stats.wetted_area_ratio, 0.5);
        // population std of [0, .5, 1, 4.5] = sqrt(3.125)
        assert_eq!(stats.std_dev, 1.768);
        assert_eq!(stats.forecast_lead_time, Some(21_600));
        assert_eq!(stats.cell_count, 4);
    }

    #[test]
    fn test_ignores_no_data() {
        let key = GridKey::analysis("AKL", "RATE", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let stats = FieldStats::compute(&[f64::NAN, 2.0, f64::INFINITY, 2.0], &key);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.wetted_area_ratio, 1.0);
        assert_eq!(stats.cell_count, 2);
        assert_eq!(stats.forecast_lead_time, None);
    }

    #[test]
    fn test_empty_field() {
        let key = GridKey::analysis("AKL", "RATE", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let stats = FieldStats::compute::<f32>(&[], &key);
        assert_eq!(stats.cell_count, 0);
        assert_eq!(stats.mean, 0.0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let key = GridKey::analysis("AKL", "RATE", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let stats = FieldStats::compute(&[1.0f32, 3.0], &key);
        let metadata = stats.to_metadata().unwrap();
        assert_eq!(metadata["mean"], 2.0);
        assert!(metadata["forecast_lead_time"].is_null());
        assert_eq!(FieldStats::from_metadata(&metadata).unwrap(), stats);
    }
}
