//! The compound natural key that addresses every stored grid artifact.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base time of a forecast, or the explicit "not applicable" marker of an
/// analysis/observation.
///
/// Serialized as `null` when not applicable. `NotApplicable` is a value of
/// its own and sorts before every forecast base time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<DateTime<Utc>>", into = "Option<DateTime<Utc>>")]
pub enum BaseTime {
    NotApplicable,
    At(DateTime<Utc>),
}

impl BaseTime {
    pub fn as_option(&self) -> Option<DateTime<Utc>> {
        match self {
            BaseTime::NotApplicable => None,
            BaseTime::At(t) => Some(*t),
        }
    }

    pub fn is_forecast(&self) -> bool {
        matches!(self, BaseTime::At(_))
    }
}

impl From<Option<DateTime<Utc>>> for BaseTime {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(BaseTime::NotApplicable, BaseTime::At)
    }
}

impl From<BaseTime> for Option<DateTime<Utc>> {
    fn from(value: BaseTime) -> Self {
        value.as_option()
    }
}

/// Ensemble member number, or the explicit "deterministic" marker.
///
/// Serialized as `null` when deterministic. `Deterministic` is distinct from
/// member 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Ensemble {
    Deterministic,
    Member(u32),
}

impl Ensemble {
    pub fn as_option(&self) -> Option<u32> {
        match self {
            Ensemble::Deterministic => None,
            Ensemble::Member(m) => Some(*m),
        }
    }
}

impl From<Option<u32>> for Ensemble {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Ensemble::Deterministic, Ensemble::Member)
    }
}

impl From<Ensemble> for Option<u32> {
    fn from(value: Ensemble) -> Self {
        value.as_option()
    }
}

/// Compound key: unique per record kind within a domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridKey {
    pub domain: String,
    pub product: String,
    pub valid_time: DateTime<Utc>,
    pub base_time: BaseTime,
    pub ensemble: Ensemble,
}

impl GridKey {
    /// Key of an analysis/observation field (no base time, no ensemble).
    pub fn analysis(
        domain: impl Into<String>,
        product: impl Into<String>,
        valid_time: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            product: product.into(),
            valid_time,
            base_time: BaseTime::NotApplicable,
            ensemble: Ensemble::Deterministic,
        }
    }

    /// Key of a forecast field.
    pub fn forecast(
        domain: impl Into<String>,
        product: impl Into<String>,
        valid_time: DateTime<Utc>,
        base_time: DateTime<Utc>,
        ensemble: Option<u32>,
    ) -> Self {
        Self {
            domain: domain.into(),
            product: product.into(),
            valid_time,
            base_time: BaseTime::At(base_time),
            ensemble: ensemble.into(),
        }
    }

    pub fn with_ensemble(mut self, member: u32) -> Self {
        self.ensemble = Ensemble::Member(member);
        self
    }

    /// Forecast lead time, absent for analyses.
    pub fn lead_time(&self) -> Option<chrono::Duration> {
        self.base_time.as_option().map(|b| self.valid_time - b)
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.domain,
            self.product,
            self.valid_time.format("%Y-%m-%dT%H:%M:%SZ")
        )?;
        match self.base_time {
            BaseTime::NotApplicable => write!(f, "/-")?,
            BaseTime::At(t) => write!(f, "/{}", t.format("%Y-%m-%dT%H:%M:%SZ"))?,
        }
        match self.ensemble {
            Ensemble::Deterministic => write!(f, "/-"),
            Ensemble::Member(m) => write!(f, "/{}", m),
        }
    }
}

/// Kind of stored artifact. Each kind lives in its own per-domain collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Rain,
    State,
    Params,
    Stats,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Rain,
        RecordKind::State,
        RecordKind::Params,
        RecordKind::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Rain => "rain",
            RecordKind::State => "state",
            RecordKind::Params => "params",
            RecordKind::Stats => "stats",
        }
    }

    /// Rain and state records carry a binary payload in the blob store.
    pub fn carries_blob(&self) -> bool {
        matches!(self, RecordKind::Rain | RecordKind::State)
    }

    /// Per-domain collection name, e.g. `AKL.rain`.
    pub fn collection(&self, domain: &str) -> String {
        format!("{}.{}", domain, self.as_str())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rain" => Ok(RecordKind::Rain),
            "state" => Ok(RecordKind::State),
            "params" => Ok(RecordKind::Params),
            "stats" => Ok(RecordKind::Stats),
            other => Err(format!("unknown record kind '{}'", other)),
        }
    }
}

/// A timestamp as supplied by a caller, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    Zoned(DateTime<FixedOffset>),
    Text(String),
}

impl From<DateTime<Utc>> for RawTime {
    fn from(value: DateTime<Utc>) -> Self {
        RawTime::Zoned(value.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for RawTime {
    fn from(value: DateTime<FixedOffset>) -> Self {
        RawTime::Zoned(value)
    }
}

impl From<&str> for RawTime {
    fn from(value: &str) -> Self {
        RawTime::Text(value.to_string())
    }
}

/// An unvalidated key as it arrives from callers, files or the command line.
///
/// Every field is optional here; the key indexer decides what is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGridKey {
    pub domain: Option<String>,
    pub product: Option<String>,
    pub valid_time: Option<RawTime>,
    pub base_time: Option<RawTime>,
    pub ensemble: Option<i64>,
}

impl From<GridKey> for RawGridKey {
    fn from(key: GridKey) -> Self {
        Self {
            domain: Some(key.domain),
            product: Some(key.product),
            valid_time: Some(key.valid_time.into()),
            base_time: key.base_time.as_option().map(RawTime::from),
            ensemble: key.ensemble.as_option().map(i64::from),
        }
    }
}

impl From<&GridKey> for RawGridKey {
    fn from(key: &GridKey) -> Self {
        key.clone().into()
    }
}
