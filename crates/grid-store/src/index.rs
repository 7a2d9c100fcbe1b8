//! Key normalization, query predicates and the compound index schema.
//!
//! Absence means two different things here. In a stored [`GridKey`] an
//! absent base time or ensemble member is a value of its own
//! ([`BaseTime::NotApplicable`], [`Ensemble::Deterministic`]). In a partial
//! key passed to [`build_query`] an absent field means "any value". Use
//! [`GridQuery::analyses_only`] or [`GridQuery::deterministic_only`] to match
//! the absent value itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use rainfields_common::time::canonical;
use rainfields_common::{
    parse_utc, BaseTime, Ensemble, GridError, GridKey, GridResult, RawGridKey, RawTime, TimeRange,
};

/// Validate and canonicalize a caller-supplied key.
///
/// `domain`, `product` and `valid_time` are mandatory. Timestamps are
/// converted to UTC and truncated to whole seconds. The order of base time
/// and valid time is not checked.
pub fn normalize(raw: impl Into<RawGridKey>) -> GridResult<GridKey> {
    let raw = raw.into();

    let domain = required_identifier("domain", raw.domain)?;
    let product = required_identifier("product", raw.product)?;
    let valid_time = match raw.valid_time {
        Some(t) => to_utc("valid_time", t)?,
        None => return Err(GridError::InvalidKey("missing valid_time".to_string())),
    };
    let base_time = raw
        .base_time
        .map(|t| to_utc("base_time", t))
        .transpose()?
        .into();
    let ensemble = raw.ensemble.map(to_member).transpose()?.into();

    Ok(GridKey {
        domain,
        product,
        valid_time,
        base_time,
        ensemble,
    })
}

/// Build a query predicate from any subset of the key fields.
///
/// Fields left out match any value. An empty partial key matches every
/// record of the queried kind.
pub fn build_query(partial: impl Into<RawGridKey>) -> GridResult<GridQuery> {
    let partial = partial.into();

    let mut query = GridQuery {
        domain: partial.domain.map(|d| identifier("domain", d)).transpose()?,
        product: partial.product.map(|p| identifier("product", p)).transpose()?,
        ..GridQuery::default()
    };

    if let Some(t) = partial.valid_time {
        query.valid_time = TimeFilter::At(to_utc("valid_time", t)?);
    }
    if let Some(t) = partial.base_time {
        query.base_time = BaseTimeFilter::At(to_utc("base_time", t)?);
    }
    if let Some(e) = partial.ensemble {
        query.ensemble = EnsembleFilter::Member(to_member(e)?);
    }

    if query.domain.is_none() {
        warn!("Query without a domain matches records across every domain");
    }

    Ok(query)
}

fn required_identifier(field: &str, value: Option<String>) -> GridResult<String> {
    match value {
        Some(v) => identifier(field, v),
        None => Err(GridError::InvalidKey(format!("missing {}", field))),
    }
}

/// Domain and product codes are restricted to ASCII letters, digits and
/// '-', which keeps them clear of template separators and object paths.
pub(crate) fn identifier(field: &str, value: String) -> GridResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GridError::InvalidKey(format!("empty {}", field)));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(GridError::InvalidKey(format!(
            "{} '{}' contains invalid character '{}'",
            field, trimmed, bad
        )));
    }
    Ok(trimmed.to_string())
}

fn to_utc(field: &str, raw: RawTime) -> GridResult<DateTime<Utc>> {
    let utc = match raw {
        RawTime::Zoned(dt) => dt.with_timezone(&Utc),
        RawTime::Text(s) => parse_utc(&s)
            .map_err(|e| GridError::InvalidKey(format!("malformed {}: {}", field, e)))?,
    };
    Ok(canonical(utc))
}

fn to_member(raw: i64) -> GridResult<u32> {
    u32::try_from(raw)
        .map_err(|_| GridError::InvalidKey(format!("ensemble member {} out of range", raw)))
}

/// Filter on a timestamp field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFilter {
    #[default]
    Any,
    At(DateTime<Utc>),
    Within(TimeRange),
}

impl TimeFilter {
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        match self {
            TimeFilter::Any => true,
            TimeFilter::At(at) => at == t,
            TimeFilter::Within(range) => range.contains(t),
        }
    }
}

/// Filter on the base time, which may itself be "not applicable".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseTimeFilter {
    #[default]
    Any,
    NotApplicable,
    At(DateTime<Utc>),
    Within(TimeRange),
}

impl BaseTimeFilter {
    pub fn matches(&self, base: &BaseTime) -> bool {
        match (self, base) {
            (BaseTimeFilter::Any, _) => true,
            (BaseTimeFilter::NotApplicable, BaseTime::NotApplicable) => true,
            (BaseTimeFilter::At(at), BaseTime::At(t)) => at == t,
            (BaseTimeFilter::Within(range), BaseTime::At(t)) => range.contains(t),
            _ => false,
        }
    }
}

/// Filter on the ensemble member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsembleFilter {
    #[default]
    Any,
    Deterministic,
    Member(u32),
}

impl EnsembleFilter {
    pub fn matches(&self, ensemble: &Ensemble) -> bool {
        match (self, ensemble) {
            (EnsembleFilter::Any, _) => true,
            (EnsembleFilter::Deterministic, Ensemble::Deterministic) => true,
            (EnsembleFilter::Member(m), Ensemble::Member(e)) => m == e,
            _ => false,
        }
    }
}

/// Result ordering on valid time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A predicate over grid keys, as resolved by a document store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridQuery {
    pub domain: Option<String>,
    pub product: Option<String>,
    pub valid_time: TimeFilter,
    pub base_time: BaseTimeFilter,
    pub ensemble: EnsembleFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl GridQuery {
    /// Query matching every record of one product in a domain.
    pub fn product(domain: impl Into<String>, product: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
            product: Some(product.into()),
            ..Self::default()
        }
    }

    /// Restrict to valid times in an inclusive range.
    pub fn valid_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.valid_time = TimeFilter::Within(TimeRange::new(start, end));
        self
    }

    /// Restrict to forecasts with base times in an inclusive range.
    pub fn base_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.base_time = BaseTimeFilter::Within(TimeRange::new(start, end));
        self
    }

    /// Restrict to records without a base time.
    pub fn analyses_only(mut self) -> Self {
        self.base_time = BaseTimeFilter::NotApplicable;
        self
    }

    /// Restrict to records without an ensemble member.
    pub fn deterministic_only(mut self) -> Self {
        self.ensemble = EnsembleFilter::Deterministic;
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored key satisfies every specified field.
    pub fn matches(&self, key: &GridKey) -> bool {
        self.domain.as_ref().map_or(true, |d| d == &key.domain)
            && self.product.as_ref().map_or(true, |p| p == &key.product)
            && self.valid_time.matches(&key.valid_time)
            && self.base_time.matches(&key.base_time)
            && self.ensemble.matches(&key.ensemble)
    }

    /// Sort keys the way stores return them: valid time first, then the
    /// remaining key fields so ties are deterministic.
    pub fn compare(&self, a: &GridKey, b: &GridKey) -> std::cmp::Ordering {
        let by_time = a.valid_time.cmp(&b.valid_time);
        let by_time = match self.order {
            SortOrder::Ascending => by_time,
            SortOrder::Descending => by_time.reverse(),
        };
        by_time
            .then_with(|| a.domain.cmp(&b.domain))
            .then_with(|| a.product.cmp(&b.product))
            .then_with(|| a.base_time.cmp(&b.base_time))
            .then_with(|| a.ensemble.cmp(&b.ensemble))
    }
}

impl TryFrom<RawGridKey> for GridQuery {
    type Error = GridError;

    fn try_from(partial: RawGridKey) -> Result<Self, Self::Error> {
        build_query(partial)
    }
}

/// A key field that can take part in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyField {
    Domain,
    Product,
    ValidTime,
    BaseTime,
    Ensemble,
}

impl KeyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::Domain => "domain",
            KeyField::Product => "product",
            KeyField::ValidTime => "valid_time",
            KeyField::BaseTime => "base_time",
            KeyField::Ensemble => "ensemble",
        }
    }
}

/// An index the document store is asked to maintain on each kind collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub fields: &'static [KeyField],
    pub unique: bool,
}

/// Unique index on the full compound key.
pub const KEY_INDEX: IndexSpec = IndexSpec {
    name: "domain_product_valid_base_ensemble_idx",
    fields: &[
        KeyField::Domain,
        KeyField::Product,
        KeyField::ValidTime,
        KeyField::BaseTime,
        KeyField::Ensemble,
    ],
    unique: true,
};

/// Secondary index for valid-time range scans.
pub const TIME_INDEX: IndexSpec = IndexSpec {
    name: "domain_product_valid_idx",
    fields: &[KeyField::Domain, KeyField::Product, KeyField::ValidTime],
    unique: false,
};

/// Indexes every kind collection needs.
pub fn required_indexes() -> [IndexSpec; 2] {
    [KEY_INDEX, TIME_INDEX]
}
