//! Deterministic artifact names for blob-backed grid records.
//!
//! A template is a string with the tokens `$D` (domain), `$P` (product),
//! `$V{fmt}` (valid time), `$B{fmt}` (base time) and `$E` (ensemble member).
//! Time formats are strftime patterns applied in UTC; when the braces are
//! omitted `%Y-%m-%dT%H:%M:%S` is used. Absent base times and ensemble
//! members render as `None` so every segment stays in place.
//!
//! A template must use all five tokens and time formats that resolve to
//! whole seconds, otherwise two distinct keys could share one name.

use chrono::format::{Fixed, Item, Numeric, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rainfields_common::{BaseTime, Ensemble, GridError, GridKey, GridResult};

/// Template used for products without their own.
pub const DEFAULT_TEMPLATE: &str = "$D_$P_$V{%Y-%m-%dT%H:%M:%S}_$B{%Y-%m-%dT%H:%M:%S}_$E.nc";

/// Rendered in place of an absent base time or ensemble member.
pub const ABSENT: &str = "None";

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Domain,
    Product,
    ValidTime(String),
    BaseTime(String),
    Ensemble,
}

/// A parsed, validated naming template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    /// Parse a template, rejecting unknown tokens, bad or coarse time formats
    /// and templates that leave out a key field.
    pub fn parse(template: &str) -> GridResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let token = match chars.next() {
                Some((_, t)) => t,
                None => {
                    return Err(GridError::Template(format!(
                        "dangling '$' at position {} in '{}'",
                        pos, template
                    )))
                }
            };

            let segment = match token {
                'D' => Segment::Domain,
                'P' => Segment::Product,
                'E' => Segment::Ensemble,
                'V' | 'B' => {
                    let fmt = if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        let mut fmt = String::new();
                        loop {
                            match chars.next() {
                                Some((_, '}')) => break,
                                Some((_, ch)) => fmt.push(ch),
                                None => {
                                    return Err(GridError::Template(format!(
                                        "missing '}}' for '${}' in '{}'",
                                        token, template
                                    )))
                                }
                            }
                        }
                        validate_time_format(&fmt, token, template)?;
                        fmt
                    } else {
                        DEFAULT_TIME_FORMAT.to_string()
                    };

                    if token == 'V' {
                        Segment::ValidTime(fmt)
                    } else {
                        Segment::BaseTime(fmt)
                    }
                }
                other => {
                    return Err(GridError::Template(format!(
                        "unrecognized token '${}' at position {} in '{}'",
                        other, pos, template
                    )))
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let parsed = Self {
            source: template.to_string(),
            segments,
        };
        let missing = parsed.missing_fields();
        if !missing.is_empty() {
            return Err(GridError::Template(format!(
                "'{}' does not encode {}",
                template,
                missing.join(", ")
            )));
        }
        Ok(parsed)
    }

    /// Substitute the key fields into the template.
    pub fn generate_name(&self, key: &GridKey) -> String {
        let mut name = String::with_capacity(self.source.len() + 32);

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Domain => name.push_str(&key.domain),
                Segment::Product => name.push_str(&key.product),
                Segment::ValidTime(fmt) => push_time(&mut name, &key.valid_time, fmt),
                Segment::BaseTime(fmt) => match key.base_time {
                    BaseTime::At(t) => push_time(&mut name, &t, fmt),
                    BaseTime::NotApplicable => name.push_str(ABSENT),
                },
                Segment::Ensemble => match key.ensemble {
                    Ensemble::Member(m) => name.push_str(&format!("{:02}", m)),
                    Ensemble::Deterministic => name.push_str(ABSENT),
                },
            }
        }

        name
    }

    /// Key fields the segments do not encode.
    fn missing_fields(&self) -> Vec<&'static str> {
        let has = |pred: fn(&Segment) -> bool| self.segments.iter().any(pred);
        let mut missing = Vec::new();
        if !has(|s| matches!(s, Segment::Domain)) {
            missing.push("domain");
        }
        if !has(|s| matches!(s, Segment::Product)) {
            missing.push("product");
        }
        if !has(|s| matches!(s, Segment::ValidTime(_))) {
            missing.push("valid_time");
        }
        if !has(|s| matches!(s, Segment::BaseTime(_))) {
            missing.push("base_time");
        }
        if !has(|s| matches!(s, Segment::Ensemble)) {
            missing.push("ensemble");
        }
        missing
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for NamingTemplate {
    fn default() -> Self {
        let time = DEFAULT_TIME_FORMAT.to_string();
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            segments: vec![
                Segment::Domain,
                Segment::Literal("_".to_string()),
                Segment::Product,
                Segment::Literal("_".to_string()),
                Segment::ValidTime(time.clone()),
                Segment::Literal("_".to_string()),
                Segment::BaseTime(time),
                Segment::Literal("_".to_string()),
                Segment::Ensemble,
                Segment::Literal(".nc".to_string()),
            ],
        }
    }
}

impl FromStr for NamingTemplate {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NamingTemplate {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NamingTemplate> for String {
    fn from(value: NamingTemplate) -> Self {
        value.source
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn validate_time_format(fmt: &str, token: char, template: &str) -> GridResult<()> {
    if fmt.is_empty() {
        return Err(GridError::Template(format!(
            "empty time format for '${}' in '{}'",
            token, template
        )));
    }
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(GridError::Template(format!(
            "invalid time format '{}' for '${}' in '{}'",
            fmt, token, template
        )));
    }
    if !resolves_seconds(fmt) {
        return Err(GridError::Template(format!(
            "time format '{}' for '${}' in '{}' does not resolve to whole seconds",
            fmt, token, template
        )));
    }
    Ok(())
}

/// Whether a format pins down a UTC instant to the second: a Unix
/// timestamp, an RFC 3339/2822 stamp, or full-century year, day, hour,
/// minute and second fields.
fn resolves_seconds(fmt: &str) -> bool {
    let mut fields = Vec::new();
    let mut am_pm = false;

    for item in StrftimeItems::new(fmt) {
        match item {
            Item::Numeric(Numeric::Timestamp, _)
            | Item::Fixed(Fixed::RFC3339)
            | Item::Fixed(Fixed::RFC2822) => return true,
            Item::Numeric(numeric, _) => fields.push(numeric),
            Item::Fixed(Fixed::ShortMonthName) | Item::Fixed(Fixed::LongMonthName) => {
                fields.push(Numeric::Month)
            }
            Item::Fixed(Fixed::UpperAmPm) | Item::Fixed(Fixed::LowerAmPm) => am_pm = true,
            _ => {}
        }
    }

    let has = |numeric: Numeric| fields.contains(&numeric);
    let year = has(Numeric::Year) || (has(Numeric::YearDiv100) && has(Numeric::YearMod100));
    let day = (has(Numeric::Month) && has(Numeric::Day)) || has(Numeric::Ordinal);
    let hour = has(Numeric::Hour) || (has(Numeric::Hour12) && am_pm);

    year && day && hour && has(Numeric::Minute) && has(Numeric::Second)
}

fn push_time(name: &mut String, t: &DateTime<Utc>, fmt: &str) {
    use std::fmt::Write;
    // Formats were validated at parse time, so formatting cannot fail.
    let _ = write!(name, "{}", t.format(fmt));
}

/// Naming templates per product, resolved once at configuration load.
#[derive(Debug, Clone, Default)]
pub struct ProductTemplates {
    default: NamingTemplate,
    products: HashMap<String, NamingTemplate>,
}

impl ProductTemplates {
    pub fn new(default: NamingTemplate, products: HashMap<String, NamingTemplate>) -> Self {
        Self { default, products }
    }

    /// Build from raw template strings, failing on the first bad one.
    pub fn from_strings<'a, I>(templates: I) -> GridResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let products = templates
            .into_iter()
            .map(|(product, template)| {
                NamingTemplate::parse(template).map(|t| (product.to_string(), t))
            })
            .collect::<GridResult<HashMap<_, _>>>()?;
        Ok(Self::new(NamingTemplate::default(), products))
    }

    pub fn template_for(&self, product: &str) -> &NamingTemplate {
        self.products.get(product).unwrap_or(&self.default)
    }

    /// Artifact name of a key under its product's template.
    pub fn generate_name(&self, key: &GridKey) -> String {
        self.template_for(&key.product).generate_name(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_default_template_analysis_name() {
        let key = GridKey::analysis("AKL", "RATE", t(0));
        assert_eq!(
            NamingTemplate::default().generate_name(&key),
            "AKL_RATE_2024-01-01T00:00:00_None_None.nc"
        );
    }

    #[test]
    fn test_default_matches_parsed_default() {
        assert_eq!(
            NamingTemplate::parse(DEFAULT_TEMPLATE).unwrap(),
            NamingTemplate::default()
        );
    }

    #[test]
    fn test_forecast_name_with_member() {
        let key = GridKey::forecast("AKL", "FX", t(1), t(0), Some(3));
        assert_eq!(
            NamingTemplate::default().generate_name(&key),
            "AKL_FX_2024-01-01T01:00:00_2024-01-01T00:00:00_03.nc"
        );
    }

    #[test]
    fn test_custom_formats() {
        let template = NamingTemplate::parse("$D_$P_$V{%Y%m%dT%H%M%S}_$B{%Y%m%d%H}_$E.nc").unwrap();
        let key = GridKey::forecast("test", "fx", t(1), t(0), Some(1));
        assert_eq!(template.generate_name(&key), "test_fx_20240101T010000_2024010100_01.nc");
    }

    #[test]
    fn test_braces_optional() {
        let template = NamingTemplate::parse("$P-$D-$V-$B-$E").unwrap();
        let key = GridKey::analysis("AKL", "QPE", t(5));
        assert_eq!(template.generate_name(&key), "QPE-AKL-2024-01-01T05:00:00-None-None");
    }

    #[test]
    fn test_absent_fields_never_collide_with_present() {
        let template = NamingTemplate::default();
        let det = GridKey::forecast("AKL", "FX", t(1), t(0), None);
        let member0 = det.clone().with_ensemble(0);
        let analysis = GridKey::analysis("AKL", "FX", t(1));

        let names = [
            template.generate_name(&det),
            template.generate_name(&member0),
            template.generate_name(&analysis),
        ];
        assert_ne!(names[0], names[1]);
        assert_ne!(names[0], names[2]);
        assert_ne!(names[1], names[2]);
    }

    #[test]
    fn test_distinct_keys_distinct_names() {
        let template = NamingTemplate::default();
        let mut keys = Vec::new();
        for domain in ["AKL", "WLG"] {
            for product in ["RATE", "FX"] {
                for valid in 1..3 {
                    keys.push(GridKey::analysis(domain, product, t(valid)));
                    for member in [None, Some(0), Some(1), Some(10)] {
                        keys.push(GridKey::forecast(domain, product, t(valid), t(0), member));
                    }
                }
            }
        }

        let names: std::collections::HashSet<_> =
            keys.iter().map(|k| template.generate_name(k)).collect();
        assert_eq!(names.len(), keys.len());
    }

    #[test]
    fn test_unknown_token_rejected() {
        let err = NamingTemplate::parse("$N_$P_$V.nc").unwrap_err();
        assert!(matches!(err, GridError::Template(msg) if msg.contains("$N")));
    }

    #[test]
    fn test_malformed_templates_rejected() {
        assert!(NamingTemplate::parse("$D_$V{%Y%m%d").is_err());
        assert!(NamingTemplate::parse("$D_$V{}").is_err());
        assert!(NamingTemplate::parse("$D_$B{%Q}").is_err());
        assert!(NamingTemplate::parse("trailing$").is_err());
    }

    #[test]
    fn test_template_must_encode_every_field() {
        assert!(NamingTemplate::default().missing_fields().is_empty());

        let err = NamingTemplate::parse("$D_$P_$V{%Y%m%dT%H%M%S}.nc").unwrap_err();
        assert!(
            matches!(err, GridError::Template(ref msg) if msg.contains("base_time, ensemble")),
            "got {:?}",
            err
        );
        let err = NamingTemplate::parse("$D_$P_$V_$B.nc").unwrap_err();
        assert!(matches!(err, GridError::Template(ref msg) if msg.ends_with("ensemble")));
        assert!(NamingTemplate::parse("$P_$V_$B_$E.nc").is_err());
    }

    #[test]
    fn test_coarse_time_format_rejected() {
        for coarse in [
            "$D_$P_$V{%Y%m%d%H%M}_$B_$E.nc",
            "$D_$P_$V_$B{%Y%m%d%H}_$E.nc",
            "$D_$P_$V{%H:%M:%S}_$B_$E.nc",
            "$D_$P_$V{%y%m%d%H%M%S}_$B_$E.nc",
            "$D_$P_$V{%Y%m%d%I%M%S}_$B_$E.nc",
        ] {
            let err = NamingTemplate::parse(coarse).unwrap_err();
            assert!(
                matches!(err, GridError::Template(ref msg) if msg.contains("whole seconds")),
                "{} gave {:?}",
                coarse,
                err
            );
        }

        for fine in [
            "$D_$P_$V{%s}_$B{%s}_$E.nc",
            "$D_$P_$V{%+}_$B_$E.nc",
            "$D_$P_$V{%F %T}_$B_$E.nc",
            "$D_$P_$V{%Y%j%H%M%S}_$B_$E.nc",
            "$D_$P_$V{%d %b %Y %I:%M:%S %p}_$B_$E.nc",
            "$D_$P_$V{%Y%m%dT%H%M%S%.3f}_$B_$E.nc",
        ] {
            assert!(NamingTemplate::parse(fine).is_ok(), "{} rejected", fine);
        }
    }

    #[test]
    fn test_keys_a_few_seconds_apart_get_distinct_names() {
        let template = NamingTemplate::parse("$D_$P_$V{%Y%m%d%H%M%S}_$B{%s}_$E.nc").unwrap();
        let early = GridKey::analysis("AKL", "QPE", t(0));
        let late = GridKey::analysis("AKL", "QPE", t(0) + chrono::Duration::seconds(30));
        let m1 = GridKey::forecast("AKL", "QPE", t(1), t(0), Some(1));
        let m2 = GridKey::forecast("AKL", "QPE", t(1), t(0), Some(2));

        assert_ne!(template.generate_name(&early), template.generate_name(&late));
        assert_ne!(template.generate_name(&m1), template.generate_name(&m2));
    }

    #[test]
    fn test_serde_validates_on_load() {
        let ok: NamingTemplate = serde_json::from_str(r#""$D_$P_$V_$B_$E.nc""#).unwrap();
        assert_eq!(ok.as_str(), "$D_$P_$V_$B_$E.nc");
        assert!(serde_json::from_str::<NamingTemplate>(r#""$X.nc""#).is_err());
        assert!(serde_json::from_str::<NamingTemplate>(r#""$P_$V.nc""#).is_err());
    }

    #[test]
    fn test_product_templates() {
        let templates =
            ProductTemplates::from_strings([("QPE", "$D_$P_$V{%Y%m%d%H%M%S}_$B{%Y%m%d%H%M%S}_$E.nc")])
                .unwrap();
        let qpe = GridKey::analysis("AKL", "QPE", t(2));
        let rate = GridKey::analysis("AKL", "RATE", t(2));
        assert_eq!(templates.generate_name(&qpe), "AKL_QPE_20240101020000_None_None.nc");
        assert_eq!(
            templates.generate_name(&rate),
            "AKL_RATE_2024-01-01T02:00:00_None_None.nc"
        );

        assert!(ProductTemplates::from_strings([("BAD", "$Z")]).is_err());
        assert!(ProductTemplates::from_strings([("QPE", "$D_$P_$V{%Y%m%d%H%M}.nc")]).is_err());
    }
}
