//! Common types shared by the rainfields grid storage crates.

pub mod bbox;
pub mod domain;
pub mod error;
pub mod key;
pub mod time;

pub use bbox::BoundingBox;
pub use domain::{Crs, Domain, GridGeometry};
pub use error::{GridError, GridResult};
pub use key::{BaseTime, Ensemble, GridKey, RawGridKey, RawTime, RecordKind};
pub use time::{parse_utc, TimeParseError, TimeRange};
