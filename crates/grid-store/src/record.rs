//! Stored grid records and blob references.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use rainfields_common::{GridKey, RecordKind};

/// Kind-specific structured metadata carried by every record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Opaque handle to a payload in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored artifact: its key, the document fields and, once resolved,
/// the payload bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRecord {
    #[serde(flatten)]
    pub key: GridKey,
    pub kind: RecordKind,
    /// Derived blob name; set for blob-carrying kinds only
    pub artifact_name: Option<String>,
    pub payload_ref: Option<BlobRef>,
    pub metadata: Metadata,
    /// Changes on every write; used for optimistic replace
    pub revision: Uuid,
    pub written_at: DateTime<Utc>,
    /// Payload bytes, present only when explicitly loaded
    #[serde(skip)]
    pub payload: Option<Bytes>,
}

impl GridRecord {
    /// Collection this record belongs to, e.g. `AKL.rain`.
    pub fn collection(&self) -> String {
        self.kind.collection(&self.key.domain)
    }

    /// The same record without payload bytes.
    pub fn without_payload(mut self) -> Self {
        self.payload = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_document_shape() {
        let record = GridRecord {
            key: GridKey::analysis("AKL", "RATE", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            kind: RecordKind::Rain,
            artifact_name: Some("AKL_RATE_2024-01-01T00:00:00_None_None.nc".to_string()),
            payload_ref: Some(BlobRef("AKL.rain/AKL_RATE_2024-01-01T00:00:00_None_None.nc".into())),
            metadata: Metadata::new(),
            revision: Uuid::new_v4(),
            written_at: Utc::now(),
            payload: Some(Bytes::from_static(b"netcdf")),
        };

        let doc = serde_json::to_value(&record).unwrap();
        assert_eq!(doc["domain"], "AKL");
        assert_eq!(doc["kind"], "rain");
        assert!(doc["base_time"].is_null());
        assert!(doc["ensemble"].is_null());
        assert!(doc.get("payload").is_none());

        let back: GridRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back, record.clone().without_payload());
        assert_eq!(record.collection(), "AKL.rain");
    }
}
