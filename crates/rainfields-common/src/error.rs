//! Error types for rainfields grid storage.

use thiserror::Error;

/// Result type alias using GridError.
pub type GridResult<T> = Result<T, GridError>;

/// Primary error type for grid storage operations.
///
/// A lookup miss is not an error; lookups return `Option`.
#[derive(Debug, Error)]
pub enum GridError {
    // === Caller Errors ===
    #[error("Invalid grid key: {0}")]
    InvalidKey(String),

    #[error("Payload does not match record kind: {0}")]
    PayloadMismatch(String),

    // === Configuration Errors ===
    #[error("Invalid naming template: {0}")]
    Template(String),

    #[error("Domain {0} already exists with a different geometry")]
    DomainConflict(String),

    // === Concurrency Errors ===
    #[error("Concurrent write to {key} in {collection} could not be linearized")]
    DuplicateWriteRace { collection: String, key: String },

    // === Store Errors ===
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Blob referenced by metadata is missing: {0}")]
    BlobMissing(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GridError {
    /// Short stable code for logs and exit reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            GridError::InvalidKey(_) => "InvalidKey",
            GridError::PayloadMismatch(_) => "PayloadMismatch",
            GridError::Template(_) => "TemplateError",
            GridError::DomainConflict(_) => "DomainConflict",
            GridError::DuplicateWriteRace { .. } => "DuplicateWriteRace",
            GridError::StoreUnavailable(_) => "StoreUnavailable",
            GridError::PayloadTooLarge { .. } => "PayloadTooLarge",
            GridError::BlobMissing(_) => "BlobMissing",
            GridError::Serialization(_) => "Serialization",
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Nothing in the storage crates retries on its own; this is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::DuplicateWriteRace { .. } | GridError::StoreUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Serialization(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let race = GridError::DuplicateWriteRace {
            collection: "AKL.rain".to_string(),
            key: "AKL/RATE".to_string(),
        };
        assert!(race.is_retryable());
        assert!(GridError::StoreUnavailable("down".into()).is_retryable());
        assert!(!GridError::InvalidKey("no domain".into()).is_retryable());
        assert!(!GridError::PayloadTooLarge { size: 10, limit: 5 }.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GridError::Template("$X".into()).error_code(), "TemplateError");
        assert_eq!(
            GridError::BlobMissing("AKL.rain/x.nc".into()).error_code(),
            "BlobMissing"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let grid_err: GridError = err.into();
        assert!(matches!(grid_err, GridError::Serialization(_)));
    }
}
