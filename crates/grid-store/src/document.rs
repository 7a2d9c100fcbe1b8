//! Document store seam: compound-key metadata documents plus small named
//! documents for the global `domain` and `config` collections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use rainfields_common::{GridKey, GridResult, RecordKind};

use crate::index::{GridQuery, IndexSpec};
use crate::record::GridRecord;

/// Global collection of domain records.
pub const DOMAIN_COLLECTION: &str = "domain";

/// Global collection of configuration documents.
pub const CONFIG_COLLECTION: &str = "config";

/// Global collections whose names can only be written once.
pub const WRITE_ONCE_COLLECTIONS: &[&str] = &[DOMAIN_COLLECTION];

/// Outcome of a conditional document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The key already existed (insert) or its revision moved on (replace).
    Conflict,
}

/// Structured document storage with compound-key lookups.
///
/// Documents are grouped by record kind and addressed by their [`GridKey`];
/// the unique key index keeps one document per key and kind. Each call is
/// atomic for one document. Store failures surface as
/// `GridError::StoreUnavailable` and are never retried here.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Request creation of the given indexes on a kind's documents.
    async fn ensure_indexes(&self, kind: RecordKind, indexes: &[IndexSpec]) -> GridResult<()>;

    /// Exact-key lookup.
    async fn find_one(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>>;

    /// Insert a document for a key that does not exist yet.
    async fn insert(&self, record: &GridRecord) -> GridResult<WriteOutcome>;

    /// Replace the document for the record's key if its current revision is
    /// `expected`.
    async fn replace(&self, record: &GridRecord, expected: Uuid) -> GridResult<WriteOutcome>;

    /// Insert or overwrite unconditionally.
    async fn upsert(&self, record: &GridRecord) -> GridResult<()>;

    /// Lazily stream the documents matching a query in query order.
    ///
    /// Results are fetched `page_size` at a time; writes made while the
    /// stream is consumed may or may not be observed.
    fn find(
        &self,
        kind: RecordKind,
        query: GridQuery,
        page_size: usize,
    ) -> BoxStream<'_, GridResult<GridRecord>>;

    /// Delete the document for a key, returning it if it existed.
    async fn delete(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>>;

    /// Append a named document revision to a global collection.
    async fn insert_named(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<()>;

    /// Insert the first and only revision of a name in one of the
    /// [`WRITE_ONCE_COLLECTIONS`].
    ///
    /// Returns `false` without writing when the name already exists,
    /// including when a concurrent writer claimed it first.
    async fn insert_named_once(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<bool>;

    /// Most recent revision of a named document.
    async fn latest_named(&self, collection: &str, name: &str)
        -> GridResult<Option<serde_json::Value>>;

    /// Distinct document names in a global collection, sorted.
    async fn list_names(&self, collection: &str) -> GridResult<Vec<String>>;
}
