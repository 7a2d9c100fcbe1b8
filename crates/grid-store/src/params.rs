//! Parameter and statistics repository: structured records under the same
//! compound key as grid fields, without blob storage.

use chrono::Utc;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use rainfields_common::time::canonical;
use rainfields_common::{GridError, GridKey, GridResult, RawGridKey, RecordKind};

use crate::config::ConflictPolicy;
use crate::document::DocumentStore;
use crate::grid_store::commit;
use crate::index::{build_query, normalize, GridQuery};
use crate::record::{GridRecord, Metadata};
use crate::stats::FieldStats;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Keyed store of `params` and `stats` documents.
#[derive(Clone)]
pub struct ParamStore {
    documents: Arc<dyn DocumentStore>,
    policy: ConflictPolicy,
    page_size: usize,
}

impl ParamStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            policy: ConflictPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Write a structured record, replacing any record under the same key.
    #[instrument(skip(self, key, document), fields(kind = %kind))]
    pub async fn put(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
        document: Metadata,
    ) -> GridResult<GridRecord> {
        check_kind(kind)?;
        let key = normalize(key)?;
        self.write(key, kind, document).await
    }

    /// Serialize a value as the record document. It must serialize to a
    /// JSON object.
    pub async fn put_value<T: Serialize>(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
        value: &T,
    ) -> GridResult<GridRecord> {
        let document = match serde_json::to_value(value)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(GridError::PayloadMismatch(format!(
                    "structured documents must be JSON objects, got {}",
                    json_type(&other)
                )))
            }
        };
        self.put(key, kind, document).await
    }

    /// Write several records of one kind. Every key is validated before the
    /// first write; writes stop at the first store error.
    pub async fn put_many<K, I>(&self, kind: RecordKind, records: I) -> GridResult<Vec<GridRecord>>
    where
        K: Into<RawGridKey>,
        I: IntoIterator<Item = (K, Metadata)>,
    {
        check_kind(kind)?;
        let normalized = records
            .into_iter()
            .map(|(key, document)| normalize(key).map(|key| (key, document)))
            .collect::<GridResult<Vec<_>>>()?;

        let mut written = Vec::with_capacity(normalized.len());
        for (key, document) in normalized {
            written.push(self.write(key, kind, document).await?);
        }

        debug!(kind = %kind, count = written.len(), "Stored batch");
        Ok(written)
    }

    /// Store the statistics of a field under the field's key.
    pub async fn put_stats(&self, key: &GridKey, stats: &FieldStats) -> GridResult<GridRecord> {
        self.write(normalize(key)?, RecordKind::Stats, stats.to_metadata()?)
            .await
    }

    #[instrument(skip(self, key), fields(kind = %kind))]
    pub async fn get(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
    ) -> GridResult<Option<GridRecord>> {
        check_kind(kind)?;
        let key = normalize(key)?;
        self.documents.find_one(kind, &key).await
    }

    /// Look up a record and deserialize its document.
    pub async fn get_value<T: DeserializeOwned>(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
    ) -> GridResult<Option<T>> {
        match self.get(key, kind).await? {
            Some(record) => Ok(Some(serde_json::from_value(serde_json::Value::Object(
                record.metadata,
            ))?)),
            None => Ok(None),
        }
    }

    pub async fn get_stats(&self, key: impl Into<RawGridKey>) -> GridResult<Option<FieldStats>> {
        self.get_value(key, RecordKind::Stats).await
    }

    /// Stream the records matching a partial key in ascending valid time.
    pub fn query(
        &self,
        partial: impl Into<RawGridKey>,
        kind: RecordKind,
    ) -> GridResult<BoxStream<'_, GridResult<GridRecord>>> {
        check_kind(kind)?;
        let query = build_query(partial)?;
        Ok(self.documents.find(kind, query, self.page_size))
    }

    pub fn find(
        &self,
        query: GridQuery,
        kind: RecordKind,
    ) -> GridResult<BoxStream<'_, GridResult<GridRecord>>> {
        check_kind(kind)?;
        Ok(self.documents.find(kind, query, self.page_size))
    }

    pub async fn delete(&self, key: impl Into<RawGridKey>, kind: RecordKind) -> GridResult<bool> {
        check_kind(kind)?;
        let key = normalize(key)?;
        Ok(self.documents.delete(kind, &key).await?.is_some())
    }

    async fn write(&self, key: GridKey, kind: RecordKind, document: Metadata) -> GridResult<GridRecord> {
        let existing = self.documents.find_one(kind, &key).await?;
        let record = GridRecord {
            key,
            kind,
            artifact_name: None,
            payload_ref: None,
            metadata: document,
            revision: Uuid::new_v4(),
            written_at: canonical(Utc::now()),
            payload: None,
        };

        commit(self.documents.as_ref(), self.policy, &record, existing.as_ref()).await?;
        debug!(collection = %record.collection(), key = %record.key, "Stored document");
        Ok(record)
    }
}

fn check_kind(kind: RecordKind) -> GridResult<()> {
    if kind.carries_blob() {
        return Err(GridError::PayloadMismatch(format!(
            "{} records carry a blob; use GridStore",
            kind
        )));
    }
    Ok(())
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
