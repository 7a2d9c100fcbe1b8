//! Grid store adapter: binds a blob payload and its metadata document under
//! one logical key.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use rainfields_common::time::canonical;
use rainfields_common::{GridError, GridResult, RawGridKey, RecordKind, TimeRange};

use crate::blob::{BlobStore, ObjectBlobStore};
use crate::config::{ConflictPolicy, StoreConfig};
use crate::document::{DocumentStore, WriteOutcome};
use crate::index::{build_query, normalize, required_indexes, GridQuery};
use crate::naming::ProductTemplates;
use crate::postgres::PgDocumentStore;
use crate::record::{GridRecord, Metadata};

/// Spin-up allowance between a forecast run and its first usable field.
const BASE_TIME_MIN_AGE_HOURS: i64 = 3;
/// Oldest forecast run still considered current.
const BASE_TIME_MAX_AGE_HOURS: i64 = 27;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Stores rain and state fields: payload bytes in the blob store, metadata
/// in the document store.
///
/// Holds no locks and no state between calls. Concurrent writers to one key
/// are resolved by the configured [`ConflictPolicy`]; blobs orphaned by a
/// lost race are left for out-of-band cleanup.
#[derive(Clone)]
pub struct GridStore {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    templates: ProductTemplates,
    policy: ConflictPolicy,
    page_size: usize,
}

impl GridStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        templates: ProductTemplates,
    ) -> Self {
        Self {
            documents,
            blobs,
            templates,
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

    /// Connect to PostgreSQL and the configured blob backend.
    pub async fn connect(config: &StoreConfig) -> GridResult<Self> {
        let documents = PgDocumentStore::connect(&config.database_url, config.max_connections).await?;
        // tables plus the unique key indexes; writes rely on them
        documents.migrate().await?;
        let blobs = ObjectBlobStore::new(&config.blob)?;

        Ok(Self::new(Arc::new(documents), Arc::new(blobs), config.templates())
            .with_conflict_policy(config.conflict_policy)
            .with_page_size(config.page_size))
    }

    /// The shared document store, for building registries on the same backend.
    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.documents)
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Request the compound indexes for every record kind.
    pub async fn ensure_indexes(&self) -> GridResult<()> {
        let indexes = required_indexes();
        for kind in RecordKind::ALL {
            self.documents.ensure_indexes(kind, &indexes).await?;
        }
        info!(kinds = RecordKind::ALL.len(), "Indexes ensured");
        Ok(())
    }

    /// Write a record, fully replacing any record already stored under the
    /// same key and kind.
    ///
    /// Blob-carrying kinds (rain, state) require a payload; structured kinds
    /// must not have one. A replaced record's blob is deleted once the new
    /// document is committed.
    #[instrument(skip(self, key, payload, metadata), fields(kind = %kind))]
    pub async fn put(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
        payload: Option<Bytes>,
        metadata: Metadata,
    ) -> GridResult<GridRecord> {
        let key = normalize(key)?;
        let payload = check_payload(kind, payload)?;
        let existing = self.documents.find_one(kind, &key).await?;

        let (artifact_name, payload_ref) = match &payload {
            Some(data) => {
                let name = self.templates.generate_name(&key);
                let blob = self
                    .blobs
                    .put(&kind.collection(&key.domain), &name, data.clone())
                    .await?;
                (Some(name), Some(blob))
            }
            None => (None, None),
        };

        let record = GridRecord {
            key,
            kind,
            artifact_name,
            payload_ref,
            metadata,
            revision: Uuid::new_v4(),
            written_at: canonical(Utc::now()),
            payload,
        };

        commit(self.documents.as_ref(), self.policy, &record, existing.as_ref()).await?;

        if let Some(old) = existing.and_then(|e| e.payload_ref) {
            if record.payload_ref.as_ref() != Some(&old) {
                if let Err(e) = self.blobs.delete(&old).await {
                    warn!(blob = %old, error = %e, "Failed to delete replaced blob");
                }
            }
        }

        debug!(
            collection = %record.collection(),
            artifact = record.artifact_name.as_deref().unwrap_or("-"),
            "Stored record"
        );
        Ok(record)
    }

    /// Exact-key lookup. Blob-carrying records come back with their payload.
    #[instrument(skip(self, key), fields(kind = %kind))]
    pub async fn get(
        &self,
        key: impl Into<RawGridKey>,
        kind: RecordKind,
    ) -> GridResult<Option<GridRecord>> {
        let key = normalize(key)?;
        match self.documents.find_one(kind, &key).await? {
            Some(record) => self.attach_payload(record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Stream the records matching a partial key, metadata only, in
    /// ascending valid time.
    ///
    /// Fields left out of the partial key match any value.
    pub fn query(
        &self,
        partial: impl Into<RawGridKey>,
        kind: RecordKind,
    ) -> GridResult<BoxStream<'_, GridResult<GridRecord>>> {
        let query = build_query(partial)?;
        Ok(self.find(query, kind))
    }

    /// Stream the records matching a prepared query, metadata only.
    pub fn find(&self, query: GridQuery, kind: RecordKind) -> BoxStream<'_, GridResult<GridRecord>> {
        self.documents.find(kind, query, self.page_size)
    }

    /// Like [`GridStore::find`], resolving each record's payload as it is
    /// yielded.
    pub fn query_with_payloads(
        &self,
        query: GridQuery,
        kind: RecordKind,
    ) -> BoxStream<'_, GridResult<GridRecord>> {
        self.find(query, kind)
            .and_then(move |record| self.attach_payload(record))
            .boxed()
    }

    /// Payload bytes of a record returned by a query. `None` for kinds
    /// without a blob.
    pub async fn load_payload(&self, record: &GridRecord) -> GridResult<Option<Bytes>> {
        if let Some(payload) = &record.payload {
            return Ok(Some(payload.clone()));
        }
        let Some(blob) = &record.payload_ref else {
            return Ok(None);
        };

        match self.blobs.get(blob).await? {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(GridError::BlobMissing(format!("{} ({})", blob, record.key))),
        }
    }

    /// Delete a record and its blob. Returns whether a record existed.
    ///
    /// Once the document is removed the call succeeds; a blob that cannot
    /// be deleted is logged and left orphaned.
    #[instrument(skip(self, key), fields(kind = %kind))]
    pub async fn delete(&self, key: impl Into<RawGridKey>, kind: RecordKind) -> GridResult<bool> {
        let key = normalize(key)?;
        let Some(removed) = self.documents.delete(kind, &key).await? else {
            debug!(key = %key, "Nothing to delete");
            return Ok(false);
        };

        // the record is gone; a blob left behind is an orphan, not a failure
        if let Some(blob) = &removed.payload_ref {
            match self.blobs.delete(blob).await {
                Ok(true) => {}
                Ok(false) => warn!(blob = %blob, "Deleted record had no blob"),
                Err(e) => warn!(blob = %blob, error = %e, "Failed to delete blob of deleted record"),
            }
        }

        debug!(key = %key, "Deleted record");
        Ok(true)
    }

    /// Most recent forecast base time of a product that is between 3 and 27
    /// hours older than `valid_time`.
    pub async fn latest_base_time(
        &self,
        domain: &str,
        product: &str,
        valid_time: DateTime<Utc>,
    ) -> GridResult<Option<DateTime<Utc>>> {
        let window = TimeRange::new(
            valid_time - Duration::hours(BASE_TIME_MAX_AGE_HOURS),
            valid_time - Duration::hours(BASE_TIME_MIN_AGE_HOURS),
        );
        self.latest_base_time_within(domain, product, window).await
    }

    /// Most recent forecast base time of a product's rain fields inside a
    /// base time window.
    pub async fn latest_base_time_within(
        &self,
        domain: &str,
        product: &str,
        window: TimeRange,
    ) -> GridResult<Option<DateTime<Utc>>> {
        let query = GridQuery::product(domain, product).base_between(window.start, window.end);
        let latest = self
            .find(query, RecordKind::Rain)
            .try_fold(None, |latest: Option<DateTime<Utc>>, record| async move {
                Ok::<_, GridError>(latest.max(record.key.base_time.as_option()))
            })
            .await?;

        if latest.is_none() {
            warn!(domain, product, start = %window.start, end = %window.end, "No forecast run in window");
        }
        Ok(latest)
    }

    async fn attach_payload(&self, mut record: GridRecord) -> GridResult<GridRecord> {
        record.payload = self.load_payload(&record).await?;
        Ok(record)
    }
}

fn check_payload(kind: RecordKind, payload: Option<Bytes>) -> GridResult<Option<Bytes>> {
    match (kind.carries_blob(), payload) {
        (true, Some(data)) => Ok(Some(data)),
        (true, None) => Err(GridError::PayloadMismatch(format!(
            "{} records require a payload",
            kind
        ))),
        (false, Some(_)) => Err(GridError::PayloadMismatch(format!(
            "{} records are structured and take no payload",
            kind
        ))),
        (false, None) => Ok(None),
    }
}

/// Commit a record's document, inserting or replacing depending on what was
/// read before the write, and resolve a lost race per `policy`.
pub(crate) async fn commit(
    documents: &dyn DocumentStore,
    policy: ConflictPolicy,
    record: &GridRecord,
    existing: Option<&GridRecord>,
) -> GridResult<()> {
    let outcome = match existing {
        None => documents.insert(record).await?,
        Some(current) => documents.replace(record, current.revision).await?,
    };

    match (outcome, policy) {
        (WriteOutcome::Applied, _) => Ok(()),
        (WriteOutcome::Conflict, ConflictPolicy::LastWriteWins) => {
            warn!(key = %record.key, kind = %record.kind, "Concurrent write detected, overwriting");
            documents.upsert(record).await
        }
        (WriteOutcome::Conflict, ConflictPolicy::Reject) => Err(GridError::DuplicateWriteRace {
            collection: record.collection(),
            key: record.key.to_string(),
        }),
    }
}
