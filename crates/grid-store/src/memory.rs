//! In-memory document store for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use rainfields_common::{GridError, GridKey, GridResult, RecordKind};

use crate::document::{DocumentStore, WriteOutcome, WRITE_ONCE_COLLECTIONS};
use crate::index::{GridQuery, IndexSpec};
use crate::record::GridRecord;

/// One revision of a named document.
#[derive(Debug, Clone)]
struct NamedRevision {
    name: String,
    recorded_at: DateTime<Utc>,
    body: serde_json::Value,
}

/// Document store held in process memory.
///
/// Documents are keyed by `(kind, GridKey)`, which enforces the unique key
/// index by construction.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<RecordKind, BTreeMap<GridKey, GridRecord>>>,
    indexes: RwLock<HashMap<RecordKind, Vec<IndexSpec>>>,
    named: RwLock<HashMap<String, Vec<NamedRevision>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the indexes requested for a kind.
    pub async fn index_names(&self, kind: RecordKind) -> Vec<&'static str> {
        self.indexes
            .read()
            .await
            .get(&kind)
            .map(|specs| specs.iter().map(|s| s.name).collect())
            .unwrap_or_default()
    }

    /// Number of documents stored for a kind.
    pub async fn len(&self, kind: RecordKind) -> usize {
        self.documents
            .read()
            .await
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.values().all(BTreeMap::is_empty)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_indexes(&self, kind: RecordKind, indexes: &[IndexSpec]) -> GridResult<()> {
        let mut all = self.indexes.write().await;
        let existing = all.entry(kind).or_default();
        for spec in indexes {
            if !existing.iter().any(|e| e.name == spec.name) {
                existing.push(*spec);
            }
        }
        Ok(())
    }

    async fn find_one(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>> {
        let documents = self.documents.read().await;
        Ok(documents.get(&kind).and_then(|c| c.get(key)).cloned())
    }

    async fn insert(&self, record: &GridRecord) -> GridResult<WriteOutcome> {
        let mut documents = self.documents.write().await;
        let collection = documents.entry(record.kind).or_default();
        if collection.contains_key(&record.key) {
            return Ok(WriteOutcome::Conflict);
        }
        collection.insert(record.key.clone(), record.clone().without_payload());
        Ok(WriteOutcome::Applied)
    }

    async fn replace(&self, record: &GridRecord, expected: Uuid) -> GridResult<WriteOutcome> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get_mut(&record.kind)
            .and_then(|c| c.get_mut(&record.key));
        match current {
            Some(doc) if doc.revision == expected => {
                *doc = record.clone().without_payload();
                Ok(WriteOutcome::Applied)
            }
            _ => Ok(WriteOutcome::Conflict),
        }
    }

    async fn upsert(&self, record: &GridRecord) -> GridResult<()> {
        let mut documents = self.documents.write().await;
        documents
            .entry(record.kind)
            .or_default()
            .insert(record.key.clone(), record.clone().without_payload());
        Ok(())
    }

    fn find(
        &self,
        kind: RecordKind,
        query: GridQuery,
        _page_size: usize,
    ) -> BoxStream<'_, GridResult<GridRecord>> {
        let snapshot = async move {
            let documents = self.documents.read().await;
            let mut hits: Vec<GridRecord> = documents
                .get(&kind)
                .map(|c| {
                    c.values()
                        .filter(|r| query.matches(&r.key))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            hits.sort_by(|a, b| query.compare(&a.key, &b.key));
            if let Some(limit) = query.limit {
                hits.truncate(limit);
            }
            stream::iter(hits.into_iter().map(Ok))
        };
        stream::once(snapshot).flatten().boxed()
    }

    async fn delete(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>> {
        let mut documents = self.documents.write().await;
        Ok(documents.get_mut(&kind).and_then(|c| c.remove(key)))
    }

    async fn insert_named(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<()> {
        let mut named = self.named.write().await;
        named
            .entry(collection.to_string())
            .or_default()
            .push(NamedRevision {
                name: name.to_string(),
                recorded_at,
                body: body.clone(),
            });
        Ok(())
    }

    async fn insert_named_once(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<bool> {
        if !WRITE_ONCE_COLLECTIONS.iter().any(|c| *c == collection) {
            return Err(GridError::InvalidKey(format!(
                "collection '{}' is not write-once",
                collection
            )));
        }

        let mut named = self.named.write().await;
        let revisions = named.entry(collection.to_string()).or_default();
        if revisions.iter().any(|r| r.name == name) {
            return Ok(false);
        }
        revisions.push(NamedRevision {
            name: name.to_string(),
            recorded_at,
            body: body.clone(),
        });
        Ok(true)
    }

    async fn latest_named(
        &self,
        collection: &str,
        name: &str,
    ) -> GridResult<Option<serde_json::Value>> {
        let named = self.named.read().await;
        Ok(named.get(collection).and_then(|revisions| {
            revisions
                .iter()
                .filter(|r| r.name == name)
                // later insert wins a tie on time
                .enumerate()
                .max_by_key(|(i, r)| (r.recorded_at, *i))
                .map(|(_, r)| r.body.clone())
        }))
    }

    async fn list_names(&self, collection: &str) -> GridResult<Vec<String>> {
        let named = self.named.read().await;
        let mut names: Vec<String> = named
            .get(collection)
            .map(|revisions| revisions.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::required_indexes;
    use crate::record::Metadata;
    use chrono::TimeZone;
    use futures::TryStreamExt;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn record(key: GridKey) -> GridRecord {
        GridRecord {
            key,
            kind: RecordKind::Params,
            artifact_name: None,
            payload_ref: None,
            metadata: Metadata::new(),
            revision: Uuid::new_v4(),
            written_at: Utc::now(),
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_insert_conflicts_on_same_key() {
        let store = MemoryDocumentStore::new();
        let first = record(GridKey::analysis("AKL", "RATE", t(0)));
        let second = record(GridKey::analysis("AKL", "RATE", t(0)));

        assert_eq!(store.insert(&first).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(store.insert(&second).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(store.len(RecordKind::Params).await, 1);
    }

    #[tokio::test]
    async fn test_replace_checks_revision() {
        let store = MemoryDocumentStore::new();
        let first = record(GridKey::analysis("AKL", "RATE", t(0)));
        store.insert(&first).await.unwrap();

        let second = record(first.key.clone());
        assert_eq!(
            store.replace(&second, Uuid::new_v4()).await.unwrap(),
            WriteOutcome::Conflict
        );
        assert_eq!(
            store.replace(&second, first.revision).await.unwrap(),
            WriteOutcome::Applied
        );

        let found = store.find_one(RecordKind::Params, &first.key).await.unwrap().unwrap();
        assert_eq!(found.revision, second.revision);
    }

    #[tokio::test]
    async fn test_find_filters_and_orders() {
        let store = MemoryDocumentStore::new();
        for h in [3, 1, 2] {
            store.insert(&record(GridKey::analysis("AKL", "RATE", t(h)))).await.unwrap();
        }
        store.insert(&record(GridKey::analysis("AKL", "OTHER", t(0)))).await.unwrap();

        let found: Vec<GridRecord> = store
            .find(RecordKind::Params, GridQuery::product("AKL", "RATE"), 10)
            .try_collect()
            .await
            .unwrap();
        let hours: Vec<_> = found.iter().map(|r| r.key.valid_time).collect();
        assert_eq!(hours, vec![t(1), t(2), t(3)]);

        let latest: Vec<GridRecord> = store
            .find(RecordKind::Params, GridQuery::product("AKL", "RATE").descending().limit(1), 10)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(latest[0].key.valid_time, t(3));
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let store = MemoryDocumentStore::new();
        let key = GridKey::analysis("AKL", "RATE", t(0));
        store.insert(&record(key.clone())).await.unwrap();
        assert!(store.find_one(RecordKind::Stats, &key).await.unwrap().is_none());
        assert!(store.delete(RecordKind::Stats, &key).await.unwrap().is_none());
        assert!(store.delete(RecordKind::Params, &key).await.unwrap().is_some());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_named_documents() {
        let store = MemoryDocumentStore::new();
        store
            .insert_named("config", "AKL", &serde_json::json!({"v": 1}), t(0))
            .await
            .unwrap();
        store
            .insert_named("config", "AKL", &serde_json::json!({"v": 2}), t(1))
            .await
            .unwrap();
        store
            .insert_named("config", "WLG", &serde_json::json!({"v": 9}), t(0))
            .await
            .unwrap();

        assert_eq!(
            store.latest_named("config", "AKL").await.unwrap(),
            Some(serde_json::json!({"v": 2}))
        );
        assert_eq!(store.latest_named("config", "CHC").await.unwrap(), None);
        assert_eq!(store.list_names("config").await.unwrap(), vec!["AKL", "WLG"]);
    }

    #[tokio::test]
    async fn test_named_once_keeps_first_revision() {
        let store = MemoryDocumentStore::new();
        assert!(store
            .insert_named_once("domain", "AKL", &serde_json::json!({"v": 1}), t(0))
            .await
            .unwrap());
        assert!(!store
            .insert_named_once("domain", "AKL", &serde_json::json!({"v": 2}), t(1))
            .await
            .unwrap());
        assert_eq!(
            store.latest_named("domain", "AKL").await.unwrap(),
            Some(serde_json::json!({"v": 1}))
        );
        assert!(store
            .insert_named_once("config", "AKL", &serde_json::json!({}), t(0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ensure_indexes_is_idempotent() {
        let store = MemoryDocumentStore::new();
        store.ensure_indexes(RecordKind::Rain, &required_indexes()).await.unwrap();
        store.ensure_indexes(RecordKind::Rain, &required_indexes()).await.unwrap();
        assert_eq!(
            store.index_names(RecordKind::Rain).await,
            vec!["domain_product_valid_base_ensemble_idx", "domain_product_valid_idx"]
        );
    }
}
