//! PostgreSQL document store.
//!
//! All kinds share one `grid_documents` table; the per-kind collections are
//! partial indexes on `kind`. Uniqueness uses `NULLS NOT DISTINCT`
//! (PostgreSQL 15+) so an absent base time or ensemble member is one value.
//! [`PgDocumentStore::migrate`] creates the tables together with every
//! unique index, so a connected store never accepts duplicate keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, QueryBuilder};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use rainfields_common::{GridError, GridKey, GridResult, RecordKind};

use crate::document::{DocumentStore, WriteOutcome, WRITE_ONCE_COLLECTIONS};
use crate::index::{
    required_indexes, BaseTimeFilter, EnsembleFilter, GridQuery, IndexSpec, SortOrder, TimeFilter,
};
use crate::record::{BlobRef, GridRecord, Metadata};

const COLUMNS: &str = "kind, domain, product, valid_time, base_time, ensemble, \
                       artifact_name, payload_ref, metadata, revision, written_at";

/// Document store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new connection pool from a database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> GridResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| GridError::StoreUnavailable(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables and their indexes if they do not exist.
    pub async fn migrate(&self) -> GridResult<()> {
        let statements = schema_statements();
        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(unavailable("Migration failed"))?;
        }

        info!(statements = statements.len(), "Schema migrated");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ensure_indexes(&self, kind: RecordKind, indexes: &[IndexSpec]) -> GridResult<()> {
        for spec in indexes {
            sqlx::query(&index_sql(kind, spec))
                .execute(&self.pool)
                .await
                .map_err(unavailable("Index creation failed"))?;
            info!(kind = %kind, index = spec.name, "Ensured index");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %kind, key = %key))]
    async fn find_one(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM grid_documents", COLUMNS));
        push_key(&mut builder, kind, key);

        let row = builder
            .build_query_as::<DocumentRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable("Query failed"))?;

        row.map(GridRecord::try_from).transpose()
    }

    async fn insert(&self, record: &GridRecord) -> GridResult<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO grid_documents (
                kind, domain, product, valid_time, base_time, ensemble,
                artifact_name, payload_ref, metadata, revision, written_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.key.domain)
        .bind(&record.key.product)
        .bind(record.key.valid_time)
        .bind(record.key.base_time.as_option())
        .bind(record.key.ensemble.as_option().map(i64::from))
        .bind(&record.artifact_name)
        .bind(record.payload_ref.as_ref().map(BlobRef::as_str))
        .bind(Json(&record.metadata))
        .bind(record.revision)
        .bind(record.written_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(key = %record.key, "Insert hit existing key");
                Ok(WriteOutcome::Conflict)
            }
            Err(e) => Err(GridError::StoreUnavailable(format!("Insert failed: {}", e))),
        }
    }

    async fn replace(&self, record: &GridRecord, expected: Uuid) -> GridResult<WriteOutcome> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE grid_documents SET ");
        let mut set = builder.separated(", ");
        set.push("artifact_name = ").push_bind_unseparated(record.artifact_name.clone());
        set.push("payload_ref = ")
            .push_bind_unseparated(record.payload_ref.as_ref().map(|r| r.0.clone()));
        set.push("metadata = ").push_bind_unseparated(Json(record.metadata.clone()));
        set.push("revision = ").push_bind_unseparated(record.revision);
        set.push("written_at = ").push_bind_unseparated(record.written_at);
        push_key(&mut builder, record.kind, &record.key);
        builder.push(" AND revision = ").push_bind(expected);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(unavailable("Update failed"))?;

        Ok(if result.rows_affected() == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Conflict
        })
    }

    async fn upsert(&self, record: &GridRecord) -> GridResult<()> {
        sqlx::query(&upsert_sql(record.kind))
            .bind(record.kind.as_str())
            .bind(&record.key.domain)
            .bind(&record.key.product)
            .bind(record.key.valid_time)
            .bind(record.key.base_time.as_option())
            .bind(record.key.ensemble.as_option().map(i64::from))
            .bind(&record.artifact_name)
            .bind(record.payload_ref.as_ref().map(BlobRef::as_str))
            .bind(Json(&record.metadata))
            .bind(record.revision)
            .bind(record.written_at)
            .execute(&self.pool)
            .await
            .map_err(unavailable("Upsert failed"))?;

        Ok(())
    }

    fn find(
        &self,
        kind: RecordKind,
        query: GridQuery,
        page_size: usize,
    ) -> BoxStream<'_, GridResult<GridRecord>> {
        let page_size = page_size.max(1);
        let start = PageCursor {
            offset: 0,
            remaining: query.limit,
            exhausted: false,
        };

        let pages = stream::try_unfold(start, move |cursor| {
            fetch_page(self.pool.clone(), kind, query.clone(), cursor, page_size)
        });

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    #[instrument(skip(self), fields(kind = %kind, key = %key))]
    async fn delete(&self, kind: RecordKind, key: &GridKey) -> GridResult<Option<GridRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM grid_documents");
        push_key(&mut builder, kind, key);
        builder.push(format!(" RETURNING {}", COLUMNS));

        let row = builder
            .build_query_as::<DocumentRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable("Delete failed"))?;

        row.map(GridRecord::try_from).transpose()
    }

    async fn insert_named(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<()> {
        sqlx::query(
            "INSERT INTO named_documents (collection, name, recorded_at, body) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(collection)
        .bind(name)
        .bind(recorded_at)
        .bind(Json(body))
        .execute(&self.pool)
        .await
        .map_err(unavailable("Insert failed"))?;

        Ok(())
    }

    async fn insert_named_once(
        &self,
        collection: &str,
        name: &str,
        body: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<bool> {
        let Some(collection) = WRITE_ONCE_COLLECTIONS.iter().find(|c| **c == collection) else {
            return Err(GridError::InvalidKey(format!(
                "collection '{}' is not write-once",
                collection
            )));
        };

        let result = sqlx::query(&insert_once_sql(collection))
            .bind(*collection)
            .bind(name)
            .bind(recorded_at)
            .bind(Json(body))
            .execute(&self.pool)
            .await
            .map_err(unavailable("Insert failed"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_named(
        &self,
        collection: &str,
        name: &str,
    ) -> GridResult<Option<serde_json::Value>> {
        let body = sqlx::query_scalar::<_, Json<serde_json::Value>>(
            "SELECT body FROM named_documents \
             WHERE collection = $1 AND name = $2 \
             ORDER BY recorded_at DESC, seq DESC LIMIT 1",
        )
        .bind(collection)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable("Query failed"))?;

        Ok(body.map(|Json(v)| v))
    }

    async fn list_names(&self, collection: &str) -> GridResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT name FROM named_documents WHERE collection = $1 ORDER BY name",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable("Query failed"))
    }
}

fn unavailable(context: &'static str) -> impl Fn(sqlx::Error) -> GridError {
    move |e| GridError::StoreUnavailable(format!("{}: {}", context, e))
}

#[derive(Debug, Clone, Copy)]
struct PageCursor {
    offset: usize,
    remaining: Option<usize>,
    exhausted: bool,
}

/// Fetch the page after `cursor`, or `None` once the results are exhausted.
async fn fetch_page(
    pool: PgPool,
    kind: RecordKind,
    query: GridQuery,
    cursor: PageCursor,
    page_size: usize,
) -> GridResult<Option<(Vec<GridRecord>, PageCursor)>> {
    let take = cursor.remaining.map_or(page_size, |r| r.min(page_size));
    if cursor.exhausted || take == 0 {
        return Ok(None);
    }

    let mut builder = select_documents(kind, &query);
    builder
        .push(" LIMIT ")
        .push_bind(take as i64)
        .push(" OFFSET ")
        .push_bind(cursor.offset as i64);

    let rows = builder
        .build_query_as::<DocumentRow>()
        .fetch_all(&pool)
        .await
        .map_err(unavailable("Query failed"))?;

    let fetched = rows.len();
    if fetched == 0 {
        return Ok(None);
    }
    debug!(kind = %kind, offset = cursor.offset, fetched, "Fetched page");

    let records = rows
        .into_iter()
        .map(GridRecord::try_from)
        .collect::<GridResult<Vec<_>>>()?;
    let next = PageCursor {
        offset: cursor.offset + fetched,
        remaining: cursor.remaining.map(|r| r.saturating_sub(fetched)),
        exhausted: fetched < take,
    };
    Ok(Some((records, next)))
}

/// Append the exact-key predicate.
fn push_key(builder: &mut QueryBuilder<'_, Postgres>, kind: RecordKind, key: &GridKey) {
    builder
        .push(" WHERE kind = ")
        .push_bind(kind.as_str())
        .push(" AND domain = ")
        .push_bind(key.domain.clone())
        .push(" AND product = ")
        .push_bind(key.product.clone())
        .push(" AND valid_time = ")
        .push_bind(key.valid_time)
        .push(" AND base_time IS NOT DISTINCT FROM ")
        .push_bind(key.base_time.as_option())
        .push("::timestamptz AND ensemble IS NOT DISTINCT FROM ")
        .push_bind(key.ensemble.as_option().map(i64::from))
        .push("::bigint");
}

/// SELECT for a query predicate, ordered but not paginated.
fn select_documents(kind: RecordKind, query: &GridQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::<Postgres>::new(format!("SELECT {} FROM grid_documents WHERE kind = ", COLUMNS));
    builder.push_bind(kind.as_str());

    if let Some(domain) = &query.domain {
        builder.push(" AND domain = ").push_bind(domain.clone());
    }
    if let Some(product) = &query.product {
        builder.push(" AND product = ").push_bind(product.clone());
    }

    match query.valid_time {
        TimeFilter::Any => {}
        TimeFilter::At(t) => {
            builder.push(" AND valid_time = ").push_bind(t);
        }
        TimeFilter::Within(range) => {
            builder
                .push(" AND valid_time BETWEEN ")
                .push_bind(range.start)
                .push(" AND ")
                .push_bind(range.end);
        }
    }

    match query.base_time {
        BaseTimeFilter::Any => {}
        BaseTimeFilter::NotApplicable => {
            builder.push(" AND base_time IS NULL");
        }
        BaseTimeFilter::At(t) => {
            builder.push(" AND base_time = ").push_bind(t);
        }
        BaseTimeFilter::Within(range) => {
            builder
                .push(" AND base_time BETWEEN ")
                .push_bind(range.start)
                .push(" AND ")
                .push_bind(range.end);
        }
    }

    match query.ensemble {
        EnsembleFilter::Any => {}
        EnsembleFilter::Deterministic => {
            builder.push(" AND ensemble IS NULL");
        }
        EnsembleFilter::Member(m) => {
            builder.push(" AND ensemble = ").push_bind(i64::from(m));
        }
    }

    let direction = match query.order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    builder.push(format!(
        " ORDER BY valid_time {}, domain, product, base_time NULLS FIRST, ensemble NULLS FIRST",
        direction
    ));

    builder
}

/// Partial index on one kind's documents.
fn index_sql(kind: RecordKind, spec: &IndexSpec) -> String {
    let columns: Vec<&str> = spec.fields.iter().map(|f| f.as_str()).collect();
    format!(
        "CREATE {unique}INDEX IF NOT EXISTS {kind}_{name} ON grid_documents ({columns}){nulls} \
         WHERE kind = '{kind}'",
        unique = if spec.unique { "UNIQUE " } else { "" },
        kind = kind.as_str(),
        name = spec.name,
        columns = columns.join(", "),
        nulls = if spec.unique { " NULLS NOT DISTINCT" } else { "" },
    )
}

/// Unique index making names in a collection write-once.
fn write_once_index_sql(collection: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS named_documents_{collection}_once \
         ON named_documents (collection, name) WHERE collection = '{collection}'"
    )
}

fn insert_once_sql(collection: &str) -> String {
    format!(
        "INSERT INTO named_documents (collection, name, recorded_at, body) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (collection, name) WHERE collection = '{}' DO NOTHING",
        collection
    )
}

/// Every statement `migrate` runs, tables first.
fn schema_statements() -> Vec<String> {
    let mut statements: Vec<String> = SCHEMA_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    statements.extend(WRITE_ONCE_COLLECTIONS.iter().map(|c| write_once_index_sql(c)));

    let indexes = required_indexes();
    for kind in RecordKind::ALL {
        statements.extend(indexes.iter().map(|spec| index_sql(kind, spec)));
    }
    statements
}

fn upsert_sql(kind: RecordKind) -> String {
    format!(
        r#"
        INSERT INTO grid_documents (
            kind, domain, product, valid_time, base_time, ensemble,
            artifact_name, payload_ref, metadata, revision, written_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (domain, product, valid_time, base_time, ensemble) WHERE kind = '{}'
        DO UPDATE SET
            artifact_name = EXCLUDED.artifact_name,
            payload_ref = EXCLUDED.payload_ref,
            metadata = EXCLUDED.metadata,
            revision = EXCLUDED.revision,
            written_at = EXCLUDED.written_at
        "#,
        kind.as_str()
    )
}

/// Internal row type for database queries.
#[derive(FromRow)]
struct DocumentRow {
    kind: String,
    domain: String,
    product: String,
    valid_time: DateTime<Utc>,
    base_time: Option<DateTime<Utc>>,
    ensemble: Option<i64>,
    artifact_name: Option<String>,
    payload_ref: Option<String>,
    metadata: Json<Metadata>,
    revision: Uuid,
    written_at: DateTime<Utc>,
}

impl TryFrom<DocumentRow> for GridRecord {
    type Error = GridError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<RecordKind>()
            .map_err(GridError::Serialization)?;
        let ensemble = row
            .ensemble
            .map(u32::try_from)
            .transpose()
            .map_err(|_| GridError::Serialization(format!("bad ensemble {:?}", row.ensemble)))?;

        Ok(GridRecord {
            key: GridKey {
                domain: row.domain,
                product: row.product,
                valid_time: row.valid_time,
                base_time: row.base_time.into(),
                ensemble: ensemble.into(),
            },
            kind,
            artifact_name: row.artifact_name,
            payload_ref: row.payload_ref.map(BlobRef),
            metadata: row.metadata.0,
            revision: row.revision,
            written_at: row.written_at,
            payload: None,
        })
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS grid_documents (
    kind VARCHAR(16) NOT NULL,
    domain VARCHAR(64) NOT NULL,
    product VARCHAR(64) NOT NULL,
    valid_time TIMESTAMPTZ NOT NULL,
    base_time TIMESTAMPTZ,
    ensemble BIGINT,
    artifact_name TEXT,
    payload_ref TEXT,
    metadata JSONB NOT NULL DEFAULT '{}',
    revision UUID NOT NULL,
    written_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS named_documents (
    seq BIGSERIAL PRIMARY KEY,
    collection VARCHAR(64) NOT NULL,
    name VARCHAR(200) NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL,
    body JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_named_documents_latest
    ON named_documents(collection, name, recorded_at DESC)
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{KEY_INDEX, TIME_INDEX};
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_index_sql() {
        assert_eq!(
            index_sql(RecordKind::Rain, &KEY_INDEX),
            "CREATE UNIQUE INDEX IF NOT EXISTS rain_domain_product_valid_base_ensemble_idx \
             ON grid_documents (domain, product, valid_time, base_time, ensemble) \
             NULLS NOT DISTINCT WHERE kind = 'rain'"
        );
        assert_eq!(
            index_sql(RecordKind::Stats, &TIME_INDEX),
            "CREATE INDEX IF NOT EXISTS stats_domain_product_valid_idx \
             ON grid_documents (domain, product, valid_time) WHERE kind = 'stats'"
        );
    }

    #[test]
    fn test_select_partial_key() {
        let builder = select_documents(RecordKind::Rain, &GridQuery::product("AKL", "RATE"));
        assert_eq!(
            builder.sql(),
            format!(
                "SELECT {} FROM grid_documents WHERE kind = $1 AND domain = $2 AND product = $3 \
                 ORDER BY valid_time ASC, domain, product, base_time NULLS FIRST, ensemble NULLS FIRST",
                COLUMNS
            )
        );
    }

    #[test]
    fn test_select_filters() {
        let query = GridQuery::product("AKL", "FX")
            .valid_between(t(1), t(6))
            .analyses_only()
            .deterministic_only()
            .descending();
        let builder = select_documents(RecordKind::State, &query);
        let sql = builder.sql();
        assert!(sql.contains("AND valid_time BETWEEN $4 AND $5"));
        assert!(sql.contains("AND base_time IS NULL"));
        assert!(sql.contains("AND ensemble IS NULL"));
        assert!(sql.contains("ORDER BY valid_time DESC"));
    }

    #[test]
    fn test_select_empty_query_only_filters_kind() {
        let builder = select_documents(RecordKind::Params, &GridQuery::default());
        let sql = builder.sql();
        assert!(sql.contains("WHERE kind = $1 ORDER BY"));
    }

    #[test]
    fn test_key_predicate_handles_absent_fields() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM grid_documents");
        push_key(&mut builder, RecordKind::Rain, &GridKey::analysis("AKL", "RATE", t(0)));
        let sql = builder.sql();
        assert!(sql.contains("base_time IS NOT DISTINCT FROM $5::timestamptz"));
        assert!(sql.contains("ensemble IS NOT DISTINCT FROM $6::bigint"));
    }

    #[test]
    fn test_migration_creates_unique_indexes() {
        let statements = schema_statements();
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS grid_documents"));

        let table = statements
            .iter()
            .position(|s| s.contains("CREATE TABLE IF NOT EXISTS named_documents"))
            .unwrap();
        for kind in RecordKind::ALL {
            let unique = statements
                .iter()
                .position(|s| *s == index_sql(kind, &KEY_INDEX))
                .unwrap_or_else(|| panic!("no key index for {}", kind));
            assert!(unique > table);
            assert!(statements.contains(&index_sql(kind, &TIME_INDEX)));
        }

        assert!(statements.contains(&write_once_index_sql("domain")));
        assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_insert_once_targets_write_once_index() {
        assert_eq!(
            write_once_index_sql("domain"),
            "CREATE UNIQUE INDEX IF NOT EXISTS named_documents_domain_once \
             ON named_documents (collection, name) WHERE collection = 'domain'"
        );
        assert!(insert_once_sql("domain")
            .ends_with("ON CONFLICT (collection, name) WHERE collection = 'domain' DO NOTHING"));
    }

    #[test]
    fn test_upsert_targets_kind_index() {
        let sql = upsert_sql(RecordKind::State);
        assert!(sql.contains("ON CONFLICT (domain, product, valid_time, base_time, ensemble) WHERE kind = 'state'"));
    }

    #[test]
    fn test_row_conversion() {
        let row = DocumentRow {
            kind: "rain".to_string(),
            domain: "AKL".to_string(),
            product: "FX".to_string(),
            valid_time: t(3),
            base_time: Some(t(0)),
            ensemble: Some(7),
            artifact_name: Some("a.nc".to_string()),
            payload_ref: Some("AKL.rain/a.nc".to_string()),
            metadata: Json(Metadata::new()),
            revision: Uuid::nil(),
            written_at: t(4),
        };
        let record = GridRecord::try_from(row).unwrap();
        assert_eq!(record.key, GridKey::forecast("AKL", "FX", t(3), t(0), Some(7)));
        assert_eq!(record.kind, RecordKind::Rain);
        assert_eq!(record.payload_ref, Some(BlobRef("AKL.rain/a.nc".to_string())));
    }
}
