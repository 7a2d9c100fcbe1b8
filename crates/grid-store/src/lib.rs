//! Storage for rainfields grids.
//!
//! Provides:
//! - Deterministic artifact naming from grid keys and per-product templates
//! - Key normalization, query predicates and compound index definitions
//! - A grid store binding blob payloads (S3/MinIO, local, memory) to
//!   metadata documents (PostgreSQL, memory)
//! - Parameter and statistics records without blobs
//! - Domain and configuration registries

pub mod blob;
pub mod config;
pub mod document;
pub mod grid_store;
pub mod index;
pub mod memory;
pub mod naming;
pub mod params;
pub mod postgres;
pub mod record;
pub mod registry;
pub mod stats;

pub use blob::{BlobStore, ObjectBlobStore};
pub use config::{BlobStoreConfig, ConflictPolicy, ProductConfig, StoreConfig};
pub use document::{DocumentStore, WriteOutcome};
pub use grid_store::GridStore;
pub use index::{build_query, normalize, GridQuery, IndexSpec, SortOrder};
pub use memory::MemoryDocumentStore;
pub use naming::{NamingTemplate, ProductTemplates, DEFAULT_TEMPLATE};
pub use params::ParamStore;
pub use postgres::PgDocumentStore;
pub use record::{BlobRef, GridRecord, Metadata};
pub use registry::{ConfigRegistry, DomainRegistry};
pub use stats::FieldStats;
