//! Global registries: domain records and time-stamped configuration
//! documents.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use rainfields_common::{Domain, GridError, GridResult};

use crate::document::{DocumentStore, CONFIG_COLLECTION, DOMAIN_COLLECTION};
use crate::index::identifier;

/// Domain records keyed by domain code.
///
/// A domain is written once; re-registering an identical record is a no-op
/// and changing an existing one is a [`GridError::DomainConflict`].
#[derive(Clone)]
pub struct DomainRegistry {
    documents: Arc<dyn DocumentStore>,
}

impl DomainRegistry {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    pub async fn get_domain(&self, id: &str) -> GridResult<Option<Domain>> {
        self.documents
            .latest_named(DOMAIN_COLLECTION, id)
            .await?
            .map(|body| serde_json::from_value(body).map_err(GridError::from))
            .transpose()
    }

    #[instrument(skip(self, domain), fields(domain = %domain.id))]
    pub async fn put_domain(&self, domain: &Domain) -> GridResult<()> {
        let id = identifier("domain", domain.id.clone())?;
        if id != domain.id {
            return Err(GridError::InvalidKey(format!(
                "domain id '{}' has surrounding whitespace",
                domain.id
            )));
        }

        let body = serde_json::to_value(domain)?;
        let inserted = self
            .documents
            .insert_named_once(DOMAIN_COLLECTION, &id, &body, Utc::now())
            .await?;
        if inserted {
            info!(
                rows = domain.geometry.n_rows,
                cols = domain.geometry.n_cols,
                crs = %domain.crs.epsg,
                "Registered domain"
            );
            return Ok(());
        }

        // the id was taken, possibly by a concurrent registration
        match self.get_domain(&id).await? {
            Some(existing) if &existing == domain => {
                debug!("Domain already registered");
                Ok(())
            }
            Some(_) => Err(GridError::DomainConflict(id)),
            None => Err(GridError::DuplicateWriteRace {
                collection: DOMAIN_COLLECTION.to_string(),
                key: id,
            }),
        }
    }

    /// All registered domains, sorted by id.
    pub async fn list_domains(&self) -> GridResult<Vec<Domain>> {
        let mut domains = Vec::new();
        for id in self.documents.list_names(DOMAIN_COLLECTION).await? {
            if let Some(domain) = self.get_domain(&id).await? {
                domains.push(domain);
            }
        }
        Ok(domains)
    }
}

/// Named configuration documents. Every write appends a revision; reads
/// return the most recent one.
#[derive(Clone)]
pub struct ConfigRegistry {
    documents: Arc<dyn DocumentStore>,
}

impl ConfigRegistry {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    pub async fn write_config(&self, name: &str, config: &serde_json::Value) -> GridResult<()> {
        self.write_config_at(name, config, Utc::now()).await
    }

    /// Append a revision recorded at an explicit time.
    pub async fn write_config_at(
        &self,
        name: &str,
        config: &serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> GridResult<()> {
        if name.trim().is_empty() {
            return Err(GridError::InvalidKey("empty configuration name".to_string()));
        }
        self.documents
            .insert_named(CONFIG_COLLECTION, name, config, recorded_at)
            .await?;
        info!(name, %recorded_at, "Wrote configuration");
        Ok(())
    }

    pub async fn get_config(&self, name: &str) -> GridResult<Option<serde_json::Value>> {
        let config = self.documents.latest_named(CONFIG_COLLECTION, name).await?;
        if config.is_none() {
            warn!(name, "No configuration found");
        }
        Ok(config)
    }

    /// Most recent configuration, deserialized.
    pub async fn get_config_as<T: DeserializeOwned>(&self, name: &str) -> GridResult<Option<T>> {
        self.get_config(name)
            .await?
            .map(|v| serde_json::from_value(v).map_err(GridError::from))
            .transpose()
    }

    pub async fn write_config_value<T: Serialize + Sync>(&self, name: &str, config: &T) -> GridResult<()> {
        self.write_config(name, &serde_json::to_value(config)?).await
    }

    pub async fn list_configs(&self) -> GridResult<Vec<String>> {
        self.documents.list_names(CONFIG_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use chrono::TimeZone;
    use rainfields_common::{Crs, GridGeometry};
    use serde_json::json;

    fn domain(cell_size: f64) -> Domain {
        Domain {
            id: "AKL".to_string(),
            geometry: GridGeometry {
                start_x: 1_627_000.0,
                start_y: 5_854_000.0,
                cell_size,
                n_rows: 128,
                n_cols: 128,
            },
            crs: Crs::epsg("EPSG:2193"),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_put_domain_is_write_once() {
        let registry = DomainRegistry::new(Arc::new(MemoryDocumentStore::new()));
        registry.put_domain(&domain(2000.0)).await.unwrap();
        registry.put_domain(&domain(2000.0)).await.unwrap();

        let err = registry.put_domain(&domain(1000.0)).await.unwrap_err();
        assert!(matches!(err, GridError::DomainConflict(ref id) if id == "AKL"));
        assert_eq!(registry.get_domain("AKL").await.unwrap(), Some(domain(2000.0)));
        assert_eq!(registry.list_domains().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_keep_one_domain() {
        let registry = DomainRegistry::new(Arc::new(MemoryDocumentStore::new()));
        let coarse = domain(2000.0);
        let fine = domain(1000.0);

        let (a, b) = tokio::join!(registry.put_domain(&coarse), registry.put_domain(&fine));
        let stored = registry.get_domain("AKL").await.unwrap().unwrap();

        match (a, b) {
            (Ok(()), Err(GridError::DomainConflict(_))) => assert_eq!(stored, coarse),
            (Err(GridError::DomainConflict(_)), Ok(())) => assert_eq!(stored, fine),
            other => panic!("expected exactly one registration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_put_domain_validates_id() {
        let registry = DomainRegistry::new(Arc::new(MemoryDocumentStore::new()));
        let mut bad = domain(2000.0);
        bad.id = "AKL/x".to_string();
        assert!(matches!(
            registry.put_domain(&bad).await,
            Err(GridError::InvalidKey(_))
        ));
        assert_eq!(registry.get_domain("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_config_latest_revision_wins() {
        let registry = ConfigRegistry::new(Arc::new(MemoryDocumentStore::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        registry
            .write_config_at("AKL", &json!({"n_cascade_levels": 6}), t0 + chrono::Duration::hours(1))
            .await
            .unwrap();
        registry
            .write_config_at("AKL", &json!({"n_cascade_levels": 8}), t0)
            .await
            .unwrap();

        assert_eq!(
            registry.get_config("AKL").await.unwrap(),
            Some(json!({"n_cascade_levels": 6}))
        );
        assert_eq!(registry.get_config("WLG").await.unwrap(), None);
        assert_eq!(registry.list_configs().await.unwrap(), vec!["AKL"]);
    }
}
