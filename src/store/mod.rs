//! CmdbStore - main entry point for the schema-driven CMDB object store
//!
//! Ties the schema records, the instance collections, the uniqueness engine and the
//! association engine together over one [`DocumentStore`] and one [`LockService`].

mod instance;
mod model;

use std::sync::Arc;

use sqlx::PgPool;

use crate::association::AssociationEngine;
use crate::catalog::SchemaCatalog;
use crate::config::StoreConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::lock::{LockService, MemoryLockService, PgLockService};
use crate::storage::{DocumentStore, MemoryStore, PgDocumentStore};
use crate::unique::UniquenessEngine;

/// Schema-driven CMDB store
///
/// Cheap to clone; clones share the backend, the lock service and the engines.
#[derive(Clone)]
pub struct CmdbStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<dyn DocumentStore>,
    config: StoreConfig,
    catalog: SchemaCatalog,
    unique: UniquenessEngine,
    associations: AssociationEngine,
}

impl CmdbStore {
    /// Create a store over explicit backends
    pub fn new(
        db: Arc<dyn DocumentStore>,
        locks: Arc<dyn LockService>,
        config: StoreConfig,
    ) -> Self {
        let catalog = SchemaCatalog::new(Arc::clone(&db), config.clone());
        let unique = UniquenessEngine::new(catalog.clone());
        let associations = AssociationEngine::new(catalog.clone(), locks);
        Self {
            inner: Arc::new(Inner {
                db,
                config,
                catalog,
                unique,
                associations,
            }),
        }
    }

    /// Create a store kept entirely in process memory
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLockService::new()),
            config,
        )
    }

    /// Create a Postgres-backed store from an existing pool
    ///
    /// Use this when the pool is shared with the rest of the application.
    pub async fn from_pool(pool: PgPool, config: StoreConfig) -> Result<Self> {
        let locks = PgLockService::new(pool.clone(), &config).await?;
        let db = PgDocumentStore::new(pool, config.clone()).await?;
        Ok(Self::new(Arc::new(db), Arc::new(locks), config))
    }

    /// Connect to Postgres and create a store
    pub async fn connect(database_url: &str, config: StoreConfig) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Self::from_pool(pool, config).await
    }

    /// Seed the tenant's preset association kinds; safe to call repeatedly
    pub async fn init(&self, ctx: &RequestContext) -> Result<()> {
        self.inner.associations.seed_preset_kinds(ctx).await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Schema lookups
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.inner.catalog
    }

    /// Unique constraint management
    pub fn unique(&self) -> &UniquenessEngine {
        &self.inner.unique
    }

    /// Association kinds, model associations and instance edges
    pub fn associations(&self) -> &AssociationEngine {
        &self.inner.associations
    }

    fn db(&self) -> &dyn DocumentStore {
        self.inner.db.as_ref()
    }
}
