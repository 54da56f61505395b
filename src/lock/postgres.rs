//! Lease table in PostgreSQL, shared by every process using the same database

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::LockService;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::sql::ddl::DdlGenerator;

/// Lock service backed by the `{prefix}lock_lease` table
pub struct PgLockService {
    pool: PgPool,
    acquire_sql: String,
    release_sql: String,
}

impl PgLockService {
    /// Create the lease table if needed
    pub async fn new(pool: PgPool, config: &StoreConfig) -> Result<Self> {
        let ddl = DdlGenerator::new(config);
        sqlx::query(&ddl.generate_create_lease_table())
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            acquire_sql: ddl.generate_acquire_lease(),
            release_sql: ddl.generate_release_lease(),
        })
    }
}

#[async_trait]
impl LockService for PgLockService {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let row = sqlx::query(&self.acquire_sql)
            .bind(key)
            .bind(holder)
            .bind(ttl.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        sqlx::query(&self.release_sql)
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
