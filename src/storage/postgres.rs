//! PostgreSQL document store
//!
//! One `(seq, doc JSONB)` table per collection, created on first use. Filters are
//! translated with [`build_filter_clause`] and every value reaches the database as a
//! bind parameter.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use super::{Document, DocumentStore, DuplicateGroup, FindOptions, project};
use crate::condition::ConditionTree;
use crate::config::StoreConfig;
use crate::error::{CmdbError, Result};
use crate::sql::ddl::DdlGenerator;
use crate::sql::filter::{SqlParam, build_filter_clause, build_order_by_clause, json_path};
use crate::sql::sanitize::quote_identifier;

/// Document store backed by PostgreSQL JSONB tables
pub struct PgDocumentStore {
    pool: PgPool,
    config: StoreConfig,
    /// Tables known to exist
    ensured: Mutex<HashSet<String>>,
}

impl PgDocumentStore {
    /// Create a store on an existing pool and make sure the sequence table exists
    pub async fn new(pool: PgPool, config: StoreConfig) -> Result<Self> {
        let ddl = DdlGenerator::new(&config);
        sqlx::query(&ddl.generate_create_sequence_table())
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            config,
            ensured: Mutex::new(HashSet::new()),
        })
    }

    /// Connect to `database_url` and create a store
    pub async fn connect(database_url: &str, config: StoreConfig) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| CmdbError::storage(format!("Database connection failed: {}", e)))?;
        Self::new(pool, config).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolve the table for a collection, creating it on first use
    async fn table(&self, collection: &str) -> Result<String> {
        let ddl = DdlGenerator::new(&self.config);
        let table = ddl
            .table_name(collection)
            .map_err(CmdbError::invalid_argument)?;
        if self.ensured.lock().contains(&table) {
            return Ok(table);
        }

        debug!(table = %table, "creating collection table");
        sqlx::query(&ddl.generate_create_collection(&table))
            .execute(&self.pool)
            .await?;
        sqlx::query(&ddl.generate_collection_index(&table))
            .execute(&self.pool)
            .await?;
        self.ensured.lock().insert(table.clone());
        Ok(table)
    }

    fn bind_param<'q>(
        query: Query<'q, Postgres, PgArguments>,
        param: SqlParam,
    ) -> Query<'q, Postgres, PgArguments> {
        match param {
            SqlParam::Path(path) => query.bind(path),
            SqlParam::Json(value) => query.bind(value),
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Int(int) => query.bind(int),
        }
    }

    fn bind_all<'q>(
        mut query: Query<'q, Postgres, PgArguments>,
        params: Vec<SqlParam>,
    ) -> Query<'q, Postgres, PgArguments> {
        for param in params {
            query = Self::bind_param(query, param);
        }
        query
    }

    fn to_document(value: Value) -> Result<Document> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(CmdbError::storage(format!(
                "Stored document is not an object: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &ConditionTree,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let table = self.table(collection).await?;
        let mut offset = 1;
        let (where_clause, mut params) = build_filter_clause(filter, &mut offset)?;
        let (order_clause, order_params) = build_order_by_clause(&options.sort, &mut offset);
        params.extend(order_params);

        let mut sql = format!(
            "SELECT doc FROM {} WHERE {} {}",
            quote_identifier(&table),
            where_clause,
            order_clause
        );
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT ${}", offset));
            offset += 1;
            params.push(SqlParam::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        if options.offset > 0 {
            sql.push_str(&format!(" OFFSET ${}", offset));
            params.push(SqlParam::Int(
                i64::try_from(options.offset).unwrap_or(i64::MAX),
            ));
        }

        let rows = Self::bind_all(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let doc: Value = row.try_get("doc")?;
                Ok(project(Self::to_document(doc)?, &options.fields))
            })
            .collect()
    }

    async fn count(&self, collection: &str, filter: &ConditionTree) -> Result<u64> {
        let table = self.table(collection).await?;
        let mut offset = 1;
        let (where_clause, params) = build_filter_clause(filter, &mut offset)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_identifier(&table),
            where_clause
        );

        let mut query = sqlx::query_as::<_, (i64,)>(&sql);
        for param in params {
            query = match param {
                SqlParam::Path(path) => query.bind(path),
                SqlParam::Json(value) => query.bind(value),
                SqlParam::Text(text) => query.bind(text),
                SqlParam::Int(int) => query.bind(int),
            };
        }
        let (count,) = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let table = self.table(collection).await?;
        let sql = format!("INSERT INTO {} (doc) VALUES ($1)", quote_identifier(&table));

        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(&sql)
                .bind(Value::Object(doc))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, collection: &str, filter: &ConditionTree, set: &Document) -> Result<u64> {
        let table = self.table(collection).await?;
        let mut offset = 2;
        let (where_clause, params) = build_filter_clause(filter, &mut offset)?;
        let sql = format!(
            "UPDATE {} SET doc = doc || $1::jsonb WHERE {}",
            quote_identifier(&table),
            where_clause
        );

        let query = sqlx::query(&sql).bind(Value::Object(set.clone()));
        let result = Self::bind_all(query, params).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, collection: &str, filter: &ConditionTree) -> Result<u64> {
        let table = self.table(collection).await?;
        let mut offset = 1;
        let (where_clause, params) = build_filter_clause(filter, &mut offset)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(&table),
            where_clause
        );

        let result = Self::bind_all(sqlx::query(&sql), params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let ddl = DdlGenerator::new(&self.config);
        let (value,) = sqlx::query_as::<_, (i64,)>(&ddl.generate_next_sequence())
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(value)
            .map_err(|_| CmdbError::storage(format!("Sequence '{}' is negative", name)))
    }

    async fn find_duplicate_group(
        &self,
        collection: &str,
        filter: &ConditionTree,
        keys: &[String],
    ) -> Result<Option<DuplicateGroup>> {
        let table = self.table(collection).await?;
        let mut offset = 1;
        let (where_clause, mut params) = build_filter_clause(filter, &mut offset)?;

        let mut key_exprs = Vec::with_capacity(keys.len());
        for key in keys {
            key_exprs.push(format!("doc #> ${}::text[]", offset));
            params.push(SqlParam::Path(json_path(key)));
            offset += 1;
        }

        let sql = format!(
            "SELECT jsonb_build_array({}) AS key, COUNT(*) AS n FROM {} WHERE {} \
             GROUP BY 1 HAVING COUNT(*) > 1 LIMIT 1",
            key_exprs.join(", "),
            quote_identifier(&table),
            where_clause
        );

        let row = Self::bind_all(sqlx::query(&sql), params)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let key: Value = row.try_get("key")?;
        let count: i64 = row.try_get("n")?;
        let values = match key {
            Value::Array(values) => values,
            other => vec![other],
        };
        Ok(Some(DuplicateGroup {
            values,
            count: count.max(0) as u64,
        }))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let ddl = DdlGenerator::new(&self.config);
        let table = ddl
            .table_name(collection)
            .map_err(CmdbError::invalid_argument)?;
        sqlx::query(&ddl.generate_drop_table(&table))
            .execute(&self.pool)
            .await?;
        self.ensured.lock().remove(&table);
        Ok(())
    }
}
