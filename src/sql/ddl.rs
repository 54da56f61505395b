//! DDL Generation for the document tables
//!
//! Every collection lives in its own `(seq BIGSERIAL, doc JSONB)` table named
//! `{table_prefix}{collection}`. Two bookkeeping tables hold id sequences and lock leases.

use crate::config::StoreConfig;
use crate::sql::sanitize::{MAX_IDENTIFIER_LEN, quote_identifier, validate_identifier};

/// DDL Generator for collection tables
pub struct DdlGenerator<'a> {
    config: &'a StoreConfig,
}

impl<'a> DdlGenerator<'a> {
    /// Create a new DDL generator with the given configuration
    pub fn new(config: &'a StoreConfig) -> Self {
        Self { config }
    }

    /// Unquoted table name for a collection
    ///
    /// Returns an error when the collection name is not a valid identifier or the
    /// prefixed name would be truncated by PostgreSQL.
    pub fn table_name(&self, collection: &str) -> Result<String, String> {
        validate_identifier(collection, &[])?;
        let table = format!("{}{}", self.config.table_prefix, collection);
        if table.len() > MAX_IDENTIFIER_LEN {
            return Err(format!(
                "Table name '{}' is longer than {} characters",
                table, MAX_IDENTIFIER_LEN
            ));
        }
        Ok(table)
    }

    /// Name of the id sequence table
    pub fn sequence_table(&self) -> String {
        format!("{}sequence", self.config.table_prefix)
    }

    /// Name of the lock lease table
    pub fn lease_table(&self) -> String {
        format!("{}lock_lease", self.config.table_prefix)
    }

    /// Generate CREATE TABLE statement for a collection
    pub fn generate_create_collection(&self, table_name: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL PRIMARY KEY, doc JSONB NOT NULL)",
            quote_identifier(table_name)
        )
    }

    /// Generate the GIN index supporting containment lookups on `doc`
    pub fn generate_collection_index(&self, table_name: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (doc jsonb_path_ops)",
            quote_identifier(&format!("idx_{}_doc", table_name)),
            quote_identifier(table_name)
        )
    }

    /// Generate DROP TABLE statement
    pub fn generate_drop_table(&self, table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table_name))
    }

    /// Generate the id sequence table
    pub fn generate_create_sequence_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, value BIGINT NOT NULL)",
            quote_identifier(&self.sequence_table())
        )
    }

    /// Generate the atomic increment-and-return statement for a named sequence
    pub fn generate_next_sequence(&self) -> String {
        let table = quote_identifier(&self.sequence_table());
        format!(
            "INSERT INTO {table} (name, value) VALUES ($1, 1) \
             ON CONFLICT (name) DO UPDATE SET value = {table}.value + 1 \
             RETURNING value"
        )
    }

    /// Generate the lock lease table
    pub fn generate_create_lease_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, holder TEXT NOT NULL, expires_at TIMESTAMPTZ NOT NULL)",
            quote_identifier(&self.lease_table())
        )
    }

    /// Generate the lease acquisition statement: takes the key when free, expired, or
    /// already held by the same holder. Returns a row only on success.
    pub fn generate_acquire_lease(&self) -> String {
        let table = quote_identifier(&self.lease_table());
        format!(
            "INSERT INTO {table} (key, holder, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision)) \
             ON CONFLICT (key) DO UPDATE SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at \
             WHERE {table}.expires_at < NOW() OR {table}.holder = EXCLUDED.holder \
             RETURNING key"
        )
    }

    /// Generate the lease release statement
    pub fn generate_release_lease(&self) -> String {
        format!(
            "DELETE FROM {} WHERE key = $1 AND holder = $2",
            quote_identifier(&self.lease_table())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StoreConfig {
        StoreConfig::builder().table_prefix("t_").build()
    }

    // =========================================================================
    // Table Name Tests
    // =========================================================================

    #[test]
    fn test_table_name_prefixed() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(ddl.table_name("model").unwrap(), "t_model");
        assert_eq!(ddl.table_name("inst_asst_host").unwrap(), "t_inst_asst_host");
    }

    #[test]
    fn test_table_name_rejects_invalid() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert!(ddl.table_name("Model").is_err());
        assert!(ddl.table_name("a;drop").is_err());
        assert!(ddl.table_name(&"a".repeat(62)).is_err());
    }

    // =========================================================================
    // Statement Tests
    // =========================================================================

    #[test]
    fn test_create_collection() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        let sql = ddl.generate_create_collection("t_host");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"t_host\""));
        assert!(sql.contains("seq BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("doc JSONB NOT NULL"));
    }

    #[test]
    fn test_collection_index() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        let sql = ddl.generate_collection_index("t_host");
        assert!(sql.contains("\"idx_t_host_doc\""));
        assert!(sql.contains("USING GIN (doc jsonb_path_ops)"));
    }

    #[test]
    fn test_drop_table() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert_eq!(
            ddl.generate_drop_table("t_host"),
            "DROP TABLE IF EXISTS \"t_host\" CASCADE"
        );
    }

    #[test]
    fn test_sequence_statements() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert!(ddl.generate_create_sequence_table().contains("\"t_sequence\""));
        let sql = ddl.generate_next_sequence();
        assert!(sql.contains("ON CONFLICT (name) DO UPDATE"));
        assert!(sql.contains("\"t_sequence\".value + 1"));
        assert!(sql.ends_with("RETURNING value"));
    }

    #[test]
    fn test_lease_statements() {
        let config = config();
        let ddl = DdlGenerator::new(&config);
        assert!(ddl.generate_create_lease_table().contains("\"t_lock_lease\""));
        let sql = ddl.generate_acquire_lease();
        assert!(sql.contains("expires_at < NOW()"));
        assert!(sql.contains("holder = EXCLUDED.holder"));
        assert!(ddl.generate_release_lease().contains("holder = $2"));
    }
}
