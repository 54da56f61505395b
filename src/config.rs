//! Configuration for CmdbStore
//!
//! Provides a builder pattern for configuring the store.

use std::time::Duration;

/// Length ceilings for character attributes
#[derive(Debug, Clone, Copy)]
pub struct CharLimits {
    /// Maximum characters in a `singlechar` value
    pub single: usize,
    /// Maximum characters in a `longchar` value
    pub long: usize,
}

impl Default for CharLimits {
    fn default() -> Self {
        Self {
            single: 256,
            long: 2000,
        }
    }
}

/// Named-lock timing used by association cardinality enforcement
#[derive(Debug, Clone, Copy)]
pub struct LockTiming {
    /// How long an acquisition may block before failing with "operation in progress"
    pub timeout: Duration,
    /// Lease lifetime; an abandoned lock frees itself after this long
    pub ttl: Duration,
    /// Pause between acquisition attempts
    pub retry_interval: Duration,
}

impl Default for LockTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            ttl: Duration::from_secs(60),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// Configuration for the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prefix for backend tables (default: "cmdb_")
    pub table_prefix: String,
    /// Collection holding instances of models without a dedicated collection
    pub shared_instance_collection: String,
    /// Character attribute ceilings
    pub char_limits: CharLimits,
    /// Named-lock timing
    pub lock: LockTiming,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfigBuilder::new().build()
    }
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    table_prefix: String,
    shared_instance_collection: String,
    char_limits: CharLimits,
    lock: LockTiming,
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            table_prefix: "cmdb_".to_string(),
            shared_instance_collection: "object_instance".to_string(),
            char_limits: CharLimits::default(),
            lock: LockTiming::default(),
        }
    }

    /// Set the backend table prefix (default: "cmdb_")
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Set the shared instance collection name (default: "object_instance")
    pub fn shared_instance_collection(mut self, name: impl Into<String>) -> Self {
        self.shared_instance_collection = name.into();
        self
    }

    /// Set the `singlechar` length ceiling (default: 256)
    pub fn single_char_max_len(mut self, len: usize) -> Self {
        self.char_limits.single = len;
        self
    }

    /// Set the `longchar` length ceiling (default: 2000)
    pub fn long_char_max_len(mut self, len: usize) -> Self {
        self.char_limits.long = len;
        self
    }

    /// Set the lock acquisition timeout (default: 20s)
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock.timeout = timeout;
        self
    }

    /// Set the lock lease lifetime (default: 60s)
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock.ttl = ttl;
        self
    }

    /// Set the pause between lock attempts (default: 50ms)
    pub fn lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock.retry_interval = interval;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            table_prefix: self.table_prefix,
            shared_instance_collection: self.shared_instance_collection,
            char_limits: self.char_limits,
            lock: self.lock,
        }
    }
}
