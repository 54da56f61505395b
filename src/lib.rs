//! # runtara-cmdb
//!
//! A schema-driven configuration-management object store.
//!
//! Models, their attributes, uniqueness rules and typed associations are data, declared
//! at runtime. Instances are untyped documents validated against the declared attributes
//! and stored through a [`DocumentStore`] backend (Postgres JSONB or in-memory).
//!
//! ## Features
//!
//! - **Condition trees**: build, merge, serialize and parse `$and/$or/$not/$nor` filter documents
//! - **Validation**: typed attributes with ranges, enums, patterns, defaults and required fields
//! - **Uniqueness**: single- and multi-key unique constraints, rechecked against live data when declared
//! - **Associations**: 1:1, 1:n and n:n model associations with cardinality enforced under named locks
//! - **Tenancy**: every operation is scoped by the owner id in the explicit [`RequestContext`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use runtara_cmdb::{
//!     AttributeType, CmdbStore, CreateAttributeRequest, CreateClassificationRequest,
//!     CreateModelRequest, RequestContext, StoreConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CmdbStore::connect("postgres://localhost/cmdb", StoreConfig::default()).await?;
//!     let ctx = RequestContext::new("tenant-1");
//!     store.init(&ctx).await?;
//!
//!     store
//!         .create_classification(&ctx, CreateClassificationRequest::new("infra", "Infrastructure"))
//!         .await?;
//!     store
//!         .create_model(&ctx, CreateModelRequest::new("host", "infra", "Host"))
//!         .await?;
//!     store
//!         .create_attribute(
//!             &ctx,
//!             "host",
//!             CreateAttributeRequest::new("asset_id", "Asset ID", AttributeType::single_char()).required(),
//!         )
//!         .await?;
//!
//!     let data = json!({"asset_id": "A-001"});
//!     let host = store
//!         .create_instance(&ctx, "host", data.as_object().cloned().unwrap_or_default())
//!         .await?;
//!     println!("created host {}", host.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use runtara_cmdb::StoreConfig;
//!
//! let config = StoreConfig::builder()
//!     .table_prefix("cmdb_")                      // Postgres table prefix
//!     .shared_instance_collection("object_instance")
//!     .single_char_max_len(256)
//!     .lock_timeout(Duration::from_secs(20))      // 1:1 / 1:n lock wait
//!     .build();
//! assert_eq!(config.lock.timeout, Duration::from_secs(20));
//! ```
//!
//! ## Multi-Tenancy
//!
//! Tenants share collections. Every record carries `ownerId` and every query filters on
//! the owner id of the [`RequestContext`] passed to the operation.

pub mod association;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod lock;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod store;
pub mod types;
pub mod unique;
pub mod validator;

// Re-export main types for convenience
pub use association::{
    AssociationEngine, AssociationKind, CreateInstanceAssociationRequest, CreateKindRequest,
    CreateModelAssociationRequest, Direction, InstanceAssociation, Mapping, ModelAssociation,
    OnDelete, UpdateKindRequest,
};
pub use catalog::{AttributeCatalog, InstanceLocation, SchemaCatalog};
pub use condition::{ConditionTree, Element, FieldOperator, Operator, equals};
pub use config::{CharLimits, LockTiming, StoreConfig, StoreConfigBuilder};
pub use context::RequestContext;
pub use error::{CmdbError, ErrorKind, Result, Violation};
pub use instance::{BatchFailure, BatchResult, Created, Instance, QueryOptions, QueryResult};
pub use lock::{LockService, MemoryLockService, PgLockService};
pub use schema::{
    Attribute, AttributeGroup, Classification, CreateAttributeRequest,
    CreateClassificationRequest, CreateGroupRequest, CreateModelRequest, Model,
    UpdateAttributeRequest, UpdateClassificationRequest, UpdateGroupRequest, UpdateModelRequest,
};
pub use storage::{Document, DocumentStore, FindOptions, MemoryStore, PgDocumentStore, SortField};
pub use store::CmdbStore;
pub use types::{AttributeType, EnumOption};
pub use unique::{CreateUniqueRequest, UniqueConstraint, UniquenessEngine, UpdateUniqueRequest};
pub use validator::Validator;
