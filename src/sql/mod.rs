//! SQL utilities for the Postgres backend
//!
//! Provides DDL generation, identifier sanitization, and ConditionTree translation.

pub mod ddl;
pub mod filter;
pub mod sanitize;

pub use ddl::DdlGenerator;
pub use filter::{SqlParam, build_filter_clause, build_order_by_clause, json_path};
pub use sanitize::{quote_identifier, validate_identifier, validate_property_id};
