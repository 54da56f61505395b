//! Condition builder
//!
//! Builds, merges and serializes boolean filter trees to and from the document filter
//! wire format, and evaluates them against documents in memory.
//!
//! ```
//! use runtara_cmdb::condition::{ConditionTree, FieldOperator};
//!
//! let mut tree = ConditionTree::new();
//! tree.element([FieldOperator::gte("age", 15)])
//!     .and([FieldOperator::lt("age", 75)]);
//! assert_eq!(
//!     tree.to_filter_string(),
//!     r#"{"age":{"$gte":15},"$and":[{"age":{"$lt":75}}]}"#
//! );
//! ```

mod matcher;
mod operator;
mod parse;
mod tree;

pub(crate) use matcher::{lookup, sort_order};
pub use operator::{AND, Element, FieldOperator, NOR, NOT, OPTIONS, OR, Operator};
pub use tree::{Clause, ConditionTree, equals};
