//! Document store seam
//!
//! The engines talk to storage only through [`DocumentStore`]. Records are JSON
//! documents grouped into named collections and filtered with [`ConditionTree`]s.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::condition::ConditionTree;
use crate::error::{CmdbError, Result};

/// A stored record
pub type Document = Map<String, Value>;

/// One sort key; `-field` sorts descending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parse `name` or `-name`
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(spec.strip_prefix('+').unwrap_or(spec)),
        }
    }
}

/// Sort, paging and projection for [`DocumentStore::find`]
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<SortField>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Keys to keep in returned documents; empty keeps everything
    pub fields: Vec<String>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

/// A set of records sharing the same key tuple
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// Key values in the order the keys were requested; missing keys are `null`
    pub values: Vec<Value>,
    pub count: u64,
}

/// Collection-oriented document storage
///
/// "Not found" is an empty result, never an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &ConditionTree,
        options: &FindOptions,
    ) -> Result<Vec<Document>>;

    async fn find_one(&self, collection: &str, filter: &ConditionTree) -> Result<Option<Document>> {
        let docs = self
            .find(collection, filter, &FindOptions::new().limit(1))
            .await?;
        Ok(docs.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: &ConditionTree) -> Result<u64>;

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<()>;

    /// Overwrite the keys of `set` on every matching document; returns the match count
    async fn update(&self, collection: &str, filter: &ConditionTree, set: &Document) -> Result<u64>;

    /// Delete every matching document; returns the deleted count
    async fn delete(&self, collection: &str, filter: &ConditionTree) -> Result<u64>;

    /// Atomically increment and return the named counter, starting at 1
    async fn next_sequence(&self, name: &str) -> Result<u64>;

    /// First group of matching documents sharing the values of `keys`, if any group has
    /// more than one member
    async fn find_duplicate_group(
        &self,
        collection: &str,
        filter: &ConditionTree,
        keys: &[String],
    ) -> Result<Option<DuplicateGroup>>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

/// Serialize a record into a stored document
pub(crate) fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(CmdbError::storage(format!(
            "Record did not serialize to an object: {}",
            other
        ))),
    }
}

/// Deserialize a stored document into a record
pub(crate) fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Update set turning `old` into `new`: keys dropped from `new` are set to `null`
pub(crate) fn replacement(old: &Document, mut new: Document) -> Document {
    for key in old.keys() {
        if !new.contains_key(key) {
            new.insert(key.clone(), Value::Null);
        }
    }
    new
}

/// Keep only the requested keys (dotted keys keep their top-level parent)
pub(crate) fn project(doc: Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return doc;
    }
    doc.into_iter()
        .filter(|(key, _)| {
            fields
                .iter()
                .any(|f| f == key || f.split('.').next() == Some(key.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_field_parse() {
        assert_eq!(SortField::parse("-name"), SortField::desc("name"));
        assert_eq!(SortField::parse("name"), SortField::asc("name"));
        assert_eq!(SortField::parse("+name"), SortField::asc("name"));
    }

    #[test]
    fn test_find_options_builder() {
        let opts = FindOptions::new()
            .sort(SortField::asc("a"))
            .limit(10)
            .offset(5)
            .fields(vec!["a".to_string()]);
        assert_eq!(opts.sort.len(), 1);
        assert_eq!(opts.limit, Some(10));
        assert_eq!(opts.offset, 5);
        assert_eq!(opts.fields, vec!["a".to_string()]);
    }

    #[test]
    fn test_replacement_nulls_dropped_keys() {
        let Value::Object(old) = json!({"a": 1, "min": 3}) else { unreachable!() };
        let Value::Object(new) = json!({"a": 2}) else { unreachable!() };
        assert_eq!(Value::Object(replacement(&old, new)), json!({"a": 2, "min": null}));
    }

    #[test]
    fn test_project() {
        let doc = json!({"a": 1, "b": {"c": 2}, "d": 3});
        let Value::Object(doc) = doc else { unreachable!() };
        let projected = project(doc.clone(), &["a".to_string(), "b.c".to_string()]);
        assert_eq!(Value::Object(projected), json!({"a": 1, "b": {"c": 2}}));
        assert_eq!(project(doc.clone(), &[]), doc);
    }
}
