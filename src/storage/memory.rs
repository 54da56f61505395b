//! In-process document store
//!
//! Evaluates ConditionTrees with the in-memory matcher. Used by tests and by embedders
//! that do not need persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Document, DocumentStore, DuplicateGroup, FindOptions, project};
use crate::condition::{ConditionTree, lookup, sort_order};
use crate::error::Result;

/// Document store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    sequences: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection, ignoring filters
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

/// Numbers compare by value, so `1` and `1.0` must land in the same group
fn numeric_key(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map(Value::from).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(numeric_key).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), numeric_key(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &ConditionTree,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let mut matched: Vec<Document> = {
            let collections = self.collections.lock();
            collections
                .get(collection)
                .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
                .unwrap_or_default()
        };

        if !options.sort.is_empty() {
            // stable sort keeps insertion order as the tiebreaker
            matched.sort_by(|a, b| {
                for field in &options.sort {
                    let ord = sort_order(lookup(a, &field.field), lookup(b, &field.field));
                    let ord = if field.descending { ord.reverse() } else { ord };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = usize::try_from(options.offset).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|d| project(d, &options.fields))
            .collect())
    }

    async fn count(&self, collection: &str, filter: &ConditionTree) -> Result<u64> {
        let collections = self.collections.lock();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(())
    }

    async fn update(&self, collection: &str, filter: &ConditionTree, set: &Document) -> Result<u64> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut updated = 0;
        for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
            for (key, value) in set {
                doc.insert(key.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, collection: &str, filter: &ConditionTree) -> Result<u64> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let mut sequences = self.sequences.lock();
        let value = sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn find_duplicate_group(
        &self,
        collection: &str,
        filter: &ConditionTree,
        keys: &[String],
    ) -> Result<Option<DuplicateGroup>> {
        let collections = self.collections.lock();
        let Some(docs) = collections.get(collection) else {
            return Ok(None);
        };

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for doc in docs.iter().filter(|d| filter.matches(d)) {
            let values: Vec<Value> = keys
                .iter()
                .map(|k| lookup(doc, k).cloned().unwrap_or(Value::Null))
                .collect();
            let group_key = Value::Array(values.iter().map(numeric_key).collect()).to_string();
            match index.get(&group_key) {
                Some(&i) => groups[i].count += 1,
                None => {
                    index.insert(group_key, groups.len());
                    groups.push(DuplicateGroup { values, count: 1 });
                }
            }
        }
        Ok(groups.into_iter().find(|g| g.count > 1))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections.lock().remove(collection);
        Ok(())
    }
}
