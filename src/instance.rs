//! Instance-related types for the CMDB store
//!
//! Includes Instance, QueryOptions, QueryResult and the BatchResult produced by
//! many-item writes.

use serde::Serialize;
use serde_json::Value;

use crate::condition::ConditionTree;
use crate::error::{CmdbError, ErrorKind, Result};
use crate::storage::{Document, FindOptions, SortField};

/// An instance document together with its model and id
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Value of the model's id field
    pub id: u64,
    pub object_id: String,
    /// Full stored document, system fields included
    pub data: Document,
}

impl Instance {
    /// Read a field of the stored document
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }
}

/// Filter, sort and paging for instance and association searches
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub condition: ConditionTree,
    pub sort: Vec<SortField>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Fields to return; empty returns whole documents
    pub fields: Vec<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition(mut self, condition: ConditionTree) -> Self {
        self.condition = condition;
        self
    }

    /// Add a sort key, `-field` for descending
    pub fn sort_by(mut self, spec: &str) -> Self {
        self.sort.push(SortField::parse(spec));
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

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn find_options(&self) -> FindOptions {
        FindOptions {
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset,
            fields: self.fields.clone(),
        }
    }
}

/// One page of a search plus the total match count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult<T> {
    pub count: u64,
    pub items: Vec<T>,
}

/// A successful batch item
#[derive(Debug, Clone, PartialEq)]
pub struct Created<T> {
    pub origin_index: usize,
    pub value: T,
}

/// A failed batch item
#[derive(Debug)]
pub struct BatchFailure {
    pub origin_index: usize,
    pub error: CmdbError,
}

/// Outcome of a many-item write; every entry keeps its input index
#[derive(Debug)]
pub struct BatchResult<T> {
    pub created: Vec<Created<T>>,
    /// Items rejected as duplicates
    pub repeated: Vec<BatchFailure>,
    pub exceptions: Vec<BatchFailure>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            repeated: Vec::new(),
            exceptions: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    /// Record the outcome of the item at `origin_index`
    pub fn push(&mut self, origin_index: usize, result: Result<T>) {
        match result {
            Ok(value) => self.created.push(Created {
                origin_index,
                value,
            }),
            Err(error) if error.kind() == ErrorKind::Duplicate => {
                self.repeated.push(BatchFailure {
                    origin_index,
                    error,
                })
            }
            Err(error) => self.exceptions.push(BatchFailure {
                origin_index,
                error,
            }),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.repeated.is_empty() && self.exceptions.is_empty()
    }
}

impl<T> FromIterator<Result<T>> for BatchResult<T> {
    fn from_iter<I: IntoIterator<Item = Result<T>>>(iter: I) -> Self {
        let mut batch = BatchResult::default();
        for (index, result) in iter.into_iter().enumerate() {
            batch.push(index, result);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;

    #[test]
    fn test_query_options_builder() {
        let opts = QueryOptions::new()
            .sort_by("-createTime")
            .sort_by("name")
            .limit(20)
            .offset(40)
            .fields(["name", "instId"]);
        assert_eq!(opts.sort, vec![SortField::desc("createTime"), SortField::asc("name")]);

        let find = opts.find_options();
        assert_eq!(find.limit, Some(20));
        assert_eq!(find.offset, 40);
        assert_eq!(find.fields, vec!["name".to_string(), "instId".to_string()]);
    }

    #[test]
    fn test_batch_result_keeps_indices() {
        let results: Vec<Result<u64>> = vec![
            Ok(10),
            Err(CmdbError::DuplicateUnique {
                object_id: "host".into(),
                fields: vec!["asset_id".into()],
            }),
            Err(CmdbError::validation("asset_id", Violation::Missing)),
            Ok(11),
        ];
        let batch: BatchResult<u64> = results.into_iter().collect();

        let created: Vec<(usize, u64)> =
            batch.created.iter().map(|c| (c.origin_index, c.value)).collect();
        assert_eq!(created, vec![(0, 10), (3, 11)]);
        assert_eq!(batch.repeated.len(), 1);
        assert_eq!(batch.repeated[0].origin_index, 1);
        assert_eq!(batch.exceptions.len(), 1);
        assert_eq!(batch.exceptions[0].origin_index, 2);
        assert!(!batch.is_complete_success());
    }
}
