//! Filter document → ConditionTree

use serde_json::{Map, Value};

use super::operator::{AND, Element, FieldOperator, NOR, NOT, OR, Operator};
use super::tree::{Clause, ConditionTree};
use crate::error::{CmdbError, Result};

impl ConditionTree {
    /// Parse a wire filter document.
    ///
    /// - `$and`/`$or`/`$not`/`$nor` take arrays of sub-filter documents
    /// - a field whose value is a non-empty document made only of comparison operators
    ///   becomes one [`FieldOperator`] per operator
    /// - a document containing `$regex` is kept opaque together with its `$options`
    /// - any other non-empty document is an embedded sub-condition
    /// - scalars, arrays and `{}` are implicit-equality key/values
    pub fn parse(filter: &Value) -> Result<Self> {
        match filter {
            Value::Object(doc) => parse_document(doc),
            other => Err(CmdbError::invalid_condition(format!(
                "filter must be a document, got {}",
                other
            ))),
        }
    }

    /// Parse JSON filter text
    pub fn parse_str(filter: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(filter)?;
        Self::parse(&value)
    }
}

fn parse_document(doc: &Map<String, Value>) -> Result<ConditionTree> {
    let mut tree = ConditionTree::new();
    for (key, value) in doc {
        match key.as_str() {
            AND => {
                tree.and(parse_clauses(key, value)?);
            }
            OR => {
                tree.or(parse_clauses(key, value)?);
            }
            NOT => {
                tree.not(parse_clauses(key, value)?);
            }
            NOR => {
                tree.nor(parse_clauses(key, value)?);
            }
            _ if Operator::from_key(key).is_some() => {
                return Err(CmdbError::invalid_condition(format!(
                    "operator {} must be applied to a field",
                    key
                )));
            }
            _ => parse_field(&mut tree, key, value)?,
        }
    }
    Ok(tree)
}

fn parse_clauses(key: &str, value: &Value) -> Result<Vec<Clause>> {
    let items = value.as_array().ok_or_else(|| {
        CmdbError::invalid_condition(format!("{} expects an array, got {}", key, value))
    })?;
    items
        .iter()
        .map(|item| match item {
            Value::Object(doc) => parse_document(doc).map(Clause::Tree),
            other => Err(CmdbError::invalid_condition(format!(
                "{} items must be documents, got {}",
                key, other
            ))),
        })
        .collect()
}

fn parse_field(tree: &mut ConditionTree, key: &str, value: &Value) -> Result<()> {
    let doc = match value {
        Value::Object(doc) if !doc.is_empty() => doc,
        _ => {
            tree.element([Element::key_value(key, value.clone())]);
            return Ok(());
        }
    };

    if doc.contains_key(Operator::Regex.as_str()) {
        tree.element([Element::key_value(key, value.clone())]);
        return Ok(());
    }

    if doc.keys().all(|k| Operator::from_key(k).is_some()) {
        let mut ops = Vec::with_capacity(doc.len());
        for (op_key, op_value) in doc {
            if let Some(op) = Operator::from_key(op_key) {
                ops.push(FieldOperator::try_new(key, op, op_value.clone())?);
            }
        }
        tree.element(ops);
        return Ok(());
    }

    let embedded = parse_document(doc)?;
    tree.embed(key).merge(embedded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // Round-trip Tests
    // =========================================================================

    #[test]
    fn test_nested_or_round_trip_is_byte_identical() {
        let input = r#"{"$or":[{"a":1,"b":1},{"a":1,"$or":[{"aa":1,"cc":2},{"aa":1,"cc":3}]}]}"#;
        let tree = ConditionTree::parse_str(input).unwrap();
        assert_eq!(tree.to_filter_string(), input);
    }

    #[test]
    fn test_operator_document_round_trip() {
        let input = r#"{"age":{"$gte":15,"$lt":75},"name":{"$in":["a","b"]},"$and":[{"age":{"$ne":30}}]}"#;
        let tree = ConditionTree::parse_str(input).unwrap();
        assert_eq!(tree.elements().len(), 3);
        assert_eq!(tree.to_filter_string(), input);
    }

    #[test]
    fn test_not_and_nor_round_trip() {
        let input = r#"{"$not":[{"a":1}],"$nor":[{"b":{"$exists":true}}]}"#;
        let tree = ConditionTree::parse_str(input).unwrap();
        assert_eq!(tree.not_clauses().len(), 1);
        assert_eq!(tree.nor_clauses().len(), 1);
        assert!(tree.or_clauses().is_empty());
        assert_eq!(tree.to_filter_string(), input);
    }

    // =========================================================================
    // Field Value Shape Tests
    // =========================================================================

    #[test]
    fn test_regex_document_stays_opaque() {
        let tree = ConditionTree::parse(&json!({"name": {"$regex": "^web", "$options": "i"}})).unwrap();
        assert!(tree.embeds().is_empty());
        assert_eq!(
            tree.elements()[0],
            Element::regex_with_options("name", "^web", "i")
        );
    }

    #[test]
    fn test_plain_document_becomes_embed() {
        let tree = ConditionTree::parse(&json!({"attrs": {"os": "linux", "cpu": {"$gt": 4}}})).unwrap();
        assert!(tree.elements().is_empty());
        assert_eq!(tree.embeds().len(), 1);
        let (name, sub) = &tree.embeds()[0];
        assert_eq!(name, "attrs");
        assert_eq!(sub.elements().len(), 2);
    }

    #[test]
    fn test_scalars_arrays_and_empty_documents_are_key_values() {
        let tree = ConditionTree::parse(&json!({"a": 1, "b": [1, 2], "c": {}, "d": null})).unwrap();
        assert_eq!(tree.elements().len(), 4);
        assert!(
            tree.elements()
                .iter()
                .all(|e| matches!(e, Element::KeyValue { .. }))
        );
    }

    // =========================================================================
    // Rejection Tests
    // =========================================================================

    #[test]
    fn test_rejects_top_level_comparison() {
        let err = ConditionTree::parse(&json!({"$gt": 1})).unwrap_err();
        assert!(matches!(err, CmdbError::InvalidCondition(_)));
    }

    #[test]
    fn test_rejects_non_array_logical() {
        assert!(ConditionTree::parse(&json!({"$or": {"a": 1}})).is_err());
        assert!(ConditionTree::parse(&json!({"$and": [1]})).is_err());
    }

    #[test]
    fn test_rejects_bad_operator_values() {
        assert!(ConditionTree::parse(&json!({"a": {"$in": 1}})).is_err());
        assert!(ConditionTree::parse(&json!({"a": {"$size": "2"}})).is_err());
        assert!(ConditionTree::parse(&json!({"a": {"$exists": 1}})).is_err());
    }

    #[test]
    fn test_rejects_non_document_and_bad_json() {
        assert!(ConditionTree::parse(&json!([1])).is_err());
        assert!(matches!(
            ConditionTree::parse_str("{").unwrap_err(),
            CmdbError::Json(_)
        ));
    }
}
