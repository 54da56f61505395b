//! ConditionTree → SQL WHERE clause over a JSONB `doc` column
//!
//! Every leaf produces a non-NULL boolean so that `$not`/`$nor` negate cleanly and
//! missing fields behave as they do in the in-memory matcher.

use serde_json::Value;

use crate::condition::{Clause, ConditionTree, Element, FieldOperator, OPTIONS, Operator};
use crate::error::{CmdbError, Result};
use crate::storage::SortField;

/// A bind parameter produced while translating a filter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// JSON path segments, bound as `text[]`
    Path(Vec<String>),
    /// Bound as `jsonb`
    Json(Value),
    /// Bound as `text`
    Text(String),
    /// Bound as `bigint`
    Int(i64),
}

/// Split a dotted key into JSON path segments
pub fn json_path(key: &str) -> Vec<String> {
    key.split('.').map(str::to_string).collect()
}

/// Build SQL WHERE clause from a ConditionTree
///
/// Returns (clause, params) where `clause` uses placeholders starting at
/// `*param_offset`, which is advanced past the last one used.
///
/// # Example
/// ```
/// use runtara_cmdb::condition::{ConditionTree, FieldOperator};
/// use runtara_cmdb::sql::build_filter_clause;
///
/// let mut tree = ConditionTree::new();
/// tree.element([FieldOperator::exists("name", true)]);
/// let mut offset = 1;
/// let (clause, params) = build_filter_clause(&tree, &mut offset).unwrap();
/// assert_eq!(clause, "(doc #> $1::text[]) IS NOT NULL");
/// assert_eq!(params.len(), 1);
/// assert_eq!(offset, 2);
/// ```
pub fn build_filter_clause(
    tree: &ConditionTree,
    param_offset: &mut i32,
) -> Result<(String, Vec<SqlParam>)> {
    let mut builder = FilterBuilder {
        params: Vec::new(),
        next: *param_offset,
        alias: 0,
    };
    let clause = builder.tree(tree, "doc")?;
    *param_offset = builder.next;
    Ok((clause, builder.params))
}

/// Build ORDER BY clause; sort paths are bound as parameters. `seq` is always the
/// final tiebreaker so paging is stable.
pub fn build_order_by_clause(
    sort: &[SortField],
    param_offset: &mut i32,
) -> (String, Vec<SqlParam>) {
    let mut parts = Vec::with_capacity(sort.len() + 1);
    let mut params = Vec::with_capacity(sort.len());
    for field in sort {
        parts.push(format!(
            "doc #> ${}::text[] {}",
            param_offset,
            if field.descending {
                "DESC NULLS LAST"
            } else {
                "ASC NULLS FIRST"
            }
        ));
        params.push(SqlParam::Path(json_path(&field.field)));
        *param_offset += 1;
    }
    parts.push("seq ASC".to_string());
    (format!("ORDER BY {}", parts.join(", ")), params)
}

struct FilterBuilder {
    params: Vec<SqlParam>,
    next: i32,
    alias: u32,
}

impl FilterBuilder {
    fn bind(&mut self, param: SqlParam) -> String {
        let placeholder = format!("${}", self.next);
        self.next += 1;
        self.params.push(param);
        placeholder
    }

    fn path(&mut self, root: &str, key: &str) -> String {
        let p = self.bind(SqlParam::Path(json_path(key)));
        format!("({} #> {}::text[])", root, p)
    }

    fn tree(&mut self, tree: &ConditionTree, root: &str) -> Result<String> {
        let mut parts = Vec::new();

        for element in tree.elements() {
            parts.push(self.element(element, root)?);
        }
        for clause in tree.and_clauses() {
            parts.push(self.clause(clause, root)?);
        }
        if !tree.or_clauses().is_empty() {
            parts.push(self.join(tree.or_clauses(), root, " OR ")?);
        }
        if !tree.not_clauses().is_empty() {
            parts.push(format!(
                "NOT {}",
                self.join(tree.not_clauses(), root, " AND ")?
            ));
        }
        if !tree.nor_clauses().is_empty() {
            parts.push(format!(
                "NOT {}",
                self.join(tree.nor_clauses(), root, " OR ")?
            ));
        }
        for (name, sub) in tree.embeds().iter().filter(|(_, sub)| !sub.is_empty()) {
            parts.push(self.embed(name, sub, root)?);
        }

        Ok(match parts.len() {
            0 => "TRUE".to_string(),
            1 => parts.remove(0),
            _ => parts
                .into_iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(" AND "),
        })
    }

    fn join(&mut self, clauses: &[Clause], root: &str, sep: &str) -> Result<String> {
        let parts = clauses
            .iter()
            .map(|c| self.clause(c, root).map(|s| format!("({})", s)))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", parts.join(sep)))
    }

    fn clause(&mut self, clause: &Clause, root: &str) -> Result<String> {
        match clause {
            Clause::Element(element) => self.element(element, root),
            Clause::Tree(tree) => self.tree(tree, root),
        }
    }

    fn embed(&mut self, name: &str, sub: &ConditionTree, root: &str) -> Result<String> {
        let target = self.path(root, name);
        let object_branch = self.tree(sub, &target)?;
        self.alias += 1;
        let alias = format!("e{}", self.alias);
        let array_branch = self.tree(sub, &format!("{}.v", alias))?;
        Ok(format!(
            "COALESCE((jsonb_typeof({t}) = 'object' AND ({obj})) OR (jsonb_typeof({t}) = 'array' AND EXISTS (SELECT 1 FROM jsonb_array_elements({t}) AS {a}(v) WHERE jsonb_typeof({a}.v) = 'object' AND ({arr}))), FALSE)",
            t = target,
            obj = object_branch,
            a = alias,
            arr = array_branch
        ))
    }

    fn element(&mut self, element: &Element, root: &str) -> Result<String> {
        match element {
            Element::Field(op) => self.field(op, root),
            Element::KeyValue { key, value } => match value {
                Value::Object(spec) if spec.contains_key(Operator::Regex.as_str()) => {
                    let pattern = spec
                        .get(Operator::Regex.as_str())
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CmdbError::invalid_condition(format!("$regex on '{}' must be a string", key))
                        })?;
                    let options = spec.get(OPTIONS).and_then(Value::as_str).unwrap_or_default();
                    let e = self.path(root, key);
                    Ok(self.regex(&e, pattern, options))
                }
                _ => {
                    let e = self.path(root, key);
                    Ok(self.equals(&e, value))
                }
            },
        }
    }

    fn field(&mut self, op: &FieldOperator, root: &str) -> Result<String> {
        let value = op.value();
        let kind = match value {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            _ if op.operator().is_ordering() => return Ok("FALSE".to_string()),
            _ => "",
        };
        let e = self.path(root, op.key());
        let sql = match op.operator() {
            Operator::Eq => self.equals(&e, value),
            Operator::Ne => format!("NOT {}", self.equals(&e, value)),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let cmp = match op.operator() {
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    Operator::Lt => "<",
                    _ => "<=",
                };
                let p = self.bind(SqlParam::Json(value.clone()));
                format!(
                    "COALESCE(jsonb_typeof({e}) = '{kind}' AND {e} {cmp} {p}::jsonb, FALSE)"
                )
            }
            Operator::In => self.in_set(&e, value)?,
            Operator::Nin => format!("NOT {}", self.in_set(&e, value)?),
            Operator::Regex => {
                let pattern = value.as_str().ok_or_else(|| {
                    CmdbError::invalid_condition(format!("$regex on '{}' must be a string", op.key()))
                })?;
                self.regex(&e, pattern, "")
            }
            Operator::Exists => {
                if value.as_bool().unwrap_or(true) {
                    format!("{} IS NOT NULL", e)
                } else {
                    format!("{} IS NULL", e)
                }
            }
            Operator::All => {
                let p = self.bind(SqlParam::Json(value.clone()));
                format!("COALESCE(jsonb_typeof({e}) = 'array' AND {e} @> {p}::jsonb, FALSE)")
            }
            Operator::Size => {
                let len = value
                    .as_i64()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| {
                        CmdbError::invalid_condition(format!("$size on '{}' must be a non-negative integer", op.key()))
                    })?;
                let p = self.bind(SqlParam::Int(len));
                format!(
                    "COALESCE(jsonb_typeof({e}) = 'array' AND jsonb_array_length({e}) = {p}::bigint, FALSE)"
                )
            }
        };
        Ok(sql)
    }

    /// Missing equals null; an array field equals any of its elements
    fn equals(&mut self, e: &str, value: &Value) -> String {
        if value.is_null() {
            return format!("({e} IS NULL OR {e} = 'null'::jsonb)");
        }
        let p = self.bind(SqlParam::Json(value.clone()));
        format!(
            "COALESCE({e} = {p}::jsonb OR (jsonb_typeof({e}) = 'array' AND {e} @> jsonb_build_array({p}::jsonb)), FALSE)"
        )
    }

    fn in_set(&mut self, e: &str, value: &Value) -> Result<String> {
        if !value.is_array() {
            return Err(CmdbError::invalid_condition("$in/$nin expects an array"));
        }
        let p = self.bind(SqlParam::Json(value.clone()));
        self.alias += 1;
        let a = format!("s{}", self.alias);
        Ok(format!(
            "EXISTS (SELECT 1 FROM jsonb_array_elements({p}::jsonb) AS {a}(v) WHERE ({a}.v = 'null'::jsonb AND ({e} IS NULL OR {e} = 'null'::jsonb)) OR COALESCE({e} = {a}.v OR (jsonb_typeof({e}) = 'array' AND {e} @> jsonb_build_array({a}.v)), FALSE))"
        ))
    }

    /// Postgres AREs let `.` cross newlines and anchor `^`/`$` to the whole string by
    /// default; the newline flag is always set so the result matches the in-memory
    /// matcher for every combination of `m` and `s`.
    fn regex(&mut self, e: &str, pattern: &str, options: &str) -> String {
        let mut flags = String::new();
        for (opt, flag) in [('i', 'i'), ('x', 'x')] {
            if options.contains(opt) {
                flags.push(flag);
            }
        }
        flags.push(match (options.contains('m'), options.contains('s')) {
            (false, false) => 'p',
            (true, false) => 'n',
            (false, true) => 's',
            (true, true) => 'w',
        });
        let full = format!("(?{}){}", flags, pattern);
        let p = self.bind(SqlParam::Text(full));
        format!(
            "COALESCE((jsonb_typeof({e}) = 'string' AND ({e} #>> '{{}}') ~ {p}) OR (jsonb_typeof({e}) = 'array' AND EXISTS (SELECT 1 FROM jsonb_array_elements_text({e}) AS r(v) WHERE r.v ~ {p})), FALSE)"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(filter: Value) -> (String, Vec<SqlParam>) {
        let tree = ConditionTree::parse(&filter).unwrap();
        let mut offset = 1;
        build_filter_clause(&tree, &mut offset).unwrap()
    }

    // =========================================================================
    // Leaf Tests
    // =========================================================================

    #[test]
    fn test_empty_tree_is_true() {
        let (clause, params) = build(json!({}));
        assert_eq!(clause, "TRUE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_equality_binds_path_and_value() {
        let (clause, params) = build(json!({"attrs.os": "linux"}));
        assert!(clause.contains("(doc #> $1::text[]) = $2::jsonb"));
        assert_eq!(
            params,
            vec![
                SqlParam::Path(vec!["attrs".to_string(), "os".to_string()]),
                SqlParam::Json(json!("linux")),
            ]
        );
    }

    #[test]
    fn test_null_equality_matches_missing() {
        let (clause, params) = build(json!({"bizId": null}));
        assert!(clause.contains("IS NULL OR"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_range_checks_type() {
        let (clause, _) = build(json!({"age": {"$gte": 15}}));
        assert!(clause.contains("jsonb_typeof((doc #> $1::text[])) = 'number'"));
        assert!(clause.contains(">= $2::jsonb"));
    }

    #[test]
    fn test_range_against_non_scalar_is_false() {
        let (clause, _) = build(json!({"age": {"$gt": true}}));
        assert_eq!(clause, "FALSE");
    }

    #[test]
    fn test_regex_flags() {
        let (_, params) = build(json!({"name": {"$regex": "^web", "$options": "i"}}));
        assert_eq!(params[1], SqlParam::Text("(?ip)^web".to_string()));
    }

    #[test]
    fn test_regex_newline_options() {
        for (options, expected) in [
            ("", "(?p)a.b"),
            ("m", "(?n)a.b"),
            ("s", "(?s)a.b"),
            ("ms", "(?w)a.b"),
            ("xsi", "(?ixs)a.b"),
        ] {
            let (_, params) = build(json!({"name": {"$regex": "a.b", "$options": options}}));
            assert_eq!(params[1], SqlParam::Text(expected.to_string()), "options {options:?}");
        }
    }

    #[test]
    fn test_size_binds_int() {
        let (clause, params) = build(json!({"tags": {"$size": 2}}));
        assert!(clause.contains("jsonb_array_length"));
        assert_eq!(params[1], SqlParam::Int(2));
    }

    // =========================================================================
    // Logical Tests
    // =========================================================================

    #[test]
    fn test_logical_lists() {
        let (clause, _) = build(json!({"a": 1, "$or": [{"b": 1}, {"c": 1}], "$nor": [{"d": 1}]}));
        assert!(clause.contains(") OR ("));
        assert!(clause.contains("NOT (("));
    }

    #[test]
    fn test_not_is_negated_conjunction() {
        let (clause, _) = build(json!({"$not": [{"a": 1}, {"b": 1}]}));
        assert!(clause.starts_with("NOT (("));
        assert!(clause.contains(") AND ("));
    }

    #[test]
    fn test_embed_uses_object_and_array_branches() {
        let (clause, params) = build(json!({"nics": {"ip": "10.0.0.1"}}));
        assert!(clause.contains("= 'object'"));
        assert!(clause.contains("jsonb_array_elements((doc #> $1::text[])) AS e1(v)"));
        assert!(clause.contains("e1.v #>"));
        // one path for the embed, then path + value for each branch
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_param_offset_advances() {
        let tree = ConditionTree::parse(&json!({"a": 1, "b": {"$in": [1, 2]}})).unwrap();
        let mut offset = 3;
        let (clause, params) = build_filter_clause(&tree, &mut offset).unwrap();
        assert!(clause.contains("$3::text[]"));
        assert_eq!(params.len(), 4);
        assert_eq!(offset, 7);
    }

    // =========================================================================
    // ORDER BY Tests
    // =========================================================================

    #[test]
    fn test_order_by() {
        let mut offset = 4;
        let (clause, params) = build_order_by_clause(
            &[SortField::parse("-createTime"), SortField::parse("name")],
            &mut offset,
        );
        assert_eq!(
            clause,
            "ORDER BY doc #> $4::text[] DESC NULLS LAST, doc #> $5::text[] ASC NULLS FIRST, seq ASC"
        );
        assert_eq!(params.len(), 2);
        assert_eq!(offset, 6);
    }

    #[test]
    fn test_order_by_default() {
        let mut offset = 1;
        let (clause, params) = build_order_by_clause(&[], &mut offset);
        assert_eq!(clause, "ORDER BY seq ASC");
        assert!(params.is_empty());
    }

    #[test]
    fn test_empty_embed_is_skipped() {
        let mut tree = ConditionTree::new();
        tree.embed("meta");
        let mut offset = 1;
        let (clause, params) = build_filter_clause(&tree, &mut offset).unwrap();
        assert_eq!(clause, "TRUE");
        assert!(params.is_empty());
        assert_eq!(offset, 1);
    }
}
