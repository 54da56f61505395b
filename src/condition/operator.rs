//! Field operators and the leaf elements of a condition tree

use serde_json::{Map, Value};

use crate::error::{CmdbError, Result};

/// Comparison and array operators understood by the filter wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
    Exists,
    All,
    Size,
}

impl Operator {
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Regex,
        Operator::Exists,
        Operator::All,
        Operator::Size,
    ];

    /// Wire key, e.g. `$gte`
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Regex => "$regex",
            Operator::Exists => "$exists",
            Operator::All => "$all",
            Operator::Size => "$size",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == key)
    }

    /// Range comparison operators
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }
}

/// Logical combinator keys
pub const AND: &str = "$and";
pub const OR: &str = "$or";
pub const NOT: &str = "$not";
pub const NOR: &str = "$nor";
/// Sibling of `$regex` carrying the pattern flags
pub const OPTIONS: &str = "$options";

/// `{key, operator, value}`; immutable once constructed
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOperator {
    key: String,
    operator: Operator,
    value: Value,
}

impl FieldOperator {
    /// Build an operator, checking that the value has the shape the operator needs
    pub fn try_new(key: impl Into<String>, operator: Operator, value: Value) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(CmdbError::invalid_condition("field key is empty"));
        }
        let ok = match operator {
            Operator::In | Operator::Nin | Operator::All => value.is_array(),
            Operator::Exists => value.is_boolean(),
            Operator::Size => value.as_u64().is_some(),
            Operator::Regex => value.is_string(),
            _ => true,
        };
        if !ok {
            return Err(CmdbError::invalid_condition(format!(
                "invalid value {} for {} on '{}'",
                value,
                operator.as_str(),
                key
            )));
        }
        Ok(Self {
            key,
            operator,
            value,
        })
    }

    fn unchecked(key: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            key: key.into(),
            operator,
            value,
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Eq, value.into())
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Ne, value.into())
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Gt, value.into())
    }

    pub fn gte(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Gte, value.into())
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Lt, value.into())
    }

    pub fn lte(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::unchecked(key, Operator::Lte, value.into())
    }

    pub fn is_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::unchecked(
            key,
            Operator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn nin<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::unchecked(
            key,
            Operator::Nin,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn regex(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::unchecked(key, Operator::Regex, Value::String(pattern.into()))
    }

    pub fn exists(key: impl Into<String>, present: bool) -> Self {
        Self::unchecked(key, Operator::Exists, Value::Bool(present))
    }

    pub fn all<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::unchecked(
            key,
            Operator::All,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn size(key: impl Into<String>, len: u64) -> Self {
        Self::unchecked(key, Operator::Size, Value::from(len))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A flat condition on one key
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// `{key: {"$op": value}}`
    Field(FieldOperator),
    /// `{key: value}`: implicit equality, or an opaque `$regex`/`$options` document
    KeyValue { key: String, value: Value },
}

impl Element {
    pub fn key_value(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Element::KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// `{key: {"$regex": pattern, "$options": options}}`, kept opaque so the flags stay
    /// attached to the pattern
    pub fn regex_with_options(
        key: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        let mut doc = Map::new();
        doc.insert(Operator::Regex.as_str().to_string(), Value::String(pattern.into()));
        doc.insert(OPTIONS.to_string(), Value::String(options.into()));
        Element::KeyValue {
            key: key.into(),
            value: Value::Object(doc),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Element::Field(op) => op.key(),
            Element::KeyValue { key, .. } => key,
        }
    }

    /// Single-key wire document for this element
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        match self {
            Element::Field(op) => {
                let mut inner = Map::new();
                inner.insert(op.operator().as_str().to_string(), op.value().clone());
                doc.insert(op.key().to_string(), Value::Object(inner));
            }
            Element::KeyValue { key, value } => {
                doc.insert(key.clone(), value.clone());
            }
        }
        doc
    }
}

impl From<FieldOperator> for Element {
    fn from(op: FieldOperator) -> Self {
        Element::Field(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_keys_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_key(op.as_str()), Some(op));
        }
        assert_eq!(Operator::from_key("$and"), None);
        assert_eq!(Operator::from_key("age"), None);
    }

    #[test]
    fn test_try_new_checks_value_shape() {
        assert!(FieldOperator::try_new("a", Operator::In, json!([1, 2])).is_ok());
        assert!(FieldOperator::try_new("a", Operator::In, json!(1)).is_err());
        assert!(FieldOperator::try_new("a", Operator::Exists, json!("yes")).is_err());
        assert!(FieldOperator::try_new("a", Operator::Size, json!(-1)).is_err());
        assert!(FieldOperator::try_new("a", Operator::Size, json!(3)).is_ok());
        assert!(FieldOperator::try_new("a", Operator::Regex, json!(3)).is_err());
        assert!(FieldOperator::try_new("", Operator::Eq, json!(3)).is_err());
    }

    #[test]
    fn test_element_documents() {
        let e = Element::from(FieldOperator::gte("age", 15));
        assert_eq!(Value::Object(e.to_document()), json!({"age": {"$gte": 15}}));

        let e = Element::key_value("name", "web");
        assert_eq!(Value::Object(e.to_document()), json!({"name": "web"}));

        let e = Element::regex_with_options("name", "^web", "i");
        assert_eq!(
            serde_json::to_string(&Value::Object(e.to_document())).unwrap(),
            r#"{"name":{"$regex":"^web","$options":"i"}}"#
        );
    }

    #[test]
    fn test_set_constructors() {
        let op = FieldOperator::is_in("id", [1, 2, 3]);
        assert_eq!(op.operator(), Operator::In);
        assert_eq!(op.value(), &json!([1, 2, 3]));
        let op = FieldOperator::nin("s", Vec::<String>::new());
        assert_eq!(op.value(), &json!([]));
    }
}
