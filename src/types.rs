//! Core type definitions for the CMDB store
//!
//! Includes attribute types, their option payloads, and the system field names
//! stamped on every stored record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CmdbError, Result};

// ============================================================================
// System field names
// ============================================================================

/// Field names managed by the store rather than by attribute declarations
pub mod fields {
    /// Default per-model instance id field
    pub const DEFAULT_ID: &str = "instId";
    /// Model discriminator, also used inside shared instance collections
    pub const OBJECT_ID: &str = "objectId";
    /// Tenant identity
    pub const OWNER_ID: &str = "ownerId";
    /// RFC 3339 creation timestamp
    pub const CREATE_TIME: &str = "createTime";
    /// RFC 3339 modification timestamp
    pub const LAST_TIME: &str = "lastTime";
    /// Business scope label
    pub const BIZ_ID: &str = "bizId";
    /// Record status; `"disabled"` hides the record from uniqueness checks
    pub const DATA_STATUS: &str = "dataStatus";
    /// Internal topology link, never part of an attribute catalog
    pub const PARENT_ID: &str = "parentId";
    /// Internal topology link, never part of an attribute catalog
    pub const CHILD_ID: &str = "childId";

    /// Value of [`DATA_STATUS`] for soft-disabled records
    pub const DATA_STATUS_DISABLED: &str = "disabled";

    /// Fields an instance payload may never set directly
    pub const SYSTEM: &[&str] = &[OBJECT_ID, OWNER_ID, CREATE_TIME, LAST_TIME, BIZ_ID];
}

// ============================================================================
// Attribute types
// ============================================================================

/// One selectable value of an `enum` attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnumOption {
    /// Stored value
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Whether this option fills absent values on create
    #[serde(rename = "isDefault", default)]
    pub is_default: bool,
}

impl EnumOption {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_default: false,
        }
    }

    /// Mark this option as the default
    pub fn default_option(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Attribute type with its option payload
///
/// A closed set; validation dispatches on [`AttributeKind`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributeType {
    /// Short text (default ceiling 256 characters)
    SingleChar {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
    },

    /// Long text (default ceiling 2000 characters)
    LongChar {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
    },

    /// 64-bit integer with optional inclusive bounds
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },

    /// Floating point number with optional inclusive bounds
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },

    /// One of a fixed set of option ids
    Enum {
        #[serde(default)]
        options: Vec<EnumOption>,
    },

    /// `YYYY-MM-DD`
    Date,

    /// Timestamp, normalized to RFC 3339 UTC
    Time,

    /// IANA timezone identifier
    TimeZone,

    /// Strict JSON boolean
    Bool,

    /// User name(s)
    User,

    /// Reference to another record's numeric id
    ForeignKey,

    /// One of a fixed list of strings
    List {
        #[serde(default)]
        options: Vec<String>,
    },
}

/// Fieldless discriminant of [`AttributeType`], the key of the validation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    SingleChar,
    LongChar,
    Int,
    Float,
    Enum,
    Date,
    Time,
    TimeZone,
    Bool,
    User,
    ForeignKey,
    List,
}

impl AttributeKind {
    /// Kinds where `""` is a valid empty value rather than a type error
    pub fn accepts_empty_string(&self) -> bool {
        matches!(
            self,
            AttributeKind::SingleChar | AttributeKind::LongChar | AttributeKind::Float | AttributeKind::Enum
        )
    }
}

impl AttributeType {
    pub fn single_char() -> Self {
        AttributeType::SingleChar { regex: None }
    }

    pub fn long_char() -> Self {
        AttributeType::LongChar { regex: None }
    }

    pub fn int() -> Self {
        AttributeType::Int {
            min: None,
            max: None,
        }
    }

    pub fn int_range(min: Option<i64>, max: Option<i64>) -> Self {
        AttributeType::Int { min, max }
    }

    pub fn float_range(min: Option<f64>, max: Option<f64>) -> Self {
        AttributeType::Float { min, max }
    }

    pub fn enumeration(options: Vec<EnumOption>) -> Self {
        AttributeType::Enum { options }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeType::SingleChar { .. } => AttributeKind::SingleChar,
            AttributeType::LongChar { .. } => AttributeKind::LongChar,
            AttributeType::Int { .. } => AttributeKind::Int,
            AttributeType::Float { .. } => AttributeKind::Float,
            AttributeType::Enum { .. } => AttributeKind::Enum,
            AttributeType::Date => AttributeKind::Date,
            AttributeType::Time => AttributeKind::Time,
            AttributeType::TimeZone => AttributeKind::TimeZone,
            AttributeType::Bool => AttributeKind::Bool,
            AttributeType::User => AttributeKind::User,
            AttributeType::ForeignKey => AttributeKind::ForeignKey,
            AttributeType::List { .. } => AttributeKind::List,
        }
    }

    /// Wire name of the type
    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            AttributeKind::SingleChar => "singlechar",
            AttributeKind::LongChar => "longchar",
            AttributeKind::Int => "int",
            AttributeKind::Float => "float",
            AttributeKind::Enum => "enum",
            AttributeKind::Date => "date",
            AttributeKind::Time => "time",
            AttributeKind::TimeZone => "timezone",
            AttributeKind::Bool => "bool",
            AttributeKind::User => "user",
            AttributeKind::ForeignKey => "foreignkey",
            AttributeKind::List => "list",
        }
    }

    /// Build a type from a type name and a legacy option payload.
    ///
    /// Accepted option shapes:
    /// - char types: the regex pattern as a string
    /// - `int`/`float`: `{"min": "1", "max": "10"}` with string or numeric bounds, either
    ///   as an object or as a JSON-encoded string; an unparsable bound means unbounded
    /// - `enum`: an array of `{id, name, is_default | isDefault}`
    /// - `list`: an array of strings
    pub fn from_raw(type_name: &str, option: &Value) -> Result<Self> {
        let option = decode_embedded_json(option);
        let attr_type = match type_name {
            "singlechar" => AttributeType::SingleChar {
                regex: option_regex(&option),
            },
            "longchar" => AttributeType::LongChar {
                regex: option_regex(&option),
            },
            "int" => AttributeType::Int {
                min: bound(&option, "min").and_then(parse_i64),
                max: bound(&option, "max").and_then(parse_i64),
            },
            "float" => AttributeType::Float {
                min: bound(&option, "min").and_then(parse_f64),
                max: bound(&option, "max").and_then(parse_f64),
            },
            "enum" => AttributeType::Enum {
                options: parse_enum_options(&option)?,
            },
            "list" => AttributeType::List {
                options: match &option {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s.clone()),
                            other => Err(CmdbError::invalid_argument(format!(
                                "list option must be a string, got {}",
                                other
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(CmdbError::invalid_argument(format!(
                            "list options must be an array, got {}",
                            other
                        )));
                    }
                },
            },
            "date" => AttributeType::Date,
            "time" => AttributeType::Time,
            "timezone" => AttributeType::TimeZone,
            "bool" => AttributeType::Bool,
            "user" => AttributeType::User,
            "foreignkey" => AttributeType::ForeignKey,
            other => {
                return Err(CmdbError::invalid_argument(format!(
                    "unknown attribute type '{}'",
                    other
                )));
            }
        };
        Ok(attr_type)
    }

    /// Check that the option payload is self-consistent
    pub fn validate_options(&self) -> Result<()> {
        match self {
            AttributeType::SingleChar { regex: Some(pattern) }
            | AttributeType::LongChar { regex: Some(pattern) } => {
                regex::Regex::new(pattern).map_err(|e| {
                    CmdbError::invalid_argument(format!("invalid regex '{}': {}", pattern, e))
                })?;
            }
            AttributeType::Int {
                min: Some(min),
                max: Some(max),
            } if min > max => {
                return Err(CmdbError::invalid_argument(format!(
                    "min {} is greater than max {}",
                    min, max
                )));
            }
            AttributeType::Float {
                min: Some(min),
                max: Some(max),
            } if min > max => {
                return Err(CmdbError::invalid_argument(format!(
                    "min {} is greater than max {}",
                    min, max
                )));
            }
            AttributeType::Enum { options } => {
                let mut seen = std::collections::HashSet::new();
                for option in options {
                    if option.id.is_empty() {
                        return Err(CmdbError::invalid_argument("enum option id is empty"));
                    }
                    if !seen.insert(option.id.as_str()) {
                        return Err(CmdbError::invalid_argument(format!(
                            "enum option '{}' is declared twice",
                            option.id
                        )));
                    }
                }
                if options.iter().filter(|o| o.is_default).count() > 1 {
                    return Err(CmdbError::invalid_argument(
                        "enum declares more than one default option",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Value filled into a declared-but-absent field on create
    pub fn zero_value(&self) -> Value {
        match self {
            AttributeType::SingleChar { .. } | AttributeType::LongChar { .. } => {
                Value::String(String::new())
            }
            AttributeType::Bool => Value::Bool(false),
            AttributeType::Enum { options } => options
                .iter()
                .find(|o| o.is_default)
                .map(|o| Value::String(o.id.clone()))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Whether the type may appear in a unique constraint
    pub fn is_unique_capable(&self) -> bool {
        !matches!(
            self,
            AttributeType::LongChar { .. } | AttributeType::Bool
        )
    }
}

fn decode_embedded_json(option: &Value) -> Value {
    match option {
        Value::String(s) if s.trim_start().starts_with(['{', '[']) => {
            serde_json::from_str(s).unwrap_or_else(|_| option.clone())
        }
        other => other.clone(),
    }
}

fn option_regex(option: &Value) -> Option<String> {
    match option {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("regex")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn bound<'a>(option: &'a Value, name: &str) -> Option<&'a Value> {
    option.as_object().and_then(|map| map.get(name))
}

fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_enum_options(option: &Value) -> Result<Vec<EnumOption>> {
    let items = match option {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(CmdbError::invalid_argument(format!(
                "enum options must be an array, got {}",
                other
            )));
        }
    };

    items
        .iter()
        .map(|item| {
            let map = item.as_object().ok_or_else(|| {
                CmdbError::invalid_argument(format!("enum option must be an object, got {}", item))
            })?;
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CmdbError::invalid_argument("enum option is missing 'id'"))?;
            let name = map.get("name").and_then(Value::as_str).unwrap_or(id);
            let is_default = map
                .get("is_default")
                .or_else(|| map.get("isDefault"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(EnumOption {
                id: id.to_string(),
                name: name.to_string(),
                is_default,
            })
        })
        .collect()
}

// ============================================================================
// Emptiness
// ============================================================================

/// Missing, `null`, `""` or `[]`
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Blank, or a zero number, or `false`
pub fn is_zero_valued(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::Bool(b)) => !b,
        other => is_blank(other),
    }
}

/// Values that count as empty for a non-mustCheck declaration-time recheck
pub fn zero_values() -> Vec<Value> {
    vec![
        Value::Null,
        Value::String(String::new()),
        Value::from(0),
        Value::Bool(false),
        Value::Array(Vec::new()),
    ]
}
