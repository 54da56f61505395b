//! Error types for CMDB store operations

use std::fmt;

use thiserror::Error;

/// The constraint a field value violated during validation
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Required field absent, null or empty
    Missing,
    /// Value has the wrong JSON type for the attribute
    TypeMismatch { expected: &'static str },
    /// String longer than the configured ceiling
    TooLong { max: usize },
    /// Number outside the configured inclusive bounds
    OutOfRange { min: Option<f64>, max: Option<f64> },
    /// String does not match the configured pattern
    RegexMismatch { pattern: String },
    /// Value is not one of the configured enum/list options
    UnknownOption { value: String },
    /// String is not in the expected date/time/timezone format
    InvalidFormat { expected: &'static str },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing => write!(f, "value is required"),
            Violation::TypeMismatch { expected } => write!(f, "expected {}", expected),
            Violation::TooLong { max } => write!(f, "longer than {} characters", max),
            Violation::OutOfRange { min, max } => {
                let lo = min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".to_string());
                let hi = max.map(|v| v.to_string()).unwrap_or_else(|| "+inf".to_string());
                write!(f, "out of range [{}, {}]", lo, hi)
            }
            Violation::RegexMismatch { pattern } => write!(f, "does not match '{}'", pattern),
            Violation::UnknownOption { value } => write!(f, "'{}' is not a configured option", value),
            Violation::InvalidFormat { expected } => write!(f, "expected {} format", expected),
        }
    }
}

/// Coarse classification of errors, used by callers to pick a message catalog entry
/// and decide whether a retry makes sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Duplicate,
    Referential,
    Concurrency,
    Storage,
    InvalidRequest,
}

/// Errors that can occur during CMDB store operations
#[derive(Debug, Error)]
pub enum CmdbError {
    #[error("Validation failed for field '{field}': {violation}")]
    Validation { field: String, violation: Violation },

    #[error("Duplicate unique value on model '{object_id}' for fields {fields:?}")]
    DuplicateUnique {
        object_id: String,
        fields: Vec<String>,
    },

    #[error("Duplicate item: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Model '{0}' still has instances")]
    HasInstances(String),

    #[error("'{0}' still has associations")]
    HasAssociations(String),

    #[error("'{0}' is still in use")]
    InUse(String),

    #[error("Multiple instances for one-to-one association '{0}'")]
    OneToOneViolation(String),

    #[error("Multiple instances for one-to-many association '{0}'")]
    OneToManyViolation(String),

    #[error("Unique constraint conflicts with existing instances of '{object_id}' on {fields:?}")]
    UniqueConflict {
        object_id: String,
        fields: Vec<String>,
    },

    #[error("Preset item cannot be modified: {0}")]
    Preset(String),

    #[error("Field '{0}' cannot be updated")]
    Immutable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Operation in progress, retry later: {0}")]
    OperationInProgress(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CmdbError {
    pub fn validation(field: impl Into<String>, violation: Violation) -> Self {
        Self::Validation {
            field: field.into(),
            violation,
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::validation(field, Violation::Missing)
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_condition(msg: impl Into<String>) -> Self {
        Self::InvalidCondition(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::DuplicateUnique { .. } | Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::NotFound(_)
            | Self::HasInstances(_)
            | Self::HasAssociations(_)
            | Self::InUse(_)
            | Self::OneToOneViolation(_)
            | Self::OneToManyViolation(_)
            | Self::UniqueConflict { .. } => ErrorKind::Referential,
            Self::OperationInProgress(_) | Self::Lock(_) => ErrorKind::Concurrency,
            Self::Storage(_) | Self::Sql(_) | Self::Json(_) => ErrorKind::Storage,
            Self::Preset(_)
            | Self::Immutable(_)
            | Self::InvalidArgument(_)
            | Self::InvalidCondition(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Only lock contention is worth retrying; it is never retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationInProgress(_))
    }

    /// Stable machine-readable code for message catalogs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { violation, .. } => match violation {
                Violation::Missing => "field_required",
                Violation::TypeMismatch { .. } => "field_type_mismatch",
                Violation::TooLong { .. } => "field_too_long",
                Violation::OutOfRange { .. } => "field_out_of_range",
                Violation::RegexMismatch { .. } => "field_regex_mismatch",
                Violation::UnknownOption { .. } => "field_unknown_option",
                Violation::InvalidFormat { .. } => "field_invalid_format",
            },
            Self::DuplicateUnique { .. } => "duplicate_unique",
            Self::Duplicate(_) => "duplicate_item",
            Self::NotFound(_) => "not_found",
            Self::HasInstances(_) => "has_instances",
            Self::HasAssociations(_) => "has_associations",
            Self::InUse(_) => "in_use",
            Self::OneToOneViolation(_) => "one_to_one_violation",
            Self::OneToManyViolation(_) => "one_to_many_violation",
            Self::UniqueConflict { .. } => "unique_conflict",
            Self::Preset(_) => "preset_immutable",
            Self::Immutable(_) => "field_immutable",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidCondition(_) => "invalid_condition",
            Self::OperationInProgress(_) => "operation_in_progress",
            Self::Lock(_) => "lock_error",
            Self::Storage(_) | Self::Sql(_) => "storage_error",
            Self::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CmdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = CmdbError::missing("asset_id");
        assert!(err.to_string().contains("asset_id"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "field_required");
    }

    #[test]
    fn test_out_of_range_display() {
        let v = Violation::OutOfRange {
            min: Some(1.0),
            max: None,
        };
        assert_eq!(v.to_string(), "out of range [1, +inf]");
    }

    #[test]
    fn test_only_lock_contention_is_retryable() {
        assert!(CmdbError::OperationInProgress("k".into()).is_retryable());
        assert!(!CmdbError::Lock("k".into()).is_retryable());
        assert!(!CmdbError::duplicate("x").is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            CmdbError::DuplicateUnique {
                object_id: "host".into(),
                fields: vec!["asset_id".into()]
            }
            .kind(),
            ErrorKind::Duplicate
        );
        assert_eq!(
            CmdbError::HasInstances("host".into()).kind(),
            ErrorKind::Referential
        );
        assert_eq!(
            CmdbError::OperationInProgress("k".into()).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(CmdbError::storage("boom").kind(), ErrorKind::Storage);
    }
}
