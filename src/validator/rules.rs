//! Per-kind value rules
//!
//! Each rule checks one non-empty value and may return a normalized replacement.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::config::CharLimits;
use crate::error::Violation;
use crate::types::{AttributeKind, AttributeType};

/// `Ok(None)` keeps the value as given; `Ok(Some(v))` stores `v` instead
pub(crate) type Rule = fn(&AttributeType, &Value, &CharLimits) -> Result<Option<Value>, Violation>;

/// Rule for an attribute kind
pub(crate) fn rule(kind: AttributeKind) -> Rule {
    match kind {
        AttributeKind::SingleChar | AttributeKind::LongChar => check_char,
        AttributeKind::Int => check_int,
        AttributeKind::Float => check_float,
        AttributeKind::Enum => check_enum,
        AttributeKind::List => check_list,
        AttributeKind::Date => check_date,
        AttributeKind::Time => check_time,
        AttributeKind::TimeZone => check_timezone,
        AttributeKind::Bool => check_bool,
        AttributeKind::User => check_user,
        AttributeKind::ForeignKey => check_foreign_key,
    }
}

fn expect_str<'a>(value: &'a Value, expected: &'static str) -> Result<&'a str, Violation> {
    value.as_str().ok_or(Violation::TypeMismatch { expected })
}

fn check_char(
    attr_type: &AttributeType,
    value: &Value,
    limits: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "string")?;
    let (max, pattern) = match attr_type {
        AttributeType::LongChar { regex } => (limits.long, regex),
        AttributeType::SingleChar { regex } => (limits.single, regex),
        _ => return Err(Violation::TypeMismatch { expected: "string" }),
    };
    if s.chars().count() > max {
        return Err(Violation::TooLong { max });
    }
    if let Some(pattern) = pattern {
        // patterns are checked when the attribute is declared
        let matches = regex::Regex::new(pattern)
            .map(|re| re.is_match(s))
            .unwrap_or(false);
        if !matches {
            return Err(Violation::RegexMismatch {
                pattern: pattern.clone(),
            });
        }
    }
    Ok(None)
}

fn out_of_range(min: Option<f64>, max: Option<f64>) -> Violation {
    Violation::OutOfRange { min, max }
}

fn check_int(
    attr_type: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let n = value
        .as_i64()
        .ok_or(Violation::TypeMismatch { expected: "integer" })?;
    if let AttributeType::Int { min, max } = attr_type
        && (min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max))
    {
        return Err(out_of_range(min.map(|v| v as f64), max.map(|v| v as f64)));
    }
    Ok(None)
}

fn check_float(
    attr_type: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let n = value
        .as_f64()
        .ok_or(Violation::TypeMismatch { expected: "number" })?;
    if let AttributeType::Float { min, max } = attr_type
        && (min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max))
    {
        return Err(out_of_range(*min, *max));
    }
    Ok(None)
}

fn check_enum(
    attr_type: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "enum option id")?;
    let known = match attr_type {
        AttributeType::Enum { options } => options.iter().any(|o| o.id == s),
        _ => false,
    };
    if !known {
        return Err(Violation::UnknownOption {
            value: s.to_string(),
        });
    }
    Ok(None)
}

fn check_list(
    attr_type: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "string")?;
    let known = match attr_type {
        AttributeType::List { options } => options.iter().any(|o| o == s),
        _ => false,
    };
    if !known {
        return Err(Violation::UnknownOption {
            value: s.to_string(),
        });
    }
    Ok(None)
}

fn check_date(_: &AttributeType, value: &Value, _: &CharLimits) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "date string")?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Violation::InvalidFormat { expected: "YYYY-MM-DD" })?;
    Ok(None)
}

/// Parse an RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC) timestamp
fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

fn check_time(_: &AttributeType, value: &Value, _: &CharLimits) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "time string")?;
    let t = parse_time(s).ok_or(Violation::InvalidFormat { expected: "RFC 3339" })?;
    Ok(Some(Value::String(
        t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )))
}

fn check_timezone(
    _: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let s = expect_str(value, "timezone")?;
    s.parse::<chrono_tz::Tz>()
        .map_err(|_| Violation::InvalidFormat { expected: "IANA timezone" })?;
    Ok(None)
}

fn check_bool(_: &AttributeType, value: &Value, _: &CharLimits) -> Result<Option<Value>, Violation> {
    if value.is_boolean() {
        Ok(None)
    } else {
        Err(Violation::TypeMismatch { expected: "boolean" })
    }
}

fn check_user(_: &AttributeType, value: &Value, _: &CharLimits) -> Result<Option<Value>, Violation> {
    expect_str(value, "string")?;
    Ok(None)
}

fn check_foreign_key(
    _: &AttributeType,
    value: &Value,
    _: &CharLimits,
) -> Result<Option<Value>, Violation> {
    let mismatch = Violation::TypeMismatch {
        expected: "non-negative integer",
    };
    match value {
        Value::Number(n) if n.is_u64() => Ok(None),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                Ok(Some(Value::from(f as u64)))
            }
            _ => Err(mismatch),
        },
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(|n| Some(Value::from(n)))
            .map_err(|_| mismatch),
        _ => Err(mismatch),
    }
}
