//! Values filled into declared fields the create payload left out

use serde_json::Value;

use super::rules::rule;
use crate::config::CharLimits;
use crate::schema::Attribute;
use crate::types::is_blank;

/// The attribute's explicit default when it is valid for the type, otherwise the
/// type's zero value
pub(crate) fn default_value(attr: &Attribute, limits: &CharLimits) -> Value {
    if let Some(default) = attr.default.as_ref().filter(|d| !is_blank(Some(d)))
        && let Ok(normalized) = rule(attr.attr_type.kind())(&attr.attr_type, default, limits)
    {
        return normalized.unwrap_or_else(|| default.clone());
    }
    attr.attr_type.zero_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CreateAttributeRequest;
    use crate::types::{AttributeType, EnumOption};
    use serde_json::json;

    fn attr(request: CreateAttributeRequest) -> Attribute {
        Attribute::from_request(1, "host", request, "0")
    }

    #[test]
    fn test_zero_values_per_type() {
        let limits = CharLimits::default();
        let cases = [
            (AttributeType::single_char(), json!("")),
            (AttributeType::long_char(), json!("")),
            (AttributeType::Bool, json!(false)),
            (AttributeType::int(), Value::Null),
            (AttributeType::Date, Value::Null),
            (AttributeType::TimeZone, Value::Null),
            (AttributeType::User, Value::Null),
        ];
        for (attr_type, expected) in cases {
            let a = attr(CreateAttributeRequest::new("f", "F", attr_type));
            assert_eq!(default_value(&a, &limits), expected);
        }
    }

    #[test]
    fn test_enum_default_option() {
        let t = AttributeType::enumeration(vec![
            EnumOption::new("a", "A"),
            EnumOption::new("b", "B").default_option(),
        ]);
        let a = attr(CreateAttributeRequest::new("f", "F", t));
        assert_eq!(default_value(&a, &CharLimits::default()), json!("b"));
    }

    #[test]
    fn test_explicit_default_wins_when_valid() {
        let limits = CharLimits::default();
        let a = attr(CreateAttributeRequest::new("f", "F", AttributeType::int()).with_default(8));
        assert_eq!(default_value(&a, &limits), json!(8));

        let invalid = attr(
            CreateAttributeRequest::new("f", "F", AttributeType::int()).with_default("eight"),
        );
        assert_eq!(default_value(&invalid, &limits), Value::Null);

        let time = attr(
            CreateAttributeRequest::new("f", "F", AttributeType::Time)
                .with_default("2024-01-01 00:00:00"),
        );
        assert_eq!(default_value(&time, &limits), json!("2024-01-01T00:00:00Z"));
    }
}
