//! SQL Identifier Sanitization Utilities
//!
//! Provides functions to safely quote SQL identifiers and to validate the names that
//! end up in table names or document keys.

/// Longest identifier PostgreSQL keeps without truncation
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use runtara_cmdb::sql::quote_identifier;
///
/// let quoted = quote_identifier("cmdb_model");
/// assert_eq!(quoted, "\"cmdb_model\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Validate a model, attribute, group or collection identifier
///
/// Rules:
/// - Must start with a lowercase letter
/// - Can only contain lowercase letters, numbers, and underscores
/// - At most 63 characters
/// - Cannot be one of `reserved` (e.g. system field names)
///
/// # Example
/// ```
/// use runtara_cmdb::sql::validate_identifier;
///
/// assert!(validate_identifier("host", &[]).is_ok());
/// assert!(validate_identifier("Host", &[]).is_err());
/// assert!(validate_identifier("owner", &["owner"]).is_err());
/// ```
pub fn validate_identifier(name: &str, reserved: &[&str]) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("Identifier cannot be empty".to_string());
    };

    if !first.is_ascii_lowercase()
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "Identifier '{}' is longer than {} characters.",
            name, MAX_IDENTIFIER_LEN
        ));
    }

    if reserved.contains(&name) {
        return Err(format!("Identifier '{}' is reserved and cannot be used.", name));
    }

    Ok(())
}

/// Validate an attribute property id. System fields use camelCase, so property ids also
/// accept uppercase letters after the first character.
pub fn validate_property_id(name: &str, reserved: &[&str]) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("Property id cannot be empty".to_string());
    };
    if !first.is_ascii_alphabetic() || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "Property id '{}' is invalid. Must start with a letter and contain only letters, numbers, and underscores.",
            name
        ));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(format!(
            "Property id '{}' is longer than {} characters.",
            name, MAX_IDENTIFIER_LEN
        ));
    }
    if reserved.contains(&name) {
        return Err(format!("Property id '{}' is reserved and cannot be used.", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // quote_identifier Tests
    // =========================================================================

    #[test]
    fn test_quote_identifier_simple() {
        assert_eq!(quote_identifier("cmdb_model"), "\"cmdb_model\"");
        assert_eq!(quote_identifier("a"), "\"a\"");
    }

    #[test]
    fn test_quote_identifier_with_quotes() {
        assert_eq!(
            quote_identifier("table\"with\"quotes"),
            "\"table\"\"with\"\"quotes\""
        );
    }

    #[test]
    fn test_quote_identifier_special_chars() {
        assert_eq!(quote_identifier("my-table"), "\"my-table\"");
        assert_eq!(quote_identifier("日本語"), "\"日本語\"");
        assert_eq!(quote_identifier(""), "\"\"");
    }

    // =========================================================================
    // validate_identifier Tests
    // =========================================================================

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("host", &[]).is_ok());
        assert!(validate_identifier("switch_2", &[]).is_ok());
        assert!(validate_identifier("inst_asst_host", &[]).is_ok());
    }

    #[test]
    fn test_validate_identifier_empty() {
        let result = validate_identifier("", &[]);
        assert!(result.unwrap_err().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_identifier_invalid_chars() {
        assert!(validate_identifier("1host", &[]).is_err());
        assert!(validate_identifier("_host", &[]).is_err());
        assert!(validate_identifier("Host", &[]).is_err());
        assert!(validate_identifier("my-host", &[]).is_err());
        assert!(validate_identifier("my.host", &[]).is_err());
        assert!(validate_identifier("my host", &[]).is_err());
    }

    #[test]
    fn test_validate_identifier_too_long() {
        let name = "a".repeat(64);
        assert!(validate_identifier(&name, &[]).is_err());
        assert!(validate_identifier(&name[..63], &[]).is_ok());
    }

    #[test]
    fn test_validate_identifier_reserved() {
        let result = validate_identifier("default", &["default"]);
        assert!(result.unwrap_err().contains("reserved"));
        assert!(validate_identifier("default", &[]).is_ok());
    }

    // =========================================================================
    // validate_property_id Tests
    // =========================================================================

    #[test]
    fn test_validate_property_id() {
        assert!(validate_property_id("asset_id", &[]).is_ok());
        assert!(validate_property_id("hostName", &[]).is_ok());
        assert!(validate_property_id("9lives", &[]).is_err());
        assert!(validate_property_id("a.b", &[]).is_err());
        assert!(validate_property_id("ownerId", &["ownerId"]).is_err());
    }
}
