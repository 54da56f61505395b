//! Instance payload validation against a model's attribute catalog
//!
//! The first failing field aborts with [`CmdbError::Validation`]; nothing is applied
//! partially.

mod defaults;
mod rules;

use serde_json::Value;

use crate::catalog::AttributeCatalog;
use crate::config::CharLimits;
use crate::error::{CmdbError, Result, Violation};
use crate::schema::Attribute;
use crate::storage::Document;
use crate::types::{fields, is_blank};

use self::defaults::default_value;
use self::rules::rule;

/// Validates and normalizes instance payloads for one model
#[derive(Debug, Clone)]
pub struct Validator {
    catalog: AttributeCatalog,
    limits: CharLimits,
}

impl Validator {
    pub fn new(catalog: AttributeCatalog, limits: CharLimits) -> Self {
        Self { catalog, limits }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    /// Check one value against its type rule; returns the value to store
    pub fn check_value(&self, attr: &Attribute, value: &Value) -> Result<Value> {
        match rule(attr.attr_type.kind())(&attr.attr_type, value, &self.limits) {
            Ok(Some(normalized)) => Ok(normalized),
            Ok(None) => Ok(value.clone()),
            Err(violation) => Err(CmdbError::validation(&attr.property_id, violation)),
        }
    }

    /// Validate a create payload
    ///
    /// Required attributes must be present and non-empty. Absent attributes are filled
    /// with their defaults, undeclared keys are dropped, and every remaining value is
    /// checked by type. The model discriminator is always kept.
    pub fn validate_create(&self, data: &Document) -> Result<Document> {
        for attr in self.catalog.required() {
            if is_blank(data.get(&attr.property_id)) {
                return Err(CmdbError::validation(&attr.property_id, Violation::Missing));
            }
        }

        let mut out = Document::new();
        for attr in self.catalog.all() {
            let value = match data.get(&attr.property_id) {
                None => default_value(attr, &self.limits),
                Some(value) if skips_rules(attr, value) => value.clone(),
                Some(value) => self.check_value(attr, value)?,
            };
            out.insert(attr.property_id.clone(), value);
        }
        out.insert(
            fields::OBJECT_ID.to_string(),
            Value::String(self.catalog.object_id().to_string()),
        );
        Ok(out)
    }

    /// Validate an update payload against the stored record
    ///
    /// Undeclared and system keys are dropped, as are non-editable attributes unless
    /// `can_edit_all` is set. Required attributes must stay non-empty in the merged
    /// view; incoming values are checked by type. Returns the fields to write.
    pub fn validate_update(
        &self,
        data: &Document,
        existing: &Document,
        can_edit_all: bool,
    ) -> Result<Document> {
        let mut out = Document::new();
        for attr in self.catalog.all() {
            if !attr.editable && !can_edit_all {
                continue;
            }
            if let Some(value) = data.get(&attr.property_id) {
                out.insert(attr.property_id.clone(), value.clone());
            }
        }

        for attr in self.catalog.required() {
            let merged = out
                .get(&attr.property_id)
                .or_else(|| existing.get(&attr.property_id));
            if is_blank(merged) {
                return Err(CmdbError::validation(&attr.property_id, Violation::Missing));
            }
        }

        for attr in self.catalog.all() {
            if let Some(value) = out.get(&attr.property_id)
                && !skips_rules(attr, value)
            {
                let checked = self.check_value(attr, value)?;
                out.insert(attr.property_id.clone(), checked);
            }
        }
        Ok(out)
    }
}

/// `null` is always accepted as "no value"; `""` only for kinds that store it as such
fn skips_rules(attr: &Attribute, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() && attr.attr_type.kind().accepts_empty_string(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CreateAttributeRequest;
    use crate::types::AttributeType;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn validator() -> Validator {
        let attrs = vec![
            Attribute::from_request(
                1,
                "host",
                CreateAttributeRequest::new("asset_id", "Asset", AttributeType::single_char()).required(),
                "0",
            ),
            Attribute::from_request(
                2,
                "host",
                CreateAttributeRequest::new("cpu", "CPU", AttributeType::int_range(Some(1), None)),
                "0",
            ),
            Attribute::from_request(
                3,
                "host",
                CreateAttributeRequest::new("serial", "Serial", AttributeType::single_char()).read_only(),
                "0",
            ),
            Attribute::from_request(
                4,
                "host",
                CreateAttributeRequest::new("online", "Online", AttributeType::Bool),
                "0",
            ),
            Attribute::from_request(
                5,
                "host",
                CreateAttributeRequest::new("seen", "Seen", AttributeType::Time),
                "0",
            ),
        ];
        Validator::new(AttributeCatalog::new("host", attrs), CharLimits::default())
    }

    fn field_of(err: CmdbError) -> (String, Violation) {
        match err {
            CmdbError::Validation { field, violation } => (field, violation),
            other => panic!("unexpected error {other:?}"),
        }
    }

    // =========================================================================
    // Create
    // =========================================================================

    #[test]
    fn test_create_missing_required() {
        let v = validator();
        let err = v.validate_create(&doc(json!({"cpu": 2}))).unwrap_err();
        assert_eq!(field_of(err), ("asset_id".to_string(), Violation::Missing));

        let err = v.validate_create(&doc(json!({"asset_id": ""}))).unwrap_err();
        assert_eq!(field_of(err).1, Violation::Missing);
    }

    #[test]
    fn test_create_fills_defaults_and_drops_unknown() {
        let v = validator();
        let out = v
            .validate_create(&doc(json!({"asset_id": "A1", "bogus": 1, "objectId": "router"})))
            .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "asset_id": "A1",
                "cpu": null,
                "serial": "",
                "online": false,
                "seen": null,
                "objectId": "host"
            })
        );
    }

    #[test]
    fn test_create_type_errors_and_normalization() {
        let v = validator();
        let err = v
            .validate_create(&doc(json!({"asset_id": "A1", "cpu": 0})))
            .unwrap_err();
        assert_eq!(field_of(err).0, "cpu");

        let out = v
            .validate_create(&doc(json!({"asset_id": "A1", "seen": "2024-05-01 10:00:00"})))
            .unwrap();
        assert_eq!(out["seen"], json!("2024-05-01T10:00:00Z"));

        // null optional values are accepted as given
        let out = v
            .validate_create(&doc(json!({"asset_id": "A1", "cpu": null})))
            .unwrap();
        assert_eq!(out["cpu"], Value::Null);
    }

    #[test]
    fn test_empty_string_and_array_are_type_checked() {
        let attrs = vec![
            Attribute::from_request(
                1,
                "host",
                CreateAttributeRequest::new("online", "Online", AttributeType::Bool),
                "0",
            ),
            Attribute::from_request(2, "host", CreateAttributeRequest::new("cpu", "CPU", AttributeType::int()), "0"),
            Attribute::from_request(
                3,
                "host",
                CreateAttributeRequest::new("since", "Since", AttributeType::Date),
                "0",
            ),
            Attribute::from_request(
                4,
                "host",
                CreateAttributeRequest::new("load", "Load", AttributeType::float_range(None, None)),
                "0",
            ),
            Attribute::from_request(
                5,
                "host",
                CreateAttributeRequest::new("name", "Name", AttributeType::single_char()),
                "0",
            ),
        ];
        let v = Validator::new(AttributeCatalog::new("host", attrs), CharLimits::default());

        for field in ["online", "cpu", "since"] {
            for bad in [json!(""), json!([])] {
                let mut data = Document::new();
                data.insert(field.to_string(), bad.clone());
                let err = v.validate_create(&data).unwrap_err();
                assert_eq!(field_of(err).0, field, "create {field} = {bad}");

                let err = v
                    .validate_update(&data, &Document::new(), false)
                    .unwrap_err();
                assert_eq!(field_of(err).0, field, "update {field} = {bad}");
            }
        }

        let out = v
            .validate_create(&doc(json!({"load": "", "name": "", "online": null})))
            .unwrap();
        assert_eq!(out["load"], json!(""));
        assert_eq!(out["name"], json!(""));
        assert_eq!(out["online"], Value::Null);

        let err = v.validate_create(&doc(json!({"name": []}))).unwrap_err();
        assert_eq!(field_of(err).0, "name");
    }

    // =========================================================================
    // Update
    // =========================================================================

    #[test]
    fn test_update_drops_read_only_and_system_fields() {
        let v = validator();
        let existing = doc(json!({"asset_id": "A1", "serial": "S1"}));
        let out = v
            .validate_update(
                &doc(json!({"serial": "S2", "cpu": 4, "ownerId": "evil", "x": 1})),
                &existing,
                false,
            )
            .unwrap();
        assert_eq!(Value::Object(out), json!({"cpu": 4}));

        let out = v
            .validate_update(&doc(json!({"serial": "S2"})), &existing, true)
            .unwrap();
        assert_eq!(Value::Object(out), json!({"serial": "S2"}));
    }

    #[test]
    fn test_update_required_checked_on_merged_view() {
        let v = validator();
        let existing = doc(json!({"asset_id": "A1"}));
        assert!(v.validate_update(&doc(json!({"cpu": 2})), &existing, false).is_ok());

        let err = v
            .validate_update(&doc(json!({"asset_id": null})), &existing, false)
            .unwrap_err();
        assert_eq!(field_of(err), ("asset_id".to_string(), Violation::Missing));

        let err = v
            .validate_update(&doc(json!({"cpu": 2})), &Document::new(), false)
            .unwrap_err();
        assert_eq!(field_of(err).0, "asset_id");
    }

    #[test]
    fn test_update_type_checks_incoming() {
        let v = validator();
        let existing = doc(json!({"asset_id": "A1"}));
        let err = v
            .validate_update(&doc(json!({"online": "yes"})), &existing, false)
            .unwrap_err();
        assert_eq!(
            field_of(err),
            (
                "online".to_string(),
                Violation::TypeMismatch { expected: "boolean" }
            )
        );
    }
}
