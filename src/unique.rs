//! Unique constraints and their enforcement
//!
//! Constraints are checked on every instance write and re-validated against the live
//! instances whenever a constraint is declared or edited.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{AttributeCatalog, InstanceLocation, SchemaCatalog, collections};
use crate::condition::{ConditionTree, FieldOperator};
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};
use crate::schema::{Attribute, Model, now};
use crate::storage::{Document, DocumentStore, FindOptions, SortField, from_document, to_document};
use crate::types::{fields, is_blank, zero_values};

/// A declared uniqueness rule over one or more attributes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UniqueConstraint {
    pub id: u64,
    pub object_id: String,
    /// Attribute ids
    pub keys: Vec<u64>,
    /// Enforced even when key values are empty; at most one per model
    #[serde(default)]
    pub must_check: bool,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default)]
    pub biz_id: Option<i64>,
    pub owner_id: String,
    pub last_time: String,
}

/// Request to declare a unique constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUniqueRequest {
    pub keys: Vec<u64>,
    #[serde(default)]
    pub must_check: bool,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default)]
    pub biz_id: Option<i64>,
}

impl CreateUniqueRequest {
    pub fn new(keys: Vec<u64>) -> Self {
        Self {
            keys,
            must_check: false,
            is_preset: false,
            biz_id: None,
        }
    }

    pub fn must_check(mut self) -> Self {
        self.must_check = true;
        self
    }

    pub fn preset(mut self) -> Self {
        self.is_preset = true;
        self
    }

    pub fn with_biz(mut self, biz_id: i64) -> Self {
        self.biz_id = Some(biz_id);
        self
    }
}

/// Request to edit a unique constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUniqueRequest {
    pub keys: Vec<u64>,
    #[serde(default)]
    pub must_check: bool,
}

impl UpdateUniqueRequest {
    pub fn new(keys: Vec<u64>, must_check: bool) -> Self {
        Self { keys, must_check }
    }
}

/// Write-time checks and constraint management
#[derive(Clone)]
pub struct UniquenessEngine {
    db: Arc<dyn DocumentStore>,
    catalog: SchemaCatalog,
}

impl UniquenessEngine {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            db: Arc::clone(catalog.db()),
            catalog,
        }
    }

    fn filter(ctx: &RequestContext, object_id: &str) -> ConditionTree {
        let mut filter = SchemaCatalog::model_filter(ctx, object_id);
        filter.merge(SchemaCatalog::biz_scope(ctx));
        filter
    }

    /// Constraints of a model visible from the caller's business scope
    pub async fn list_unique(
        &self,
        ctx: &RequestContext,
        object_id: &str,
    ) -> Result<Vec<UniqueConstraint>> {
        let docs = self
            .db
            .find(
                collections::UNIQUE,
                &Self::filter(ctx, object_id),
                &FindOptions::new().sort(SortField::asc("id")),
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    /// Every constraint of a model regardless of business scope
    async fn all_constraints(&self, ctx: &RequestContext, object_id: &str) -> Result<Vec<UniqueConstraint>> {
        let docs = self
            .db
            .find(
                collections::UNIQUE,
                &SchemaCatalog::model_filter(ctx, object_id),
                &FindOptions::new().sort(SortField::asc("id")),
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    async fn get(&self, ctx: &RequestContext, object_id: &str, id: u64) -> Result<UniqueConstraint> {
        let mut filter = SchemaCatalog::model_filter(ctx, object_id);
        filter.element([FieldOperator::eq("id", id)]);
        self.db
            .find_one(collections::UNIQUE, &filter)
            .await?
            .map(from_document)
            .transpose()?
            .ok_or_else(|| CmdbError::not_found(format!("unique constraint {}", id)))
    }

    /// Whether any constraint of the model names the attribute
    pub async fn references_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        attribute_id: u64,
    ) -> Result<bool> {
        let mut filter = SchemaCatalog::model_filter(ctx, object_id);
        filter.element([FieldOperator::eq("keys", attribute_id)]);
        Ok(self.db.count(collections::UNIQUE, &filter).await? > 0)
    }

    // =========================================================================
    // Write-time checks
    // =========================================================================

    /// Fail with `DuplicateUnique` when a new instance would collide with a live one
    pub async fn check_create(
        &self,
        ctx: &RequestContext,
        location: &InstanceLocation,
        attrs: &AttributeCatalog,
        doc: &Document,
    ) -> Result<()> {
        self.check(ctx, location, attrs, doc, None).await
    }

    /// Like [`check_create`](Self::check_create) for the merged view of an updated
    /// instance, ignoring the instance itself
    pub async fn check_update(
        &self,
        ctx: &RequestContext,
        location: &InstanceLocation,
        attrs: &AttributeCatalog,
        merged: &Document,
        id: u64,
    ) -> Result<()> {
        self.check(ctx, location, attrs, merged, Some(id)).await
    }

    async fn check(
        &self,
        ctx: &RequestContext,
        location: &InstanceLocation,
        attrs: &AttributeCatalog,
        doc: &Document,
        exclude: Option<u64>,
    ) -> Result<()> {
        for constraint in self.list_unique(ctx, &location.object_id).await? {
            let Some(keys) = resolve_keys(attrs, &constraint.keys) else {
                // a key outside the caller's scope; the constraint does not apply here
                continue;
            };
            let Some(filter) = write_check_filter(ctx, location, &keys, constraint.must_check, doc, exclude)
            else {
                continue;
            };

            if self.db.count(&location.collection, &filter).await? > 0 {
                let fields: Vec<String> = keys.iter().map(|a| a.property_id.clone()).collect();
                warn!(
                    rid = %ctx.request_id,
                    object_id = %location.object_id,
                    fields = ?fields,
                    "duplicate unique value"
                );
                return Err(CmdbError::DuplicateUnique {
                    object_id: location.object_id.clone(),
                    fields,
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Constraint management
    // =========================================================================

    pub async fn create_unique(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        request: CreateUniqueRequest,
    ) -> Result<UniqueConstraint> {
        let model = self.catalog.require_model(ctx, object_id).await?;
        let attrs = self.catalog.attributes(ctx, object_id).await?;
        let keys = self
            .validate_keys(ctx, &model, &attrs, &request.keys, request.must_check, None)
            .await?;
        self.recheck(ctx, &model, &keys, request.must_check).await?;

        let constraint = UniqueConstraint {
            id: self.db.next_sequence(collections::UNIQUE).await?,
            object_id: object_id.to_string(),
            keys: request.keys,
            must_check: request.must_check,
            is_preset: request.is_preset,
            biz_id: request.biz_id,
            owner_id: ctx.owner_id.clone(),
            last_time: now(),
        };
        self.db
            .insert(collections::UNIQUE, vec![to_document(&constraint)?])
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, id = constraint.id, "unique constraint created");
        Ok(constraint)
    }

    pub async fn update_unique(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        id: u64,
        request: UpdateUniqueRequest,
    ) -> Result<UniqueConstraint> {
        let existing = self.get(ctx, object_id, id).await?;
        if existing.is_preset {
            return Err(CmdbError::Preset(format!("unique constraint {}", id)));
        }
        let model = self.catalog.require_model(ctx, object_id).await?;
        let attrs = self.catalog.attributes(ctx, object_id).await?;
        let keys = self
            .validate_keys(ctx, &model, &attrs, &request.keys, request.must_check, Some(id))
            .await?;
        self.recheck(ctx, &model, &keys, request.must_check).await?;

        let updated = UniqueConstraint {
            keys: request.keys,
            must_check: request.must_check,
            last_time: now(),
            ..existing
        };
        let mut filter = SchemaCatalog::model_filter(ctx, object_id);
        filter.element([FieldOperator::eq("id", id)]);
        self.db
            .update(collections::UNIQUE, &filter, &to_document(&updated)?)
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, id, "unique constraint updated");
        Ok(updated)
    }

    pub async fn delete_unique(&self, ctx: &RequestContext, object_id: &str, id: u64) -> Result<()> {
        let existing = self.get(ctx, object_id, id).await?;
        if existing.is_preset {
            return Err(CmdbError::Preset(format!("unique constraint {}", id)));
        }
        if existing.must_check {
            let others = self
                .all_constraints(ctx, object_id)
                .await?
                .into_iter()
                .filter(|c| c.id != id)
                .count();
            if others == 0 {
                return Err(CmdbError::invalid_argument(format!(
                    "model '{}' must keep at least one unique constraint",
                    object_id
                )));
            }
        }

        let mut filter = SchemaCatalog::model_filter(ctx, object_id);
        filter.element([FieldOperator::eq("id", id)]);
        self.db.delete(collections::UNIQUE, &filter).await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, id, "unique constraint deleted");
        Ok(())
    }

    /// Remove every constraint of a model, presets included
    pub(crate) async fn delete_all(&self, ctx: &RequestContext, object_id: &str) -> Result<u64> {
        self.db
            .delete(collections::UNIQUE, &SchemaCatalog::model_filter(ctx, object_id))
            .await
    }

    async fn validate_keys<'a>(
        &self,
        ctx: &RequestContext,
        model: &Model,
        attrs: &'a AttributeCatalog,
        keys: &[u64],
        must_check: bool,
        editing: Option<u64>,
    ) -> Result<Vec<&'a Attribute>> {
        if keys.is_empty() {
            return Err(CmdbError::invalid_argument("unique constraint has no keys"));
        }
        let distinct: HashSet<u64> = keys.iter().copied().collect();
        if distinct.len() != keys.len() {
            return Err(CmdbError::invalid_argument("unique constraint repeats a key"));
        }

        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let attr = attrs.by_id(*key).ok_or_else(|| {
                CmdbError::not_found(format!("attribute {} of model '{}'", key, model.object_id))
            })?;
            if !attr.attr_type.is_unique_capable() {
                return Err(CmdbError::invalid_argument(format!(
                    "attribute '{}' of type {} cannot be unique",
                    attr.property_id,
                    attr.attr_type.type_name()
                )));
            }
            resolved.push(attr);
        }

        let existing: Vec<UniqueConstraint> = self
            .all_constraints(ctx, &model.object_id)
            .await?
            .into_iter()
            .filter(|c| Some(c.id) != editing)
            .collect();
        if must_check && existing.iter().any(|c| c.must_check) {
            return Err(CmdbError::invalid_argument(format!(
                "model '{}' already has a mandatory unique constraint",
                model.object_id
            )));
        }
        if existing
            .iter()
            .any(|c| c.keys.iter().copied().collect::<HashSet<u64>>() == distinct)
        {
            return Err(CmdbError::duplicate(format!(
                "unique constraint on {:?} of model '{}'",
                keys, model.object_id
            )));
        }
        Ok(resolved)
    }

    /// Reject a constraint that live instances already violate
    async fn recheck(
        &self,
        ctx: &RequestContext,
        model: &Model,
        keys: &[&Attribute],
        must_check: bool,
    ) -> Result<()> {
        let location = self.catalog.location(model);
        let mut filter = location.base_filter(ctx);
        filter.element([FieldOperator::ne(
            fields::DATA_STATUS,
            fields::DATA_STATUS_DISABLED,
        )]);
        if let Some(biz) = ctx.biz_id {
            filter.element([FieldOperator::eq(fields::BIZ_ID, biz)]);
        }
        if !must_check {
            filter.element(
                keys.iter()
                    .map(|a| FieldOperator::nin(a.property_id.as_str(), zero_values())),
            );
        }

        let key_names: Vec<String> = keys.iter().map(|a| a.property_id.clone()).collect();
        if let Some(group) = self
            .db
            .find_duplicate_group(&location.collection, &filter, &key_names)
            .await?
        {
            warn!(
                rid = %ctx.request_id,
                object_id = %model.object_id,
                values = ?group.values,
                count = group.count,
                "unique constraint conflicts with existing instances"
            );
            return Err(CmdbError::UniqueConflict {
                object_id: model.object_id.clone(),
                fields: key_names,
            });
        }
        Ok(())
    }
}

fn resolve_keys<'a>(attrs: &'a AttributeCatalog, keys: &[u64]) -> Option<Vec<&'a Attribute>> {
    keys.iter().map(|id| attrs.by_id(*id)).collect()
}

/// Filter matching live instances that share the candidate's key values, or `None`
/// when a non-mandatory constraint has an empty key and so does not apply
fn write_check_filter(
    ctx: &RequestContext,
    location: &InstanceLocation,
    keys: &[&Attribute],
    must_check: bool,
    doc: &Document,
    exclude: Option<u64>,
) -> Option<ConditionTree> {
    let mut filter = location.base_filter(ctx);
    for attr in keys {
        let value = doc.get(&attr.property_id);
        if is_blank(value) && !must_check {
            return None;
        }
        filter.element([FieldOperator::eq(
            attr.property_id.as_str(),
            value.cloned().unwrap_or(Value::Null),
        )]);
    }
    filter.element([FieldOperator::ne(
        fields::DATA_STATUS,
        fields::DATA_STATUS_DISABLED,
    )]);
    if let Some(id) = exclude {
        filter.element([FieldOperator::ne(location.id_field.as_str(), id)]);
    }
    Some(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CreateAttributeRequest;
    use crate::types::AttributeType;
    use serde_json::json;

    fn location() -> InstanceLocation {
        InstanceLocation {
            object_id: "host".into(),
            collection: "object_instance".into(),
            id_field: "instId".into(),
        }
    }

    fn attr(id: u64, name: &str) -> Attribute {
        Attribute::from_request(
            id,
            "host",
            CreateAttributeRequest::new(name, name, AttributeType::single_char()),
            "0",
        )
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_write_check_filter_shape() {
        let ctx = RequestContext::new("0");
        let a = attr(1, "asset_id");
        let filter = write_check_filter(
            &ctx,
            &location(),
            &[&a],
            false,
            &doc(json!({"asset_id": "A1"})),
            Some(9),
        )
        .unwrap();
        assert_eq!(
            filter.to_filter(),
            json!({
                "ownerId": {"$eq": "0"},
                "objectId": {"$eq": "host"},
                "asset_id": {"$eq": "A1"},
                "dataStatus": {"$ne": "disabled"},
                "instId": {"$ne": 9}
            })
        );
    }

    #[test]
    fn test_blank_key_skips_optional_constraint() {
        let ctx = RequestContext::new("0");
        let a = attr(1, "asset_id");
        let b = attr(2, "rack");
        let candidate = doc(json!({"asset_id": "A1", "rack": ""}));
        assert!(write_check_filter(&ctx, &location(), &[&a, &b], false, &candidate, None).is_none());

        let mandatory = write_check_filter(&ctx, &location(), &[&a, &b], true, &candidate, None);
        assert!(mandatory.is_some());
    }

    #[test]
    fn test_resolve_keys_requires_every_key() {
        let catalog = AttributeCatalog::new("host", vec![attr(1, "a"), attr(2, "b")]);
        assert_eq!(resolve_keys(&catalog, &[1, 2]).map(|v| v.len()), Some(2));
        assert!(resolve_keys(&catalog, &[1, 3]).is_none());
    }

    #[test]
    fn test_request_builders() {
        let request = CreateUniqueRequest::new(vec![1, 2]).must_check().with_biz(4);
        assert!(request.must_check);
        assert_eq!(request.biz_id, Some(4));
        assert!(!request.is_preset);
    }

    #[test]
    fn test_write_check_filter_ignores_disabled_records() {
        let ctx = RequestContext::new("0");
        let a = attr(1, "asset_id");
        let filter =
            write_check_filter(&ctx, &location(), &[&a], true, &doc(json!({"asset_id": "A1"})), None)
                .unwrap();
        assert!(filter.matches(&doc(json!({"ownerId": "0", "objectId": "host", "asset_id": "A1"}))));
        assert!(!filter.matches(&doc(json!({
            "ownerId": "0", "objectId": "host", "asset_id": "A1", "dataStatus": "disabled"
        }))));
        assert!(!filter.matches(&doc(json!({"ownerId": "1", "objectId": "host", "asset_id": "A1"}))));
    }
}
