//! Classification, model, attribute and attribute group operations

use tracing::{debug, warn};

use super::CmdbStore;
use crate::catalog::{SchemaCatalog, collections};
use crate::condition::{ConditionTree, FieldOperator, equals};
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};
use crate::schema::{
    Attribute, AttributeGroup, Classification, CreateAttributeRequest,
    CreateClassificationRequest, CreateGroupRequest, CreateModelRequest, DEFAULT_GROUP, Model,
    UpdateAttributeRequest, UpdateClassificationRequest, UpdateGroupRequest, UpdateModelRequest,
    now,
};
use crate::sql::{validate_identifier, validate_property_id};
use crate::storage::{FindOptions, SortField, from_document, replacement, to_document};
use crate::types::fields;

fn classification_filter(ctx: &RequestContext, classification_id: &str) -> ConditionTree {
    equals([
        (fields::OWNER_ID, ctx.owner_id.as_str()),
        ("classificationId", classification_id),
    ])
}

fn attribute_filter(ctx: &RequestContext, object_id: &str, property_id: &str) -> ConditionTree {
    let mut filter = SchemaCatalog::model_filter(ctx, object_id);
    filter.element([FieldOperator::eq("propertyId", property_id)]);
    filter
}

fn group_filter(ctx: &RequestContext, object_id: &str, group_id: &str) -> ConditionTree {
    let mut filter = SchemaCatalog::model_filter(ctx, object_id);
    filter.element([FieldOperator::eq("groupId", group_id)]);
    filter
}

impl CmdbStore {
    // =========================================================================
    // Classifications
    // =========================================================================

    pub async fn create_classification(
        &self,
        ctx: &RequestContext,
        request: CreateClassificationRequest,
    ) -> Result<Classification> {
        validate_identifier(&request.classification_id, &[]).map_err(CmdbError::invalid_argument)?;
        if self.get_classification(ctx, &request.classification_id).await?.is_some() {
            return Err(CmdbError::duplicate(format!(
                "classification '{}'",
                request.classification_id
            )));
        }

        let classification = Classification::from_request(request, &ctx.owner_id);
        self.db()
            .insert(collections::CLASSIFICATION, vec![to_document(&classification)?])
            .await?;
        debug!(
            rid = %ctx.request_id,
            classification_id = %classification.classification_id,
            "classification created"
        );
        Ok(classification)
    }

    pub async fn get_classification(
        &self,
        ctx: &RequestContext,
        classification_id: &str,
    ) -> Result<Option<Classification>> {
        self.db()
            .find_one(
                collections::CLASSIFICATION,
                &classification_filter(ctx, classification_id),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn list_classifications(&self, ctx: &RequestContext) -> Result<Vec<Classification>> {
        let docs = self
            .db()
            .find(
                collections::CLASSIFICATION,
                &SchemaCatalog::owner_filter(ctx),
                &FindOptions::new().sort(SortField::asc("classificationId")),
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    pub async fn update_classification(
        &self,
        ctx: &RequestContext,
        classification_id: &str,
        request: UpdateClassificationRequest,
    ) -> Result<Classification> {
        let existing = self
            .get_classification(ctx, classification_id)
            .await?
            .ok_or_else(|| {
                CmdbError::not_found(format!("classification '{}'", classification_id))
            })?;

        let updated = Classification {
            name: request.name.unwrap_or(existing.name),
            icon: request.icon.unwrap_or(existing.icon),
            last_time: now(),
            ..existing
        };
        self.db()
            .update(
                collections::CLASSIFICATION,
                &classification_filter(ctx, classification_id),
                &to_document(&updated)?,
            )
            .await?;
        Ok(updated)
    }

    /// Delete a classification no model belongs to
    pub async fn delete_classification(
        &self,
        ctx: &RequestContext,
        classification_id: &str,
    ) -> Result<()> {
        if self.get_classification(ctx, classification_id).await?.is_none() {
            return Err(CmdbError::not_found(format!(
                "classification '{}'",
                classification_id
            )));
        }
        let models = self
            .db()
            .count(collections::MODEL, &classification_filter(ctx, classification_id))
            .await?;
        if models > 0 {
            return Err(CmdbError::InUse(format!("classification '{}'", classification_id)));
        }
        self.db()
            .delete(
                collections::CLASSIFICATION,
                &classification_filter(ctx, classification_id),
            )
            .await?;
        debug!(rid = %ctx.request_id, classification_id = %classification_id, "classification deleted");
        Ok(())
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Create a model together with its `default` attribute group
    pub async fn create_model(&self, ctx: &RequestContext, request: CreateModelRequest) -> Result<Model> {
        validate_identifier(&request.object_id, &[]).map_err(CmdbError::invalid_argument)?;
        if let Some(id_field) = &request.id_field {
            validate_property_id(id_field, &[]).map_err(CmdbError::invalid_argument)?;
            if fields::SYSTEM.contains(&id_field.as_str()) {
                return Err(CmdbError::invalid_argument(format!(
                    "'{}' is a system field",
                    id_field
                )));
            }
        }
        if self.get_classification(ctx, &request.classification_id).await?.is_none() {
            return Err(CmdbError::not_found(format!(
                "classification '{}'",
                request.classification_id
            )));
        }
        if self.catalog().model(ctx, &request.object_id).await?.is_some() {
            return Err(CmdbError::duplicate(format!("model '{}'", request.object_id)));
        }
        self.ensure_model_name_free(ctx, &request.name, None).await?;

        let model = Model::from_request(request, &ctx.owner_id);
        self.db()
            .insert(collections::MODEL, vec![to_document(&model)?])
            .await?;
        let group = AttributeGroup::default_for(&model.object_id, &ctx.owner_id);
        self.db()
            .insert(collections::ATTRIBUTE_GROUP, vec![to_document(&group)?])
            .await?;

        debug!(rid = %ctx.request_id, object_id = %model.object_id, "model created");
        Ok(model)
    }

    async fn ensure_model_name_free(
        &self,
        ctx: &RequestContext,
        name: &str,
        except: Option<&str>,
    ) -> Result<()> {
        let mut filter = equals([(fields::OWNER_ID, ctx.owner_id.as_str()), ("name", name)]);
        if let Some(object_id) = except {
            filter.element([FieldOperator::ne(fields::OBJECT_ID, object_id)]);
        }
        if self.db().count(collections::MODEL, &filter).await? > 0 {
            return Err(CmdbError::duplicate(format!("model name '{}'", name)));
        }
        Ok(())
    }

    pub async fn get_model(&self, ctx: &RequestContext, object_id: &str) -> Result<Option<Model>> {
        self.catalog().model(ctx, object_id).await
    }

    pub async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<Model>> {
        let docs = self
            .db()
            .find(
                collections::MODEL,
                &SchemaCatalog::owner_filter(ctx),
                &FindOptions::new().sort(SortField::asc(fields::OBJECT_ID)),
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    /// Update name, icon or classification; preset models may only be renamed
    pub async fn update_model(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        request: UpdateModelRequest,
    ) -> Result<Model> {
        let existing = self.catalog().require_model(ctx, object_id).await?;
        if existing.is_preset && (request.icon.is_some() || request.classification_id.is_some()) {
            return Err(CmdbError::Preset(format!("model '{}'", object_id)));
        }
        if let Some(classification_id) = &request.classification_id
            && self.get_classification(ctx, classification_id).await?.is_none()
        {
            return Err(CmdbError::not_found(format!(
                "classification '{}'",
                classification_id
            )));
        }
        if let Some(name) = &request.name {
            self.ensure_model_name_free(ctx, name, Some(object_id)).await?;
        }

        let updated = Model {
            name: request.name.unwrap_or(existing.name),
            icon: request.icon.unwrap_or(existing.icon),
            classification_id: request
                .classification_id
                .unwrap_or(existing.classification_id),
            last_time: now(),
            ..existing
        };
        self.db()
            .update(
                collections::MODEL,
                &SchemaCatalog::model_filter(ctx, object_id),
                &to_document(&updated)?,
            )
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, "model updated");
        Ok(updated)
    }

    /// Delete a model that has no instances and no associations
    pub async fn delete_model(&self, ctx: &RequestContext, object_id: &str) -> Result<()> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        if model.is_preset {
            return Err(CmdbError::Preset(format!("model '{}'", object_id)));
        }

        let location = self.catalog().location(&model);
        let instances = self
            .db()
            .count(&location.collection, &location.base_filter(ctx))
            .await?;
        if instances > 0 {
            warn!(rid = %ctx.request_id, object_id = %object_id, instances, "model still has instances");
            return Err(CmdbError::HasInstances(object_id.to_string()));
        }
        if self.associations().has_model_associations(ctx, object_id).await? {
            warn!(rid = %ctx.request_id, object_id = %object_id, "model still has associations");
            return Err(CmdbError::HasAssociations(format!("model '{}'", object_id)));
        }

        self.remove_model_records(ctx, object_id).await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, "model deleted");
        Ok(())
    }

    /// Delete a model with everything hanging off it
    ///
    /// Order: instance associations, model associations, instances, unique constraints,
    /// attributes and groups, then the model record.
    pub async fn cascade_delete_model(&self, ctx: &RequestContext, object_id: &str) -> Result<()> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        if model.is_preset {
            return Err(CmdbError::Preset(format!("model '{}'", object_id)));
        }

        let edges = self
            .associations()
            .delete_all_instance_associations(ctx, object_id)
            .await?;
        let model_associations = self
            .associations()
            .delete_model_associations_for(ctx, object_id)
            .await?;

        let location = self.catalog().location(&model);
        let instances = self
            .db()
            .delete(&location.collection, &location.base_filter(ctx))
            .await?;

        self.remove_model_records(ctx, object_id).await?;
        debug!(
            rid = %ctx.request_id,
            object_id = %object_id,
            edges,
            model_associations,
            instances,
            "model cascade-deleted"
        );
        Ok(())
    }

    async fn remove_model_records(&self, ctx: &RequestContext, object_id: &str) -> Result<()> {
        let filter = SchemaCatalog::model_filter(ctx, object_id);
        self.unique().delete_all(ctx, object_id).await?;
        self.db().delete(collections::ATTRIBUTE, &filter).await?;
        self.db().delete(collections::ATTRIBUTE_GROUP, &filter).await?;
        self.db().delete(collections::MODEL, &filter).await?;
        Ok(())
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub async fn create_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        request: CreateAttributeRequest,
    ) -> Result<Attribute> {
        let model = self.catalog().require_model(ctx, object_id).await?;

        let mut reserved: Vec<&str> = fields::SYSTEM.to_vec();
        reserved.extend([
            model.id_field.as_str(),
            fields::DATA_STATUS,
            fields::PARENT_ID,
            fields::CHILD_ID,
        ]);
        validate_property_id(&request.property_id, &reserved).map_err(CmdbError::invalid_argument)?;
        request.attr_type.validate_options()?;

        if self.get_attribute(ctx, object_id, &request.property_id).await?.is_some() {
            return Err(CmdbError::duplicate(format!(
                "attribute '{}' of model '{}'",
                request.property_id, object_id
            )));
        }
        self.require_group(ctx, object_id, &request.group_id).await?;

        let id = self.db().next_sequence(collections::ATTRIBUTE).await?;
        let attribute = Attribute::from_request(id, object_id, request, &ctx.owner_id);
        self.db()
            .insert(collections::ATTRIBUTE, vec![to_document(&attribute)?])
            .await?;
        debug!(
            rid = %ctx.request_id,
            object_id = %object_id,
            property_id = %attribute.property_id,
            id,
            "attribute created"
        );
        Ok(attribute)
    }

    /// An attribute regardless of business scope
    pub async fn get_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        property_id: &str,
    ) -> Result<Option<Attribute>> {
        self.db()
            .find_one(
                collections::ATTRIBUTE,
                &attribute_filter(ctx, object_id, property_id),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    async fn require_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        property_id: &str,
    ) -> Result<Attribute> {
        self.get_attribute(ctx, object_id, property_id)
            .await?
            .ok_or_else(|| {
                CmdbError::not_found(format!(
                    "attribute '{}' of model '{}'",
                    property_id, object_id
                ))
            })
    }

    /// Attributes visible from the caller's business scope, in display order
    pub async fn list_attributes(&self, ctx: &RequestContext, object_id: &str) -> Result<Vec<Attribute>> {
        self.catalog().require_model(ctx, object_id).await?;
        let catalog = self.catalog().attributes(ctx, object_id).await?;
        Ok(catalog.all().to_vec())
    }

    /// Update an attribute; the property id and type variant never change and preset
    /// attributes only accept name, group and index
    pub async fn update_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        property_id: &str,
        request: UpdateAttributeRequest,
    ) -> Result<Attribute> {
        let existing = self.require_attribute(ctx, object_id, property_id).await?;
        if existing.is_preset && !request.is_layout_only() {
            return Err(CmdbError::Preset(format!(
                "attribute '{}' of model '{}'",
                property_id, object_id
            )));
        }
        if let Some(attr_type) = &request.attr_type {
            if attr_type.kind() != existing.attr_type.kind() {
                return Err(CmdbError::Immutable("type".to_string()));
            }
            attr_type.validate_options()?;
        }
        if let Some(group_id) = &request.group_id {
            self.require_group(ctx, object_id, group_id).await?;
        }

        let old = to_document(&existing)?;
        let updated = Attribute {
            name: request.name.unwrap_or_else(|| existing.name.clone()),
            attr_type: request.attr_type.unwrap_or_else(|| existing.attr_type.clone()),
            required: request.required.unwrap_or(existing.required),
            editable: request.editable.unwrap_or(existing.editable),
            group_id: request.group_id.unwrap_or_else(|| existing.group_id.clone()),
            index: request.index.unwrap_or(existing.index),
            default: match request.default {
                Some(serde_json::Value::Null) => None,
                Some(value) => Some(value),
                None => existing.default.clone(),
            },
            last_time: now(),
            ..existing
        };
        let set = replacement(&old, to_document(&updated)?);
        self.db()
            .update(
                collections::ATTRIBUTE,
                &attribute_filter(ctx, object_id, property_id),
                &set,
            )
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, property_id = %property_id, "attribute updated");
        Ok(updated)
    }

    /// Delete a non-preset attribute no unique constraint uses
    pub async fn delete_attribute(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        property_id: &str,
    ) -> Result<()> {
        let attribute = self.require_attribute(ctx, object_id, property_id).await?;
        if attribute.is_preset {
            return Err(CmdbError::Preset(format!(
                "attribute '{}' of model '{}'",
                property_id, object_id
            )));
        }
        if self
            .unique()
            .references_attribute(ctx, object_id, attribute.id)
            .await?
        {
            return Err(CmdbError::InUse(format!(
                "attribute '{}' of model '{}'",
                property_id, object_id
            )));
        }
        self.db()
            .delete(
                collections::ATTRIBUTE,
                &attribute_filter(ctx, object_id, property_id),
            )
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, property_id = %property_id, "attribute deleted");
        Ok(())
    }

    // =========================================================================
    // Attribute groups
    // =========================================================================

    pub async fn create_group(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        request: CreateGroupRequest,
    ) -> Result<AttributeGroup> {
        self.catalog().require_model(ctx, object_id).await?;
        validate_identifier(&request.group_id, &[]).map_err(CmdbError::invalid_argument)?;
        if self.get_group(ctx, object_id, &request.group_id).await?.is_some() {
            return Err(CmdbError::duplicate(format!(
                "attribute group '{}' of model '{}'",
                request.group_id, object_id
            )));
        }

        let group = AttributeGroup::from_request(object_id, request, &ctx.owner_id);
        self.db()
            .insert(collections::ATTRIBUTE_GROUP, vec![to_document(&group)?])
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, group_id = %group.group_id, "attribute group created");
        Ok(group)
    }

    pub async fn get_group(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        group_id: &str,
    ) -> Result<Option<AttributeGroup>> {
        self.db()
            .find_one(
                collections::ATTRIBUTE_GROUP,
                &group_filter(ctx, object_id, group_id),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    async fn require_group(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        group_id: &str,
    ) -> Result<AttributeGroup> {
        self.get_group(ctx, object_id, group_id).await?.ok_or_else(|| {
            CmdbError::not_found(format!(
                "attribute group '{}' of model '{}'",
                group_id, object_id
            ))
        })
    }

    pub async fn list_groups(&self, ctx: &RequestContext, object_id: &str) -> Result<Vec<AttributeGroup>> {
        let options = FindOptions::new()
            .sort(SortField::asc("index"))
            .sort(SortField::asc("groupId"));
        let docs = self
            .db()
            .find(
                collections::ATTRIBUTE_GROUP,
                &SchemaCatalog::model_filter(ctx, object_id),
                &options,
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    pub async fn update_group(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        group_id: &str,
        request: UpdateGroupRequest,
    ) -> Result<AttributeGroup> {
        let existing = self.require_group(ctx, object_id, group_id).await?;
        let updated = AttributeGroup {
            name: request.name.unwrap_or(existing.name),
            index: request.index.unwrap_or(existing.index),
            ..existing
        };
        self.db()
            .update(
                collections::ATTRIBUTE_GROUP,
                &group_filter(ctx, object_id, group_id),
                &to_document(&updated)?,
            )
            .await?;
        Ok(updated)
    }

    /// Delete an empty, non-default group
    pub async fn delete_group(&self, ctx: &RequestContext, object_id: &str, group_id: &str) -> Result<()> {
        let group = self.require_group(ctx, object_id, group_id).await?;
        if group.is_default || group.group_id == DEFAULT_GROUP {
            return Err(CmdbError::Preset(format!(
                "attribute group '{}' of model '{}'",
                group_id, object_id
            )));
        }
        let members = self
            .db()
            .count(collections::ATTRIBUTE, &group_filter(ctx, object_id, group_id))
            .await?;
        if members > 0 {
            return Err(CmdbError::InUse(format!(
                "attribute group '{}' of model '{}'",
                group_id, object_id
            )));
        }
        self.db()
            .delete(
                collections::ATTRIBUTE_GROUP,
                &group_filter(ctx, object_id, group_id),
            )
            .await?;
        Ok(())
    }
}
