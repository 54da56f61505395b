//! Schema lookups shared by the validator, the uniqueness and association engines
//! and the instance store

use std::sync::Arc;

use serde_json::Value;

use crate::condition::{ConditionTree, FieldOperator, equals};
use crate::config::StoreConfig;
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};
use crate::schema::{Attribute, Model};
use crate::storage::{Document, DocumentStore, FindOptions, SortField, from_document};
use crate::types::fields;

/// Collection names of the metadata records
pub mod collections {
    pub const CLASSIFICATION: &str = "classification";
    pub const MODEL: &str = "model";
    pub const ATTRIBUTE: &str = "attribute";
    pub const ATTRIBUTE_GROUP: &str = "attribute_group";
    pub const UNIQUE: &str = "unique_constraint";
    pub const ASSOCIATION_KIND: &str = "association_kind";
    pub const MODEL_ASSOCIATION: &str = "model_association";

    /// Edges touching instances of `object_id`
    pub fn instance_association(object_id: &str) -> String {
        format!("inst_asst_{}", object_id)
    }
}

/// Where and how a model's instances are stored
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceLocation {
    pub object_id: String,
    pub collection: String,
    pub id_field: String,
}

impl InstanceLocation {
    /// Filter restricting a collection to this model's instances of the caller
    pub fn base_filter(&self, ctx: &RequestContext) -> ConditionTree {
        equals([
            (fields::OWNER_ID, Value::from(ctx.owner_id.as_str())),
            (fields::OBJECT_ID, Value::from(self.object_id.as_str())),
        ])
    }

    /// Base filter narrowed to one instance
    pub fn id_filter(&self, ctx: &RequestContext, id: u64) -> ConditionTree {
        let mut filter = self.base_filter(ctx);
        filter.element([FieldOperator::eq(self.id_field.as_str(), id)]);
        filter
    }

    /// Base filter narrowed to a set of instances
    pub fn ids_filter(&self, ctx: &RequestContext, ids: &[u64]) -> ConditionTree {
        let mut filter = self.base_filter(ctx);
        filter.element([FieldOperator::is_in(self.id_field.as_str(), ids.iter().copied())]);
        filter
    }

    /// Instance id carried by a stored document
    pub fn id_of(&self, doc: &Document) -> Result<u64> {
        doc.get(&self.id_field)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                CmdbError::storage(format!(
                    "instance of '{}' has no numeric '{}'",
                    self.object_id, self.id_field
                ))
            })
    }
}

/// The attributes of one model as seen from one business scope
#[derive(Debug, Clone, Default)]
pub struct AttributeCatalog {
    object_id: String,
    attributes: Vec<Attribute>,
}

impl AttributeCatalog {
    pub fn new(object_id: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            object_id: object_id.into(),
            attributes,
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn all(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn required(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.required)
    }

    pub fn get(&self, property_id: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.property_id == property_id)
    }

    pub fn by_id(&self, id: u64) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Read access to models and attributes
#[derive(Clone)]
pub struct SchemaCatalog {
    db: Arc<dyn DocumentStore>,
    config: StoreConfig,
}

impl SchemaCatalog {
    pub fn new(db: Arc<dyn DocumentStore>, config: StoreConfig) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &Arc<dyn DocumentStore> {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Owner filter for metadata collections
    pub fn owner_filter(ctx: &RequestContext) -> ConditionTree {
        equals([(fields::OWNER_ID, ctx.owner_id.as_str())])
    }

    /// Owner filter narrowed to one model
    pub fn model_filter(ctx: &RequestContext, object_id: &str) -> ConditionTree {
        equals([
            (fields::OWNER_ID, ctx.owner_id.as_str()),
            (fields::OBJECT_ID, object_id),
        ])
    }

    /// Business-scope filter: global records plus those labelled with the caller's scope
    pub fn biz_scope(ctx: &RequestContext) -> ConditionTree {
        match ctx.biz_id {
            Some(biz) => {
                let mut tree = ConditionTree::new();
                tree.or([
                    FieldOperator::eq(fields::BIZ_ID, Value::Null),
                    FieldOperator::eq(fields::BIZ_ID, biz),
                ]);
                tree
            }
            None => equals([(fields::BIZ_ID, Value::Null)]),
        }
    }

    pub async fn model(&self, ctx: &RequestContext, object_id: &str) -> Result<Option<Model>> {
        let filter = Self::model_filter(ctx, object_id);
        self.db
            .find_one(collections::MODEL, &filter)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Like [`model`](Self::model), failing with `NotFound` when absent
    pub async fn require_model(&self, ctx: &RequestContext, object_id: &str) -> Result<Model> {
        self.model(ctx, object_id)
            .await?
            .ok_or_else(|| CmdbError::not_found(format!("model '{}'", object_id)))
    }

    /// Attributes of a model visible from the caller's business scope, excluding the
    /// internal topology link fields
    pub async fn attributes(
        &self,
        ctx: &RequestContext,
        object_id: &str,
    ) -> Result<AttributeCatalog> {
        let mut filter = Self::model_filter(ctx, object_id);
        filter.merge(Self::biz_scope(ctx));
        filter.element([FieldOperator::nin(
            "propertyId",
            [fields::PARENT_ID, fields::CHILD_ID],
        )]);

        let options = FindOptions::new()
            .sort(SortField::asc("index"))
            .sort(SortField::asc("id"));
        let docs = self.db.find(collections::ATTRIBUTE, &filter, &options).await?;
        let attributes = docs
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<Attribute>>>()?;
        Ok(AttributeCatalog::new(object_id, attributes))
    }

    /// Storage location of a model's instances
    pub fn location(&self, model: &Model) -> InstanceLocation {
        InstanceLocation {
            object_id: model.object_id.clone(),
            collection: model
                .collection
                .clone()
                .unwrap_or_else(|| self.config.shared_instance_collection.clone()),
            id_field: model.id_field.clone(),
        }
    }

    pub async fn instance_exists(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        id: u64,
    ) -> Result<bool> {
        let Some(model) = self.model(ctx, object_id).await? else {
            return Ok(false);
        };
        let location = self.location(&model);
        let count = self
            .db
            .count(&location.collection, &location.id_filter(ctx, id))
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, CreateAttributeRequest, CreateModelRequest};
    use crate::storage::{MemoryStore, to_document};
    use crate::types::AttributeType;
    use serde_json::json;

    fn attr(id: u64, property_id: &str, biz: Option<i64>) -> Attribute {
        let mut request = CreateAttributeRequest::new(property_id, property_id, AttributeType::single_char());
        request.biz_id = biz;
        Attribute::from_request(id, "host", request, "0")
    }

    async fn seeded() -> SchemaCatalog {
        let db: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let model = Model::from_request(CreateModelRequest::new("host", "infra", "Host"), "0");
        db.insert(collections::MODEL, vec![to_document(&model).unwrap()])
            .await
            .unwrap();
        let attrs = vec![
            attr(1, "name", None),
            attr(2, "rack", Some(7)),
            attr(3, fields::PARENT_ID, None),
            attr(4, "zone", Some(8)),
        ];
        db.insert(
            collections::ATTRIBUTE,
            attrs.iter().map(|a| to_document(a).unwrap()).collect(),
        )
        .await
        .unwrap();
        SchemaCatalog::new(db, StoreConfig::default())
    }

    #[tokio::test]
    async fn test_attributes_scoped_by_biz() {
        let catalog = seeded().await;

        let global = catalog.attributes(&RequestContext::new("0"), "host").await.unwrap();
        let ids: Vec<&str> = global.all().iter().map(|a| a.property_id.as_str()).collect();
        assert_eq!(ids, vec!["name"]);

        let scoped = catalog
            .attributes(&RequestContext::new("0").with_biz(7), "host")
            .await
            .unwrap();
        let ids: Vec<&str> = scoped.all().iter().map(|a| a.property_id.as_str()).collect();
        assert_eq!(ids, vec!["name", "rack"]);
        assert!(scoped.by_id(2).is_some());
        assert!(scoped.get("zone").is_none());
    }

    #[tokio::test]
    async fn test_models_are_owner_scoped() {
        let catalog = seeded().await;
        assert!(catalog.model(&RequestContext::new("0"), "host").await.unwrap().is_some());
        assert!(catalog.model(&RequestContext::new("1"), "host").await.unwrap().is_none());
        let err = catalog
            .require_model(&RequestContext::new("1"), "host")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_location_and_filters() {
        let catalog = seeded().await;
        let ctx = RequestContext::new("0");
        let model = catalog.require_model(&ctx, "host").await.unwrap();
        let location = catalog.location(&model);
        assert_eq!(location.collection, "object_instance");
        assert_eq!(location.id_field, "instId");
        assert_eq!(
            location.id_filter(&ctx, 5).to_filter(),
            json!({"ownerId": {"$eq": "0"}, "objectId": {"$eq": "host"}, "instId": {"$eq": 5}})
        );
        assert!(!catalog.instance_exists(&ctx, "host", 5).await.unwrap());
    }
}
