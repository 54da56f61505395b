//! AssociationEngine - association kinds, model associations and instance edges
//!
//! One-to-one and one-to-many edges are created under named locks so the cardinality
//! re-check and the write happen while no other writer can touch the same endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{
    AssociationKind, CreateInstanceAssociationRequest, CreateKindRequest,
    CreateModelAssociationRequest, InstanceAssociation, Mapping, ModelAssociation, OnDelete,
    PRESET_KINDS, UpdateKindRequest,
};
use crate::catalog::{SchemaCatalog, collections};
use crate::condition::{ConditionTree, FieldOperator, equals};
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};
use crate::instance::{BatchResult, QueryOptions, QueryResult};
use crate::lock::{LockService, acquire_all};
use crate::schema::now;
use crate::sql::validate_identifier;
use crate::storage::{Document, DocumentStore, FindOptions, from_document, to_document};
use crate::types::fields;

/// Sequence naming instance association ids
const EDGE_SEQUENCE: &str = "inst_asst";

/// Manages association metadata and enforces edge cardinality
#[derive(Clone)]
pub struct AssociationEngine {
    db: Arc<dyn DocumentStore>,
    locks: Arc<dyn LockService>,
    catalog: SchemaCatalog,
}

impl AssociationEngine {
    pub fn new(catalog: SchemaCatalog, locks: Arc<dyn LockService>) -> Self {
        Self {
            db: Arc::clone(catalog.db()),
            locks,
            catalog,
        }
    }

    // =========================================================================
    // Association kinds
    // =========================================================================

    fn kind_filter(ctx: &RequestContext, kind_id: &str) -> ConditionTree {
        equals([(fields::OWNER_ID, ctx.owner_id.as_str()), ("kindId", kind_id)])
    }

    pub async fn get_kind(&self, ctx: &RequestContext, kind_id: &str) -> Result<Option<AssociationKind>> {
        self.db
            .find_one(collections::ASSOCIATION_KIND, &Self::kind_filter(ctx, kind_id))
            .await?
            .map(from_document)
            .transpose()
    }

    async fn require_kind(&self, ctx: &RequestContext, kind_id: &str) -> Result<AssociationKind> {
        self.get_kind(ctx, kind_id)
            .await?
            .ok_or_else(|| CmdbError::not_found(format!("association kind '{}'", kind_id)))
    }

    pub async fn list_kinds(&self, ctx: &RequestContext) -> Result<Vec<AssociationKind>> {
        let docs = self
            .db
            .find(
                collections::ASSOCIATION_KIND,
                &SchemaCatalog::owner_filter(ctx),
                &FindOptions::new(),
            )
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    pub async fn create_kind(
        &self,
        ctx: &RequestContext,
        request: CreateKindRequest,
    ) -> Result<AssociationKind> {
        self.insert_kind(ctx, request, false).await
    }

    async fn insert_kind(
        &self,
        ctx: &RequestContext,
        request: CreateKindRequest,
        is_preset: bool,
    ) -> Result<AssociationKind> {
        validate_identifier(&request.kind_id, &[]).map_err(CmdbError::invalid_argument)?;
        if self.get_kind(ctx, &request.kind_id).await?.is_some() {
            return Err(CmdbError::duplicate(format!(
                "association kind '{}'",
                request.kind_id
            )));
        }

        let now = now();
        let kind = AssociationKind {
            kind_id: request.kind_id,
            name: request.name,
            src_des: request.src_des,
            dest_des: request.dest_des,
            direction: request.direction,
            is_preset,
            owner_id: ctx.owner_id.clone(),
            create_time: now.clone(),
            last_time: now,
        };
        self.db
            .insert(collections::ASSOCIATION_KIND, vec![to_document(&kind)?])
            .await?;
        debug!(rid = %ctx.request_id, kind_id = %kind.kind_id, "association kind created");
        Ok(kind)
    }

    /// Insert the preset kinds the tenant does not have yet
    pub async fn seed_preset_kinds(&self, ctx: &RequestContext) -> Result<()> {
        for (kind_id, name, src_des, dest_des) in PRESET_KINDS {
            if self.get_kind(ctx, kind_id).await?.is_some() {
                continue;
            }
            let request = CreateKindRequest::new(*kind_id, *name).with_descriptions(*src_des, *dest_des);
            self.insert_kind(ctx, request, true).await?;
        }
        Ok(())
    }

    pub async fn update_kind(
        &self,
        ctx: &RequestContext,
        kind_id: &str,
        request: UpdateKindRequest,
    ) -> Result<AssociationKind> {
        let existing = self.require_kind(ctx, kind_id).await?;
        if existing.is_preset {
            return Err(CmdbError::Preset(format!("association kind '{}'", kind_id)));
        }

        let updated = AssociationKind {
            name: request.name.unwrap_or(existing.name),
            src_des: request.src_des.unwrap_or(existing.src_des),
            dest_des: request.dest_des.unwrap_or(existing.dest_des),
            direction: request.direction.unwrap_or(existing.direction),
            last_time: now(),
            ..existing
        };
        self.db
            .update(
                collections::ASSOCIATION_KIND,
                &Self::kind_filter(ctx, kind_id),
                &to_document(&updated)?,
            )
            .await?;
        Ok(updated)
    }

    pub async fn delete_kind(&self, ctx: &RequestContext, kind_id: &str) -> Result<()> {
        let existing = self.require_kind(ctx, kind_id).await?;
        if existing.is_preset {
            return Err(CmdbError::Preset(format!("association kind '{}'", kind_id)));
        }
        let users = self
            .db
            .count(collections::MODEL_ASSOCIATION, &Self::kind_filter(ctx, kind_id))
            .await?;
        if users > 0 {
            return Err(CmdbError::InUse(format!("association kind '{}'", kind_id)));
        }
        self.db
            .delete(collections::ASSOCIATION_KIND, &Self::kind_filter(ctx, kind_id))
            .await?;
        debug!(rid = %ctx.request_id, kind_id = %kind_id, "association kind deleted");
        Ok(())
    }

    // =========================================================================
    // Model associations
    // =========================================================================

    fn model_association_filter(ctx: &RequestContext, id: &str) -> ConditionTree {
        equals([(fields::OWNER_ID, ctx.owner_id.as_str()), ("objAsstId", id)])
    }

    /// Model associations where `object_id` is on either side
    fn touching_model(ctx: &RequestContext, object_id: &str) -> ConditionTree {
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.or([
            FieldOperator::eq(fields::OBJECT_ID, object_id),
            FieldOperator::eq("asstObjectId", object_id),
        ]);
        filter
    }

    pub async fn get_model_association(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<ModelAssociation>> {
        self.db
            .find_one(
                collections::MODEL_ASSOCIATION,
                &Self::model_association_filter(ctx, id),
            )
            .await?
            .map(from_document)
            .transpose()
    }

    async fn require_model_association(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<ModelAssociation> {
        self.get_model_association(ctx, id)
            .await?
            .ok_or_else(|| CmdbError::not_found(format!("model association '{}'", id)))
    }

    /// All model associations, or those touching one model
    pub async fn list_model_associations(
        &self,
        ctx: &RequestContext,
        object_id: Option<&str>,
    ) -> Result<Vec<ModelAssociation>> {
        let filter = match object_id {
            Some(object_id) => Self::touching_model(ctx, object_id),
            None => SchemaCatalog::owner_filter(ctx),
        };
        let docs = self
            .db
            .find(collections::MODEL_ASSOCIATION, &filter, &FindOptions::new())
            .await?;
        docs.into_iter().map(from_document).collect()
    }

    pub async fn has_model_associations(&self, ctx: &RequestContext, object_id: &str) -> Result<bool> {
        let count = self
            .db
            .count(collections::MODEL_ASSOCIATION, &Self::touching_model(ctx, object_id))
            .await?;
        Ok(count > 0)
    }

    pub async fn create_model_association(
        &self,
        ctx: &RequestContext,
        request: CreateModelAssociationRequest,
    ) -> Result<ModelAssociation> {
        self.catalog.require_model(ctx, &request.object_id).await?;
        self.catalog.require_model(ctx, &request.asst_object_id).await?;
        self.require_kind(ctx, &request.kind_id).await?;

        let id = ModelAssociation::make_id(&request.object_id, &request.kind_id, &request.asst_object_id);
        if self.get_model_association(ctx, &id).await?.is_some() {
            return Err(CmdbError::duplicate(format!("model association '{}'", id)));
        }

        let now = now();
        let association = ModelAssociation {
            id,
            object_id: request.object_id,
            asst_object_id: request.asst_object_id,
            kind_id: request.kind_id,
            mapping: request.mapping,
            on_delete: request.on_delete,
            alias_name: request.alias_name,
            is_preset: request.is_preset,
            owner_id: ctx.owner_id.clone(),
            create_time: now.clone(),
            last_time: now,
        };
        self.db
            .insert(collections::MODEL_ASSOCIATION, vec![to_document(&association)?])
            .await?;
        debug!(rid = %ctx.request_id, obj_asst_id = %association.id, "model association created");
        Ok(association)
    }

    /// Apply a patch; only `aliasName` and `onDelete` may change
    pub async fn update_model_association(
        &self,
        ctx: &RequestContext,
        id: &str,
        patch: &Document,
    ) -> Result<ModelAssociation> {
        let mut association = self.require_model_association(ctx, id).await?;
        for (key, value) in patch {
            match key.as_str() {
                "aliasName" => {
                    association.alias_name = value
                        .as_str()
                        .ok_or_else(|| CmdbError::invalid_argument("aliasName must be a string"))?
                        .to_string();
                }
                "onDelete" => {
                    association.on_delete = serde_json::from_value::<OnDelete>(value.clone())
                        .map_err(|e| CmdbError::invalid_argument(format!("onDelete: {}", e)))?;
                }
                other => return Err(CmdbError::Immutable(other.to_string())),
            }
        }
        association.last_time = now();
        self.db
            .update(
                collections::MODEL_ASSOCIATION,
                &Self::model_association_filter(ctx, id),
                &to_document(&association)?,
            )
            .await?;
        Ok(association)
    }

    pub async fn delete_model_association(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        let association = self.require_model_association(ctx, id).await?;
        if association.is_preset {
            return Err(CmdbError::Preset(format!("model association '{}'", id)));
        }

        let mut edges = SchemaCatalog::owner_filter(ctx);
        edges.element([FieldOperator::eq("objAsstId", id)]);
        let count = self
            .db
            .count(
                &collections::instance_association(&association.object_id),
                &edges,
            )
            .await?;
        if count > 0 {
            return Err(CmdbError::HasAssociations(format!("model association '{}'", id)));
        }

        self.db
            .delete(
                collections::MODEL_ASSOCIATION,
                &Self::model_association_filter(ctx, id),
            )
            .await?;
        debug!(rid = %ctx.request_id, obj_asst_id = %id, "model association deleted");
        Ok(())
    }

    /// Remove every model association touching `object_id`, presets included
    pub(crate) async fn delete_model_associations_for(
        &self,
        ctx: &RequestContext,
        object_id: &str,
    ) -> Result<u64> {
        self.db
            .delete(collections::MODEL_ASSOCIATION, &Self::touching_model(ctx, object_id))
            .await
    }

    // =========================================================================
    // Instance associations
    // =========================================================================

    fn edge_filter(ctx: &RequestContext, association: &ModelAssociation) -> ConditionTree {
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.element([FieldOperator::eq("objAsstId", association.id.as_str())]);
        filter
    }

    async fn find_edge(
        &self,
        ctx: &RequestContext,
        association: &ModelAssociation,
        request: &CreateInstanceAssociationRequest,
    ) -> Result<Option<InstanceAssociation>> {
        let mut filter = Self::edge_filter(ctx, association);
        filter.element([
            FieldOperator::eq("instId", request.inst_id),
            FieldOperator::eq("asstInstId", request.asst_inst_id),
        ]);
        self.db
            .find_one(&collections::instance_association(&association.object_id), &filter)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Link two instances
    ///
    /// Fails with `Duplicate` when the edge exists, `NotFound` when the model
    /// association or either instance is missing, `OneToOneViolation` /
    /// `OneToManyViolation` when the mapping is already used up, and
    /// `OperationInProgress` when the endpoint locks stay busy past the timeout.
    pub async fn create_instance_association(
        &self,
        ctx: &RequestContext,
        request: CreateInstanceAssociationRequest,
    ) -> Result<InstanceAssociation> {
        let association = self.require_model_association(ctx, &request.obj_asst_id).await?;
        if self.find_edge(ctx, &association, &request).await?.is_some() {
            return Err(CmdbError::duplicate(format!(
                "association {} -> {} under '{}'",
                request.inst_id, request.asst_inst_id, association.id
            )));
        }
        self.require_instance(ctx, &association.object_id, request.inst_id).await?;
        self.require_instance(ctx, &association.asst_object_id, request.asst_inst_id)
            .await?;

        let keys = lock_keys(&association, &request);
        if keys.is_empty() {
            return self.persist_edge(ctx, &association, &request).await;
        }

        let guard = acquire_all(&self.locks, keys, &self.catalog.config().lock, ctx).await?;
        let result = match self.check_cardinality(ctx, &association, &request).await {
            Ok(()) => self.persist_edge(ctx, &association, &request).await,
            Err(e) => Err(e),
        };
        guard.release().await;
        result
    }

    async fn require_instance(&self, ctx: &RequestContext, object_id: &str, id: u64) -> Result<()> {
        if self.catalog.instance_exists(ctx, object_id, id).await? {
            Ok(())
        } else {
            Err(CmdbError::not_found(format!("instance {} of '{}'", id, object_id)))
        }
    }

    /// Runs with the endpoint locks held
    async fn check_cardinality(
        &self,
        ctx: &RequestContext,
        association: &ModelAssociation,
        request: &CreateInstanceAssociationRequest,
    ) -> Result<()> {
        let collection = collections::instance_association(&association.object_id);

        let mut dst_side = Self::edge_filter(ctx, association);
        dst_side.element([FieldOperator::eq("asstInstId", request.asst_inst_id)]);
        let dst_taken = self.db.count(&collection, &dst_side).await? > 0;

        match association.mapping {
            Mapping::OneToOne => {
                let mut src_side = Self::edge_filter(ctx, association);
                src_side.element([FieldOperator::eq("instId", request.inst_id)]);
                let src_taken = self.db.count(&collection, &src_side).await? > 0;
                if src_taken || dst_taken {
                    warn!(
                        rid = %ctx.request_id,
                        obj_asst_id = %association.id,
                        inst_id = request.inst_id,
                        asst_inst_id = request.asst_inst_id,
                        "one-to-one association already used"
                    );
                    return Err(CmdbError::OneToOneViolation(association.id.clone()));
                }
            }
            Mapping::OneToMany => {
                if dst_taken {
                    warn!(
                        rid = %ctx.request_id,
                        obj_asst_id = %association.id,
                        asst_inst_id = request.asst_inst_id,
                        "one-to-many association already used"
                    );
                    return Err(CmdbError::OneToManyViolation(association.id.clone()));
                }
            }
            Mapping::ManyToMany => {}
        }
        Ok(())
    }

    async fn persist_edge(
        &self,
        ctx: &RequestContext,
        association: &ModelAssociation,
        request: &CreateInstanceAssociationRequest,
    ) -> Result<InstanceAssociation> {
        let edge = InstanceAssociation {
            id: self.db.next_sequence(EDGE_SEQUENCE).await?,
            obj_asst_id: association.id.clone(),
            kind_id: association.kind_id.clone(),
            object_id: association.object_id.clone(),
            inst_id: request.inst_id,
            asst_object_id: association.asst_object_id.clone(),
            asst_inst_id: request.asst_inst_id,
            owner_id: ctx.owner_id.clone(),
            create_time: now(),
        };
        let doc = to_document(&edge)?;
        let primary = collections::instance_association(&edge.object_id);
        self.db.insert(&primary, vec![doc.clone()]).await?;

        if edge.asst_object_id != edge.object_id {
            let mirror = collections::instance_association(&edge.asst_object_id);
            if let Err(e) = self.db.insert(&mirror, vec![doc]).await {
                error!(rid = %ctx.request_id, edge_id = edge.id, error = %e, "mirror write failed");
                let filter = self.edge_id_filter(ctx, &[edge.id]);
                if let Err(undo) = self.db.delete(&primary, &filter).await {
                    error!(
                        rid = %ctx.request_id,
                        edge_id = edge.id,
                        error = %undo,
                        "failed to remove primary copy after mirror failure"
                    );
                }
                return Err(e);
            }
        }

        debug!(rid = %ctx.request_id, edge_id = edge.id, obj_asst_id = %edge.obj_asst_id, "instance association created");
        Ok(edge)
    }

    /// Create several edges; each keeps its input index in the result
    pub async fn create_many_instance_associations(
        &self,
        ctx: &RequestContext,
        requests: Vec<CreateInstanceAssociationRequest>,
    ) -> BatchResult<InstanceAssociation> {
        let mut batch = BatchResult::default();
        for (index, request) in requests.into_iter().enumerate() {
            batch.push(index, self.create_instance_association(ctx, request).await);
        }
        batch
    }

    /// Idempotent create: returns the existing edge when there is one
    pub async fn set_instance_association(
        &self,
        ctx: &RequestContext,
        request: CreateInstanceAssociationRequest,
    ) -> Result<InstanceAssociation> {
        let association = self.require_model_association(ctx, &request.obj_asst_id).await?;
        if let Some(existing) = self.find_edge(ctx, &association, &request).await? {
            return Ok(existing);
        }
        self.create_instance_association(ctx, request).await
    }

    /// Edges stored with `object_id` on either side
    pub async fn search_instance_associations(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult<InstanceAssociation>> {
        let collection = collections::instance_association(object_id);
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.merge(options.condition.clone());

        let count = self.db.count(&collection, &filter).await?;
        let mut find = options.find_options();
        find.fields.clear();
        let items = self
            .db
            .find(&collection, &filter, &find)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult { count, items })
    }

    fn edge_id_filter(&self, ctx: &RequestContext, ids: &[u64]) -> ConditionTree {
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.element([FieldOperator::is_in("id", ids.iter().copied())]);
        filter
    }

    /// Delete the edges of `object_id`'s collection matching `condition`, together with
    /// their mirror copies; returns the number of edges removed
    pub async fn delete_instance_associations(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        condition: ConditionTree,
    ) -> Result<u64> {
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.merge(condition);
        let edges: Vec<InstanceAssociation> = self
            .db
            .find(
                &collections::instance_association(object_id),
                &filter,
                &FindOptions::new(),
            )
            .await?
            .into_iter()
            .map(from_document)
            .collect::<Result<_>>()?;
        if edges.is_empty() {
            return Ok(0);
        }

        let mut by_collection: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for edge in &edges {
            by_collection
                .entry(collections::instance_association(&edge.object_id))
                .or_default()
                .push(edge.id);
            if edge.asst_object_id != edge.object_id {
                by_collection
                    .entry(collections::instance_association(&edge.asst_object_id))
                    .or_default()
                    .push(edge.id);
            }
        }
        for (collection, ids) in by_collection {
            self.db
                .delete(&collection, &self.edge_id_filter(ctx, &ids))
                .await?;
        }

        debug!(rid = %ctx.request_id, object_id = %object_id, count = edges.len(), "instance associations deleted");
        Ok(edges.len() as u64)
    }

    /// Edges touching any of `ids` of `object_id`
    fn touching_instances(object_id: &str, ids: &[u64]) -> ConditionTree {
        let mut src = ConditionTree::new();
        src.element([
            FieldOperator::eq(fields::OBJECT_ID, object_id),
            FieldOperator::is_in("instId", ids.iter().copied()),
        ]);
        let mut dst = ConditionTree::new();
        dst.element([
            FieldOperator::eq("asstObjectId", object_id),
            FieldOperator::is_in("asstInstId", ids.iter().copied()),
        ]);
        let mut filter = ConditionTree::new();
        filter.or([src, dst]);
        filter
    }

    pub async fn has_instance_associations(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        ids: &[u64],
    ) -> Result<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        let mut filter = SchemaCatalog::owner_filter(ctx);
        filter.merge(Self::touching_instances(object_id, ids));
        let count = self
            .db
            .count(&collections::instance_association(object_id), &filter)
            .await?;
        Ok(count > 0)
    }

    /// Delete every edge touching the given instances
    pub async fn delete_instance_associations_for(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        ids: &[u64],
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_instance_associations(ctx, object_id, Self::touching_instances(object_id, ids))
            .await
    }

    /// Delete every edge stored for `object_id`
    pub(crate) async fn delete_all_instance_associations(
        &self,
        ctx: &RequestContext,
        object_id: &str,
    ) -> Result<u64> {
        self.delete_instance_associations(ctx, object_id, ConditionTree::new())
            .await
    }
}

/// Lock keys guarding the constrained endpoints of a new edge
fn lock_keys(association: &ModelAssociation, request: &CreateInstanceAssociationRequest) -> Vec<String> {
    let src = format!("inst_asst:{}:src:{}", association.id, request.inst_id);
    let dst = format!("inst_asst:{}:dst:{}", association.id, request.asst_inst_id);
    match association.mapping {
        Mapping::OneToOne => vec![src, dst],
        Mapping::OneToMany => vec![dst],
        Mapping::ManyToMany => Vec::new(),
    }
}
