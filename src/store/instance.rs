//! Instance operations

use serde_json::Value;
use tracing::{debug, warn};

use super::CmdbStore;
use crate::catalog::InstanceLocation;
use crate::condition::ConditionTree;
use crate::context::RequestContext;
use crate::error::{CmdbError, Result};
use crate::instance::{BatchResult, Instance, QueryOptions, QueryResult};
use crate::schema::now;
use crate::storage::{Document, FindOptions};
use crate::types::fields;
use crate::validator::Validator;

/// Where a model's instances live and how their payloads are checked
struct Target {
    location: InstanceLocation,
    validator: Validator,
}

impl Target {
    fn instance(&self, data: Document) -> Result<Instance> {
        Ok(Instance {
            id: self.location.id_of(&data)?,
            object_id: self.location.object_id.clone(),
            data,
        })
    }
}

impl CmdbStore {
    async fn target(&self, ctx: &RequestContext, object_id: &str) -> Result<Target> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        let attributes = self.catalog().attributes(ctx, object_id).await?;
        Ok(Target {
            location: self.catalog().location(&model),
            validator: Validator::new(attributes, self.config().char_limits),
        })
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Validate, check uniqueness, assign an id and insert
    pub async fn create_instance(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        data: Document,
    ) -> Result<Instance> {
        let target = self.target(ctx, object_id).await?;
        self.create_in(ctx, &target, &data).await
    }

    /// Create several instances; each result keeps its input index
    pub async fn create_many_instances(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        items: Vec<Document>,
    ) -> Result<BatchResult<Instance>> {
        let target = self.target(ctx, object_id).await?;
        let mut batch = BatchResult::default();
        for (index, data) in items.iter().enumerate() {
            batch.push(index, self.create_in(ctx, &target, data).await);
        }
        debug!(
            rid = %ctx.request_id,
            object_id = %object_id,
            created = batch.created.len(),
            repeated = batch.repeated.len(),
            exceptions = batch.exceptions.len(),
            "batch create finished"
        );
        Ok(batch)
    }

    async fn create_in(&self, ctx: &RequestContext, target: &Target, data: &Document) -> Result<Instance> {
        let location = &target.location;
        let mut doc = target.validator.validate_create(data)?;
        if let Some(status) = data.get(fields::DATA_STATUS).filter(|v| v.is_string()) {
            doc.insert(fields::DATA_STATUS.to_string(), status.clone());
        }
        self.unique()
            .check_create(ctx, location, target.validator.catalog(), &doc)
            .await?;

        let id = self.db().next_sequence(&location.collection).await?;
        let now = now();
        doc.insert(location.id_field.clone(), Value::from(id));
        doc.insert(fields::OWNER_ID.to_string(), Value::from(ctx.owner_id.as_str()));
        doc.insert(fields::CREATE_TIME.to_string(), Value::from(now.as_str()));
        doc.insert(fields::LAST_TIME.to_string(), Value::from(now));
        if let Some(biz) = ctx.biz_id {
            doc.insert(fields::BIZ_ID.to_string(), Value::from(biz));
        }

        self.db().insert(&location.collection, vec![doc.clone()]).await?;
        debug!(rid = %ctx.request_id, object_id = %location.object_id, id, "instance created");
        Ok(Instance {
            id,
            object_id: location.object_id.clone(),
            data: doc,
        })
    }

    // =========================================================================
    // Read
    // =========================================================================

    pub async fn get_instance(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        id: u64,
    ) -> Result<Option<Instance>> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        let location = self.catalog().location(&model);
        let Some(doc) = self
            .db()
            .find_one(&location.collection, &location.id_filter(ctx, id))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(Instance {
            id,
            object_id: location.object_id,
            data: doc,
        }))
    }

    /// Filtered, sorted, paged search; `count` is the total before paging
    pub async fn find_instances(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult<Instance>> {
        let target = self.target(ctx, object_id).await?;
        let location = &target.location;
        let mut filter = location.base_filter(ctx);
        filter.merge(options.condition.clone());

        let count = self.db().count(&location.collection, &filter).await?;
        let mut find = options.find_options();
        if !find.fields.is_empty() && !find.fields.contains(&location.id_field) {
            find.fields.push(location.id_field.clone());
        }
        let items = self
            .db()
            .find(&location.collection, &filter, &find)
            .await?
            .into_iter()
            .map(|doc| target.instance(doc))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult { count, items })
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Update one instance; fails with `NotFound` when it does not exist
    pub async fn update_instance(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        id: u64,
        data: Document,
    ) -> Result<Instance> {
        let target = self.target(ctx, object_id).await?;
        let filter = target.location.id_filter(ctx, id);
        self.update_where(ctx, &target, &filter, &data)
            .await?
            .pop()
            .ok_or_else(|| CmdbError::not_found(format!("instance {} of '{}'", id, object_id)))
    }

    /// Update every instance matching `condition`; returns the number updated
    pub async fn update_instances(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        condition: ConditionTree,
        data: Document,
    ) -> Result<u64> {
        let target = self.target(ctx, object_id).await?;
        let mut filter = target.location.base_filter(ctx);
        filter.merge(condition);
        let updated = self.update_where(ctx, &target, &filter, &data).await?;
        Ok(updated.len() as u64)
    }

    /// Every matched record is validated and uniqueness-checked before any is written
    async fn update_where(
        &self,
        ctx: &RequestContext,
        target: &Target,
        filter: &ConditionTree,
        data: &Document,
    ) -> Result<Vec<Instance>> {
        let location = &target.location;
        let existing = self
            .db()
            .find(&location.collection, filter, &FindOptions::new())
            .await?;

        let mut planned = Vec::with_capacity(existing.len());
        for doc in existing {
            let id = location.id_of(&doc)?;
            let set = target
                .validator
                .validate_update(data, &doc, ctx.can_edit_all)?;
            let mut merged = doc;
            merged.extend(set.clone());
            self.unique()
                .check_update(ctx, location, target.validator.catalog(), &merged, id)
                .await?;
            planned.push((id, set, merged));
        }

        let now = now();
        let mut updated = Vec::with_capacity(planned.len());
        for (id, mut set, mut merged) in planned {
            set.insert(fields::LAST_TIME.to_string(), Value::from(now.as_str()));
            merged.insert(fields::LAST_TIME.to_string(), Value::from(now.as_str()));
            self.db()
                .update(&location.collection, &location.id_filter(ctx, id), &set)
                .await?;
            updated.push(Instance {
                id,
                object_id: location.object_id.clone(),
                data: merged,
            });
        }
        debug!(
            rid = %ctx.request_id,
            object_id = %location.object_id,
            count = updated.len(),
            "instances updated"
        );
        Ok(updated)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    async fn matching_ids(
        &self,
        ctx: &RequestContext,
        location: &InstanceLocation,
        condition: ConditionTree,
    ) -> Result<Vec<u64>> {
        let mut filter = location.base_filter(ctx);
        filter.merge(condition);
        let options = FindOptions::new().fields(vec![location.id_field.clone()]);
        self.db()
            .find(&location.collection, &filter, &options)
            .await?
            .iter()
            .map(|doc| location.id_of(doc))
            .collect()
    }

    /// Delete matching instances; refused while any of them has associations
    pub async fn delete_instances(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        condition: ConditionTree,
    ) -> Result<u64> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        let location = self.catalog().location(&model);
        let ids = self.matching_ids(ctx, &location, condition).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        if self
            .associations()
            .has_instance_associations(ctx, object_id, &ids)
            .await?
        {
            warn!(rid = %ctx.request_id, object_id = %object_id, "instances still have associations");
            return Err(CmdbError::HasAssociations(format!("instances of '{}'", object_id)));
        }

        let deleted = self
            .db()
            .delete(&location.collection, &location.ids_filter(ctx, &ids))
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, deleted, "instances deleted");
        Ok(deleted)
    }

    /// Delete matching instances together with every edge touching them
    pub async fn cascade_delete_instances(
        &self,
        ctx: &RequestContext,
        object_id: &str,
        condition: ConditionTree,
    ) -> Result<u64> {
        let model = self.catalog().require_model(ctx, object_id).await?;
        let location = self.catalog().location(&model);
        let ids = self.matching_ids(ctx, &location, condition).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let edges = self
            .associations()
            .delete_instance_associations_for(ctx, object_id, &ids)
            .await?;
        let deleted = self
            .db()
            .delete(&location.collection, &location.ids_filter(ctx, &ids))
            .await?;
        debug!(rid = %ctx.request_id, object_id = %object_id, deleted, edges, "instances cascade-deleted");
        Ok(deleted)
    }
}
