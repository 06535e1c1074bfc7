// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache projection: each transition becomes one atomic cache batch.
//!
//! Reads (reverse lookup, forward ownership check) happen before the batch;
//! the synchronizer loop is the only writer, so nothing changes in between.
//! A forward entry is only ever deleted when its `_id` field names the
//! tenant being moved or removed.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheBatch, CacheError, DirectoryCache, KeyLayout};
use crate::classify::{FieldChanges, Transition};
use crate::store::{RecordStore, StoreError};
use crate::tenant::{TenantAttributes, TenantId, TenantSchema, ID_FIELD};

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No reverse entry; the tenant is not in the cache.
    NotCached,
    /// Read repair found no record.
    NotFound,
    /// Read repair found the record soft-deleted.
    StillDeleted,
    NothingToDo,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCached => "not_cached",
            Self::NotFound => "not_found",
            Self::StillDeleted => "still_deleted",
            Self::NothingToDo => "nothing_to_do",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Applied,
    Skipped(SkipReason),
}

pub struct CacheProjector {
    cache: Arc<dyn DirectoryCache>,
    store: Arc<dyn RecordStore>,
    keys: KeyLayout,
    schema: TenantSchema,
}

impl CacheProjector {
    pub fn new(
        cache: Arc<dyn DirectoryCache>,
        store: Arc<dyn RecordStore>,
        keys: KeyLayout,
        schema: TenantSchema,
    ) -> Self {
        Self { cache, store, keys, schema }
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    pub async fn apply(&self, transition: &Transition) -> Result<Projection, ProjectionError> {
        match transition {
            Transition::Create { attributes } => self.create(attributes).await,
            Transition::AttributeUpdate { id, changes } => self.update_attributes(id, changes).await,
            Transition::Rename { id, to, changes } => self.rename(id, to, changes).await,
            Transition::SoftDelete { id } => self.soft_delete(id).await,
            Transition::Restore { id } => self.restore(id).await,
            Transition::Ignored { .. } | Transition::Invalidated => {
                Ok(Projection::Skipped(SkipReason::NothingToDo))
            }
        }
    }

    /// Upsert forward + reverse entries. A previous forward entry under a
    /// different key is removed; the target entry is replaced, not merged.
    pub async fn create(&self, attributes: &TenantAttributes) -> Result<Projection, ProjectionError> {
        let reverse = self.keys.reverse(&attributes.id);
        let forward = self.keys.forward(&attributes.routing_key);

        let mut batch = CacheBatch::new();
        if let Some(previous) = self.cache.get_value(&reverse).await? {
            if previous != attributes.routing_key {
                let old_forward = self.keys.forward(&previous);
                if self.owns(&old_forward, &attributes.id).await? {
                    batch.delete(old_forward);
                }
            }
        }
        batch
            .delete(forward.as_str())
            .set_fields(forward.as_str(), attributes.to_fields(&self.schema))
            .set_value(reverse, attributes.routing_key.as_str());
        self.cache.execute(&batch).await?;

        debug!(tenant_id = %attributes.id, routing_key = %attributes.routing_key, "Tenant cached");
        Ok(Projection::Applied)
    }

    /// Merge changed attributes into the existing forward entry.
    pub async fn update_attributes(
        &self,
        id: &TenantId,
        changes: &FieldChanges,
    ) -> Result<Projection, ProjectionError> {
        let Some(routing_key) = self.cache.get_value(&self.keys.reverse(id)).await? else {
            return Ok(Projection::Skipped(SkipReason::NotCached));
        };
        let forward = self.keys.forward(&routing_key);
        if !self.owns(&forward, id).await? {
            return Ok(Projection::Skipped(SkipReason::NotCached));
        }
        if changes.is_empty() {
            return Ok(Projection::Skipped(SkipReason::NothingToDo));
        }

        let mut batch = CacheBatch::new();
        if !changes.set.is_empty() {
            batch.set_fields(forward.as_str(), changes.set_pairs());
        }
        if !changes.removed.is_empty() {
            batch.remove_fields(forward.as_str(), changes.removed.clone());
        }
        self.cache.execute(&batch).await?;

        debug!(tenant_id = %id, routing_key = %routing_key, "Tenant attributes updated");
        Ok(Projection::Applied)
    }

    /// Move the forward entry to a new routing key in one batch.
    ///
    /// Falls back to read repair when the tenant is not (fully) cached, since
    /// the diff alone does not carry every attribute.
    pub async fn rename(
        &self,
        id: &TenantId,
        to: &str,
        changes: &FieldChanges,
    ) -> Result<Projection, ProjectionError> {
        let reverse = self.keys.reverse(id);
        let Some(from) = self.cache.get_value(&reverse).await? else {
            debug!(tenant_id = %id, "Rename of uncached tenant, repairing from store");
            return self.read_repair(id).await;
        };
        let old_forward = self.keys.forward(&from);
        let current = self.cache.get_fields(&old_forward).await?;
        let mut attributes = match TenantAttributes::from_fields(&current, &self.schema) {
            Ok(attributes) if attributes.id == *id => attributes,
            _ => {
                debug!(tenant_id = %id, routing_key = %from, "Forward entry unusable, repairing from store");
                return self.read_repair(id).await;
            }
        };
        attributes.apply_changes(&changes.set, &changes.removed);
        attributes.routing_key = to.to_string();

        let new_forward = self.keys.forward(to);
        let mut batch = CacheBatch::new();
        batch
            .delete(old_forward)
            .delete(new_forward.as_str())
            .set_fields(new_forward.as_str(), attributes.to_fields(&self.schema))
            .set_value(reverse, to);
        self.cache.execute(&batch).await?;

        debug!(tenant_id = %id, from = %from, to = %to, "Tenant renamed");
        Ok(Projection::Applied)
    }

    /// Drop both entries. Absent reverse entry is a successful no-op.
    pub async fn soft_delete(&self, id: &TenantId) -> Result<Projection, ProjectionError> {
        let reverse = self.keys.reverse(id);
        let Some(routing_key) = self.cache.get_value(&reverse).await? else {
            return Ok(Projection::Skipped(SkipReason::NotCached));
        };
        let forward = self.keys.forward(&routing_key);

        let mut batch = CacheBatch::new();
        batch.delete(reverse);
        if self.owns(&forward, id).await? {
            batch.delete(forward);
        }
        self.cache.execute(&batch).await?;

        debug!(tenant_id = %id, routing_key = %routing_key, "Tenant evicted");
        Ok(Projection::Applied)
    }

    /// Re-fetch from the store and cache the fresh attributes.
    pub async fn restore(&self, id: &TenantId) -> Result<Projection, ProjectionError> {
        self.read_repair(id).await
    }

    async fn read_repair(&self, id: &TenantId) -> Result<Projection, ProjectionError> {
        match self.store.find_by_id(id).await? {
            None => Ok(Projection::Skipped(SkipReason::NotFound)),
            // A later soft-delete event is on its way
            Some(record) if record.is_deleted() => Ok(Projection::Skipped(SkipReason::StillDeleted)),
            Some(record) => self.create(&record.attributes()).await,
        }
    }

    async fn owns(&self, forward: &str, id: &TenantId) -> Result<bool, CacheError> {
        let fields = self.cache.get_fields(forward).await?;
        Ok(fields.get(ID_FIELD).map(String::as_str) == Some(id.as_str()))
    }
}
