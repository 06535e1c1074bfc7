// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routing-layer lookup. Reads forward entries only and never falls back to
//! the record store: a miss is a miss.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::cache::{CacheError, DirectoryCache, KeyLayout};
use crate::metrics;
use crate::tenant::{routing_key_violation, MissingField, TenantAttributes, TenantSchema};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No tenant routed by '{0}'")]
    NotFound(String),
    #[error("Cache entry '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: MissingField,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone)]
pub struct TenantResolver {
    cache: Arc<dyn DirectoryCache>,
    keys: KeyLayout,
    schema: TenantSchema,
}

impl TenantResolver {
    pub fn new(cache: Arc<dyn DirectoryCache>, keys: KeyLayout, schema: TenantSchema) -> Self {
        Self { cache, keys, schema }
    }

    pub async fn resolve(&self, routing_key: &str) -> Result<TenantAttributes, ResolveError> {
        let routing_key = routing_key.trim();
        // Reserved keys name the reverse index, never a tenant
        if routing_key_violation(routing_key).is_some() {
            metrics::record_resolve("miss");
            return Err(ResolveError::NotFound(routing_key.to_string()));
        }

        let key = self.keys.forward(routing_key);
        let fields = self.cache.get_fields(&key).await?;
        if fields.is_empty() {
            metrics::record_resolve("miss");
            return Err(ResolveError::NotFound(routing_key.to_string()));
        }

        match TenantAttributes::from_fields(&fields, &self.schema) {
            Ok(attributes) => {
                metrics::record_resolve("hit");
                Ok(attributes)
            }
            Err(source) => {
                warn!(key = %key, error = %source, "Corrupt directory entry");
                metrics::record_resolve("corrupt");
                Err(ResolveError::Corrupt { key, source })
            }
        }
    }
}
