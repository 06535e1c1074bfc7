// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache transaction aborted: {0}")]
    TransactionAborted(String),
}

/// Hash entry contents.
pub type FieldMap = BTreeMap<String, String>;

/// One write inside a [`CacheBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// HSET: merge fields into a hash, creating it if absent.
    SetFields { key: String, fields: Vec<(String, String)> },
    /// HDEL: drop fields; the hash disappears once empty.
    RemoveFields { key: String, fields: Vec<String> },
    /// SET a plain string value.
    SetValue { key: String, value: String },
    /// DEL, regardless of type. Missing keys are fine.
    Delete { key: String },
}

/// Ordered writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheBatch {
    ops: Vec<CacheOp>,
}

impl CacheBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fields(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.ops.push(CacheOp::SetFields { key: key.into(), fields });
        self
    }

    pub fn remove_fields(&mut self, key: impl Into<String>, fields: Vec<String>) -> &mut Self {
        self.ops.push(CacheOp::RemoveFields { key: key.into(), fields });
        self
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::SetValue { key: key.into(), value: value.into() });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Key-value cache holding the tenant directory.
#[async_trait]
pub trait DirectoryCache: Send + Sync {
    /// HGETALL. An absent key yields an empty map.
    async fn get_fields(&self, key: &str) -> Result<FieldMap, CacheError>;

    /// GET.
    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Apply a batch atomically: either every op lands or none does.
    async fn execute(&self, batch: &CacheBatch) -> Result<(), CacheError>;

    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), CacheError> {
        let mut batch = CacheBatch::new();
        batch.set_fields(key, fields);
        self.execute(&batch).await
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut batch = CacheBatch::new();
        batch.set_value(key, value);
        self.execute(&batch).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut batch = CacheBatch::new();
        batch.delete(key);
        self.execute(&batch).await
    }
}
