// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis directory cache.
//!
//! Forward entries are plain hashes (`HSET`/`HGETALL`), reverse entries plain
//! strings. Every [`CacheBatch`] is sent as one `MULTI`/`EXEC` pipeline so
//! readers never observe a half-applied transition.
//!
//! Reads are retried with the query preset; writes are sent once and a
//! failure is reported to the caller.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{pipe, AsyncCommands, Client};
use tracing::info;

use super::traits::{CacheBatch, CacheError, CacheOp, DirectoryCache, FieldMap};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisDirectoryCache {
    connection: ConnectionManager,
}

impl RedisDirectoryCache {
    pub async fn connect(connection_string: &str) -> Result<Self, CacheError> {
        let client = Client::open(connection_string)
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        // Startup preset: fail fast on a bad URL instead of hanging
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Backend(e.to_string()))?;

        info!("Connected to directory cache");
        Ok(Self { connection })
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl DirectoryCache for RedisDirectoryCache {
    async fn get_fields(&self, key: &str) -> Result<FieldMap, CacheError> {
        retry("redis_hgetall", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            async move { conn.hgetall::<_, FieldMap>(key).await }
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Backend(e.to_string()))
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        retry("redis_get", &RetryConfig::query(), || {
            let mut conn = self.connection.clone();
            async move { conn.get::<_, Option<String>>(key).await }
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Backend(e.to_string()))
    }

    async fn execute(&self, batch: &CacheBatch) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipeline = pipe();
        pipeline.atomic();
        for op in batch.ops() {
            match op {
                // Redis rejects HSET/HDEL without fields
                CacheOp::SetFields { fields, .. } if fields.is_empty() => {}
                CacheOp::SetFields { key, fields } => {
                    pipeline.hset_multiple(key, fields).ignore();
                }
                CacheOp::RemoveFields { fields, .. } if fields.is_empty() => {}
                CacheOp::RemoveFields { key, fields } => {
                    pipeline.hdel(key, fields).ignore();
                }
                CacheOp::SetValue { key, value } => {
                    pipeline.set(key, value).ignore();
                }
                CacheOp::Delete { key } => {
                    pipeline.del(key).ignore();
                }
            }
        }

        let mut conn = self.connection.clone();
        pipeline.query_async::<()>(&mut conn).await.map_err(|e| {
            if e.kind() == redis::ErrorKind::ExecAbortError {
                CacheError::TransactionAborted(e.to_string())
            } else {
                CacheError::Backend(e.to_string())
            }
        })
    }
}
