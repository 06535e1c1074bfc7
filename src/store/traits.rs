// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::event::{RawEvent, DecodeError, OP_DELETE, OP_INSERT, OP_REPLACE, OP_UPDATE};
use crate::tenant::{TenantId, TenantRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
    #[error("Record store backend error: {0}")]
    Backend(String),
    #[error("Stored document for tenant '{id}' is unreadable: {source}")]
    Corrupt {
        id: TenantId,
        #[source]
        source: DecodeError,
    },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Change feed could not be opened: {0}")]
    Open(String),
    #[error("Change feed invalidated upstream: {0}")]
    Invalidated(String),
    #[error("Change feed backend error: {0}")]
    Backend(String),
    #[error("Change feed could not be closed: {0}")]
    Close(String),
}

/// Server-side filter applied when a feed is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub database: String,
    pub collection: String,
    pub operations: Vec<String>,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self::new("system", "brands")
    }
}

impl FeedFilter {
    /// Filter on one collection and the four mutation kinds.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            operations: [OP_INSERT, OP_UPDATE, OP_REPLACE, OP_DELETE]
                .iter()
                .map(|op| op.to_string())
                .collect(),
        }
    }

    pub fn matches(&self, database: &str, collection: &str, operation: &str) -> bool {
        self.database == database
            && self.collection == collection
            && self.operations.iter().any(|op| op == operation)
    }
}

/// Canonical tenant registry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Point lookup. Soft-deleted records are returned (with `deleted_at` set).
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, StoreError>;

    /// Open a change feed over the registry, filtered server-side.
    async fn watch(&self, filter: &FeedFilter) -> Result<Box<dyn ChangeFeed>, FeedError>;
}

/// An open change-feed cursor.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait for the next event. `Ok(None)` means the feed ended upstream.
    ///
    /// Must be cancel-safe: dropping the future loses no event.
    async fn next_event(&mut self) -> Result<Option<RawEvent>, FeedError>;

    /// Release the cursor. Idempotent.
    async fn close(&mut self) -> Result<(), FeedError>;
}
