// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronizer coordinator.
//!
//! The [`DirectorySynchronizer`] wires the change feed subscriber, classifier
//! and projector together and owns the background processing task:
//!
//! ```text
//! store change feed ──pull──▶ classify ──▶ project ──▶ directory cache
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//! ```
//!
//! A fatal feed failure (cursor lost or invalidated) ends the loop, which
//! closes its cursor and settles in `Stopped` on its own. Restarting is up to
//! the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenant_directory::{
//!     DirectoryConfig, DirectorySynchronizer, InMemoryCache, InMemoryRecordStore, SyncState,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DirectoryConfig::default();
//! let store = Arc::new(InMemoryRecordStore::new(config.schema()));
//! let cache = Arc::new(InMemoryCache::new());
//!
//! let mut sync = DirectorySynchronizer::new(&config, store, cache);
//! sync.start().await?;
//! assert_eq!(sync.state(), SyncState::Running);
//! sync.stop().await?;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod processor;
mod types;

pub use processor::{EventError, EventOutcome, EventProcessor};
pub use types::{StatsSnapshot, SyncState, SyncStats};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, DirectoryCache, KeyLayout, RedisDirectoryCache};
use crate::classify::Classifier;
use crate::config::DirectoryConfig;
use crate::feed::{ChangeFeedSubscriber, SubscriptionError, TeardownError};
use crate::projector::CacheProjector;
use crate::resolver::TenantResolver;
use crate::store::{FeedFilter, RecordStore, StoreError};
use crate::tenant::TenantSchema;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Teardown(#[from] TeardownError),
    #[error("Processing task failed: {0}")]
    Task(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Keeps the directory cache in step with the record store.
///
/// Store and cache handles are injected, so several synchronizers can run
/// side by side. Lifecycle calls take `&mut self`; callers serialize them.
pub struct DirectorySynchronizer {
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) cache: Arc<dyn DirectoryCache>,
    pub(super) keys: KeyLayout,
    pub(super) schema: TenantSchema,
    pub(super) filter: FeedFilter,
    pub(super) processor: Arc<EventProcessor>,

    /// Shared with the processing task, which publishes `Stopped` itself on
    /// a fatal feed error.
    pub(super) state: Arc<watch::Sender<SyncState>>,
    pub(super) state_rx: watch::Receiver<SyncState>,

    pub(super) stats: Arc<SyncStats>,

    pub(super) cancel: Option<CancellationToken>,
    /// The task hands its subscriber back when it exits.
    pub(super) task: Option<JoinHandle<ChangeFeedSubscriber>>,
}

impl DirectorySynchronizer {
    pub fn new(
        config: &DirectoryConfig,
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn DirectoryCache>,
    ) -> Self {
        let keys = config.key_layout();
        let schema = config.schema();
        let projector = CacheProjector::new(cache.clone(), store.clone(), keys.clone(), schema.clone());
        let processor = EventProcessor::new(Classifier::new(schema.clone()), projector);
        let (state, state_rx) = watch::channel(SyncState::Stopped);

        Self {
            store,
            cache,
            keys,
            schema,
            filter: config.feed_filter(),
            processor: Arc::new(processor),
            state: Arc::new(state),
            state_rx,
            stats: Arc::new(SyncStats::default()),
            cancel: None,
            task: None,
        }
    }

    /// Build with a Redis cache from `redis_url`.
    pub async fn with_redis(
        config: &DirectoryConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, SyncError> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("redis_url is not set".into()))?;
        let cache = RedisDirectoryCache::connect(url).await?;
        Ok(Self::new(config, store, Arc::new(cache)))
    }

    /// Build with MongoDB and Redis backends from the configured URLs.
    #[cfg(feature = "mongodb")]
    pub async fn connect(config: &DirectoryConfig) -> Result<Self, SyncError> {
        let url = config
            .mongo_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("mongo_url is not set".into()))?;
        let store = crate::store::MongoRecordStore::connect(
            url,
            &config.database,
            &config.collection,
            config.schema(),
        )
        .await?;
        Self::with_redis(config, Arc::new(store)).await
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SyncState::Running
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    /// Read-side handle over the same cache and key layout.
    pub fn resolver(&self) -> TenantResolver {
        TenantResolver::new(self.cache.clone(), self.keys.clone(), self.schema.clone())
    }
}

impl Drop for DirectorySynchronizer {
    fn drop(&mut self) {
        // Don't leave a detached loop consuming the feed
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}
