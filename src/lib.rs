// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Tenant Directory
//!
//! Keeps a key-value directory of tenants in step with the canonical tenant
//! registry, so the request routing layer can resolve a routing key (slug or
//! domain) to tenant attributes with one cache read.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tenant Record Store                        │
//! │  • Canonical documents, soft-deleted via `deletedAt`        │
//! │  • Ordered change feed (insert/update/replace/delete)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (ChangeFeedSubscriber::pull)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Classifier → Projector                      │
//! │  • Create / AttributeUpdate / Rename / SoftDelete / Restore │
//! │  • One atomic cache batch per transition                    │
//! │  • Restore re-reads the record (read repair)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Directory Cache                           │
//! │  • {prefix}{routingKey} → hash of attributes (forward)      │
//! │  • {prefix}$id:{id}     → routing key        (reverse)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (TenantResolver::resolve)
//!                              ▼
//!                        routing layer
//! ```
//!
//! Every active tenant is resolvable by its current routing key, and no
//! soft-deleted tenant is. The cache holds nothing that cannot be rebuilt from
//! the store.
//!
//! ## Modules
//!
//! - [`coordinator`]: [`DirectorySynchronizer`] lifecycle and processing loop
//! - [`feed`]: change event wire shape and the cancellable subscriber
//! - [`classify`]: event → transition
//! - [`projector`]: transition → atomic cache batch
//! - [`resolver`]: routing-layer lookups
//! - [`store`]: record store backends (memory, MongoDB behind `mongodb`)
//! - [`cache`]: directory cache backends (memory, Redis)
//! - [`resilience`]: retry with backoff for backend connections

pub mod cache;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod feed;
pub mod metrics;
pub mod projector;
pub mod resilience;
pub mod resolver;
pub mod store;
pub mod tenant;

pub use cache::{CacheBatch, CacheError, DirectoryCache, InMemoryCache, KeyLayout, RedisDirectoryCache};
pub use classify::{Classifier, FieldChanges, Transition, TransitionKind};
pub use config::DirectoryConfig;
pub use coordinator::{
    DirectorySynchronizer, EventError, EventOutcome, EventProcessor, StatsSnapshot, SyncError, SyncState,
};
pub use feed::{ChangeFeedSubscriber, DecodeError, Pulled, RawEvent, SubscriptionError, TeardownError};
pub use metrics::ProjectionTimer;
pub use projector::{CacheProjector, Projection, ProjectionError, SkipReason};
pub use resilience::retry::RetryConfig;
pub use resolver::{ResolveError, TenantResolver};
pub use store::{ChangeFeed, FeedError, FeedFilter, InMemoryRecordStore, RecordStore, StoreError};
#[cfg(feature = "mongodb")]
pub use store::MongoRecordStore;
pub use tenant::{TenantAttributes, TenantId, TenantRecord, TenantSchema};
