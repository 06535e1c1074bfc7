// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical tenant record store: point reads and change feeds.
//!
//! - [`memory`]: in-process store with a live change feed (tests, demos)
//! - `mongo`: MongoDB change streams (`mongodb` feature)

pub mod traits;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use traits::{ChangeFeed, FeedError, FeedFilter, RecordStore, StoreError};
pub use memory::InMemoryRecordStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoRecordStore;
