// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory cache: forward and reverse entries in a key-value store.
//!
//! - [`memory`]: in-process implementation with the same hash/string semantics
//! - [`redis`]: Redis via `ConnectionManager`, batches sent as `MULTI`/`EXEC`

pub mod keys;
pub mod memory;
pub mod redis;
pub mod traits;

pub use keys::KeyLayout;
pub use memory::{CacheValue, InMemoryCache};
pub use self::redis::RedisDirectoryCache;
pub use traits::{CacheBatch, CacheError, CacheOp, DirectoryCache, FieldMap};
