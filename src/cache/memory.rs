// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{CacheBatch, CacheError, CacheOp, DirectoryCache, FieldMap};

/// Value held under one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Fields(FieldMap),
    Value(String),
}

/// In-process cache with Redis hash/string semantics.
///
/// Batches are staged on a copy and swapped in, so a failing op leaves the
/// cache untouched, like an aborted MULTI/EXEC.
pub struct InMemoryCache {
    data: Mutex<HashMap<String, CacheValue>>,
    failing_executes: AtomicUsize,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            failing_executes: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` batch executions fail without applying anything.
    pub fn fail_next_executes(&self, n: usize) {
        self.failing_executes.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, CacheValue> {
        self.data
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.failing_executes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::TransactionAborted(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

fn apply(data: &mut HashMap<String, CacheValue>, op: &CacheOp) -> Result<(), CacheError> {
    match op {
        CacheOp::SetFields { key, fields } => {
            let entry = data
                .entry(key.clone())
                .or_insert_with(|| CacheValue::Fields(FieldMap::new()));
            let CacheValue::Fields(map) = entry else {
                return Err(wrong_type(key));
            };
            for (field, value) in fields {
                map.insert(field.clone(), value.clone());
            }
        }
        CacheOp::RemoveFields { key, fields } => match data.get_mut(key) {
            None => {}
            Some(CacheValue::Value(_)) => return Err(wrong_type(key)),
            Some(CacheValue::Fields(map)) => {
                for field in fields {
                    map.remove(field);
                }
                if map.is_empty() {
                    data.remove(key);
                }
            }
        },
        CacheOp::SetValue { key, value } => {
            data.insert(key.clone(), CacheValue::Value(value.clone()));
        }
        CacheOp::Delete { key } => {
            data.remove(key);
        }
    }
    Ok(())
}

#[async_trait]
impl DirectoryCache for InMemoryCache {
    async fn get_fields(&self, key: &str) -> Result<FieldMap, CacheError> {
        match self.data.lock().get(key) {
            None => Ok(FieldMap::new()),
            Some(CacheValue::Fields(map)) => Ok(map.clone()),
            Some(CacheValue::Value(_)) => Err(CacheError::Backend(format!(
                "WRONGTYPE {} holds a string, not a hash",
                key
            ))),
        }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.data.lock().get(key) {
            None => Ok(None),
            Some(CacheValue::Value(value)) => Ok(Some(value.clone())),
            Some(CacheValue::Fields(_)) => Err(CacheError::Backend(format!(
                "WRONGTYPE {} holds a hash, not a string",
                key
            ))),
        }
    }

    async fn execute(&self, batch: &CacheBatch) -> Result<(), CacheError> {
        if self.take_failure() {
            return Err(CacheError::Backend("injected cache failure".into()));
        }
        let mut data = self.data.lock();
        let mut staged = data.clone();
        for op in batch.ops() {
            apply(&mut staged, op)?;
        }
        *data = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_hash_and_string_ops() {
        let cache = InMemoryCache::new();
        cache.set_fields("brands:a", fields(&[("name", "A")])).await.unwrap();
        cache.set_fields("brands:a", fields(&[("slug", "a")])).await.unwrap();
        cache.set_value("brands:$id:1", "a").await.unwrap();

        let map = cache.get_fields("brands:a").await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(cache.get_value("brands:$id:1").await.unwrap().as_deref(), Some("a"));
        assert!(cache.get_fields("brands:missing").await.unwrap().is_empty());
        assert!(cache.get_value("brands:$id:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_last_field_drops_key() {
        let cache = InMemoryCache::new();
        cache.set_fields("k", fields(&[("name", "A")])).await.unwrap();

        let mut batch = CacheBatch::new();
        batch.remove_fields("k", vec!["name".into()]).remove_fields("absent", vec!["x".into()]);
        cache.execute(&batch).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_op_rolls_back_batch() {
        let cache = InMemoryCache::new();
        cache.set_value("str", "v").await.unwrap();

        let mut batch = CacheBatch::new();
        batch
            .set_fields("brands:a", fields(&[("name", "A")]))
            .set_fields("str", fields(&[("x", "y")]));
        let err = cache.execute(&batch).await.unwrap_err();
        assert!(matches!(err, CacheError::TransactionAborted(_)));
        assert_eq!(cache.len(), 1);
        assert!(cache.get_fields("str").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let cache = InMemoryCache::new();
        cache.fail_next_executes(2);
        assert!(cache.set_value("k", "1").await.is_err());
        assert!(cache.set_value("k", "1").await.is_err());
        assert!(cache.set_value("k", "1").await.is_ok());
        assert_eq!(
            cache.snapshot().get("k"),
            Some(&CacheValue::Value("1".to_string()))
        );
    }
}
