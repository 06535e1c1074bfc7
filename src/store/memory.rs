// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process record store with a live change feed.
//!
//! Documents are kept as JSON maps and every mutation publishes a change event
//! shaped exactly like a document-store change stream entry, so the whole
//! synchronizer pipeline can run without external services. Fault knobs
//! ([`InMemoryRecordStore::set_available`], [`InMemoryRecordStore::invalidate_feeds`],
//! [`InMemoryRecordStore::fail_close`]) drive the failure paths in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::traits::{ChangeFeed, FeedError, FeedFilter, RecordStore, StoreError};
use crate::feed::event::{routing_of, RawEvent, OP_DELETE, OP_INSERT, OP_REPLACE, OP_UPDATE};
use crate::tenant::{
    TenantId, TenantRecord, TenantSchema, DELETED_AT_FIELD, ID_FIELD, NAME_FIELD, UPDATED_AT_FIELD,
};

enum FeedMessage {
    Event(RawEvent),
    Invalidate(String),
}

struct Watcher {
    filter: FeedFilter,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

pub struct InMemoryRecordStore {
    schema: TenantSchema,
    database: String,
    collection: String,
    documents: DashMap<TenantId, Map<String, Value>>,
    /// Held across mutate + publish so feed order matches write order.
    watchers: Mutex<Vec<Watcher>>,
    available: AtomicBool,
    fail_close: Arc<AtomicBool>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new(schema: TenantSchema) -> Self {
        Self::with_namespace(schema, "system", "brands")
    }

    #[must_use]
    pub fn with_namespace(
        schema: TenantSchema,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            database: database.into(),
            collection: collection.into(),
            documents: DashMap::new(),
            watchers: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            fail_close: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn schema(&self) -> &TenantSchema {
        &self.schema
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// All decodable records, soft-deleted ones included.
    pub fn records(&self) -> Vec<TenantRecord> {
        self.documents
            .iter()
            .filter_map(|entry| {
                self.schema
                    .record_from_document(entry.value(), Some(entry.key()))
                    .ok()
            })
            .collect()
    }

    pub fn document(&self, id: &TenantId) -> Option<Map<String, Value>> {
        self.documents.get(id).map(|d| d.value().clone())
    }

    /// Number of feeds still attached.
    pub fn watcher_count(&self) -> usize {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        watchers.len()
    }

    /// Simulate the store going away: feeds cannot be opened and reads fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make every feed's `close()` fail.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, record: &TenantRecord) -> bool {
        self.insert_document(record.to_document(&self.schema))
    }

    /// Insert a raw document. Returns false if `_id` is missing or taken.
    pub fn insert_document(&self, document: Map<String, Value>) -> bool {
        let Some(id) = document.get(ID_FIELD).and_then(TenantId::from_value) else {
            return false;
        };

        let mut watchers = self.watchers.lock();
        if self.documents.contains_key(&id) {
            return false;
        }
        self.documents.insert(id.clone(), document.clone());

        let mut event = self.event(OP_INSERT, &id);
        event["fullDocument"] = Value::Object(document);
        Self::publish(&mut watchers, event);
        true
    }

    /// `$set` / `$unset` style update. Only effective changes are reported in
    /// the event; an update that changes nothing publishes nothing.
    pub fn update(&self, id: &TenantId, set: Map<String, Value>, unset: &[&str]) -> bool {
        let mut watchers = self.watchers.lock();
        let Some(mut document) = self.documents.get_mut(id) else {
            return false;
        };

        let mut updated = Map::new();
        for (field, value) in set {
            if document.get(&field) != Some(&value) {
                document.insert(field.clone(), value.clone());
                updated.insert(field, value);
            }
        }
        let mut removed = Vec::new();
        for field in unset {
            if document.remove(*field).is_some() {
                removed.push(field.to_string());
            }
        }
        if updated.is_empty() && removed.is_empty() {
            return false;
        }

        let now = Value::String(Utc::now().to_rfc3339());
        document.insert(UPDATED_AT_FIELD.to_string(), now.clone());
        updated.insert(UPDATED_AT_FIELD.to_string(), now);
        drop(document);

        let mut event = self.event(OP_UPDATE, id);
        event["updateDescription"] = json!({
            "updatedFields": updated,
            "removedFields": removed,
        });
        Self::publish(&mut watchers, event);
        true
    }

    pub fn set_name(&self, id: &TenantId, name: &str) -> bool {
        self.update(id, single(NAME_FIELD, json!(name)), &[])
    }

    pub fn set_routing_key(&self, id: &TenantId, routing_key: &str) -> bool {
        let field = self.schema.routing_key_field.clone();
        self.update(id, single(&field, json!(routing_key)), &[])
    }

    pub fn soft_delete(&self, id: &TenantId) -> bool {
        let is_active = self
            .documents
            .get(id)
            .is_some_and(|d| d.get(DELETED_AT_FIELD).map_or(true, Value::is_null));
        is_active && self.update(id, single(DELETED_AT_FIELD, json!(Utc::now().to_rfc3339())), &[])
    }

    pub fn restore(&self, id: &TenantId) -> bool {
        self.update(id, Map::new(), &[DELETED_AT_FIELD])
    }

    /// Whole-document replacement; the event carries the new document only.
    pub fn replace(&self, id: &TenantId, mut document: Map<String, Value>) -> bool {
        let mut watchers = self.watchers.lock();
        if !self.documents.contains_key(id) {
            return false;
        }
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        self.documents.insert(id.clone(), document.clone());

        let mut event = self.event(OP_REPLACE, id);
        event["fullDocument"] = Value::Object(document);
        Self::publish(&mut watchers, event);
        true
    }

    /// Hard delete.
    pub fn delete(&self, id: &TenantId) -> bool {
        let mut watchers = self.watchers.lock();
        if self.documents.remove(id).is_none() {
            return false;
        }
        let event = self.event(OP_DELETE, id);
        Self::publish(&mut watchers, event);
        true
    }

    /// Push an arbitrary event through the feed filter, e.g. a corrupt one.
    pub fn emit_raw(&self, event: RawEvent) {
        let mut watchers = self.watchers.lock();
        Self::publish(&mut watchers, event);
    }

    /// Invalidate every open feed, as a failover or collection drop would.
    pub fn invalidate_feeds(&self, reason: &str) {
        let mut watchers = self.watchers.lock();
        for watcher in watchers.drain(..) {
            let _ = watcher.tx.send(FeedMessage::Invalidate(reason.to_string()));
        }
    }

    fn event(&self, operation: &str, id: &TenantId) -> RawEvent {
        json!({
            "operationType": operation,
            "ns": { "db": self.database, "coll": self.collection },
            "documentKey": { "_id": id.as_str() },
        })
    }

    fn publish(watchers: &mut Vec<Watcher>, event: RawEvent) {
        let (ns, operation) = routing_of(&event);
        let operation = operation.unwrap_or_default();
        watchers.retain(|w| {
            if !w.filter.matches(&ns.db, &ns.coll, operation) {
                return !w.tx.is_closed();
            }
            w.tx.send(FeedMessage::Event(event.clone())).is_ok()
        });
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new(TenantSchema::default())
    }
}

fn single(field: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(field.to_string(), value);
    map
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".into()));
        }
        let Some(document) = self.documents.get(id).map(|d| d.value().clone()) else {
            return Ok(None);
        };
        self.schema
            .record_from_document(&document, Some(id))
            .map(Some)
            .map_err(|source| StoreError::Corrupt { id: id.clone(), source })
    }

    async fn watch(&self, filter: &FeedFilter) -> Result<Box<dyn ChangeFeed>, FeedError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(FeedError::Open("in-memory store is offline".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(Watcher { filter: filter.clone(), tx });
        Ok(Box::new(MemoryChangeFeed {
            rx,
            fail_close: self.fail_close.clone(),
            closed: false,
        }))
    }
}

pub struct MemoryChangeFeed {
    rx: mpsc::UnboundedReceiver<FeedMessage>,
    fail_close: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn next_event(&mut self) -> Result<Option<RawEvent>, FeedError> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(FeedMessage::Event(event)) => Ok(Some(event)),
            Some(FeedMessage::Invalidate(reason)) => {
                self.closed = true;
                Err(FeedError::Invalidated(reason))
            }
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        if self.closed && self.rx.is_closed() {
            return Ok(());
        }
        self.closed = true;
        self.rx.close();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(FeedError::Close("cursor kill was rejected".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha() -> TenantRecord {
        TenantRecord::new("1", "alpha", "Alpha")
    }

    #[tokio::test]
    async fn test_insert_publishes_full_document() {
        let store = InMemoryRecordStore::default();
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();

        assert!(store.insert(&alpha()));
        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event["operationType"], "insert");
        assert_eq!(event["documentKey"]["_id"], "1");
        assert_eq!(event["fullDocument"]["slug"], "alpha");
        assert_eq!(event["ns"]["coll"], "brands");
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryRecordStore::default();
        assert!(store.insert(&alpha()));
        assert!(!store.insert(&alpha()));
        assert!(!store.insert_document(Map::new()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_reports_only_effective_changes() {
        let store = InMemoryRecordStore::default();
        store.insert(&alpha());
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();
        let id = TenantId::new("1");

        assert!(!store.set_name(&id, "Alpha"));
        assert!(!store.restore(&id));
        assert!(store.set_name(&id, "Alpha Corp"));

        let event = feed.next_event().await.unwrap().unwrap();
        let updated = &event["updateDescription"]["updatedFields"];
        assert_eq!(updated["name"], "Alpha Corp");
        assert!(updated.get("updatedAt").is_some());
        assert!(updated.get("slug").is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore_events() {
        let store = InMemoryRecordStore::default();
        store.insert(&alpha());
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();
        let id = TenantId::new("1");

        assert!(store.soft_delete(&id));
        assert!(!store.soft_delete(&id));
        let event = feed.next_event().await.unwrap().unwrap();
        assert!(event["updateDescription"]["updatedFields"]["deletedAt"].is_string());
        assert!(store.find_by_id(&id).await.unwrap().unwrap().is_deleted());

        assert!(store.restore(&id));
        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event["updateDescription"]["removedFields"], json!(["deletedAt"]));
        assert!(!store.find_by_id(&id).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_filter_excludes_other_namespaces() {
        let store = InMemoryRecordStore::default();
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();

        store.emit_raw(json!({
            "operationType": "insert",
            "ns": {"db": "system", "coll": "users"},
            "documentKey": {"_id": "u1"}
        }));
        store.emit_raw(json!({
            "operationType": "drop",
            "ns": {"db": "system", "coll": "brands"}
        }));
        store.insert(&alpha());

        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event["documentKey"]["_id"], "1");
    }

    #[tokio::test]
    async fn test_hard_delete_event() {
        let store = InMemoryRecordStore::default();
        store.insert(&alpha());
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();

        assert!(store.delete(&TenantId::new("1")));
        assert!(!store.delete(&TenantId::new("1")));
        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event["operationType"], "delete");
        assert!(store.find_by_id(&TenantId::new("1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_event_has_no_diff() {
        let store = InMemoryRecordStore::default();
        store.insert(&alpha());
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();

        let mut document = alpha().to_document(store.schema());
        document.insert("slug".into(), json!("alpha-2"));
        assert!(store.replace(&TenantId::new("1"), document));

        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event["operationType"], "replace");
        assert_eq!(event["fullDocument"]["slug"], "alpha-2");
        assert!(event.get("updateDescription").is_none());
    }

    #[tokio::test]
    async fn test_invalidate_ends_feed() {
        let store = InMemoryRecordStore::default();
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        store.invalidate_feeds("failover");
        assert!(matches!(feed.next_event().await, Err(FeedError::Invalidated(_))));
        assert!(feed.next_event().await.unwrap().is_none());
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryRecordStore::default();
        store.set_available(false);
        assert!(matches!(store.watch(&FeedFilter::default()).await, Err(FeedError::Open(_))));
        assert!(matches!(
            store.find_by_id(&TenantId::new("1")).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_failure_and_idempotence() {
        let store = InMemoryRecordStore::default();
        let mut feed = store.watch(&FeedFilter::default()).await.unwrap();
        store.fail_close(true);
        assert!(matches!(feed.close().await, Err(FeedError::Close(_))));
        assert!(feed.close().await.is_ok());
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let store = InMemoryRecordStore::default();
        let mut document = Map::new();
        document.insert("_id".into(), json!("9"));
        document.insert("slug".into(), json!("nine"));
        assert!(store.insert_document(document));

        assert!(matches!(
            store.find_by_id(&TenantId::new("9")).await,
            Err(StoreError::Corrupt { .. })
        ));
        assert!(store.records().is_empty());
    }
}
