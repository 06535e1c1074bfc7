// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB record store backed by change streams.
//!
//! The feed is a database-level change stream narrowed by a `$match` stage on
//! namespace and operation type, so unrelated collections never reach the
//! process. Events are surfaced as relaxed Extended JSON, which the decoder
//! already understands (`{"$oid": ..}` ids, `{"$date": ..}` timestamps).

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::change_stream::ChangeStream;
use mongodb::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::traits::{ChangeFeed, FeedError, FeedFilter, RecordStore, StoreError};
use crate::feed::event::RawEvent;
use crate::resilience::retry::{retry, RetryConfig};
use crate::tenant::{TenantId, TenantRecord, TenantSchema};

pub struct MongoRecordStore {
    client: Client,
    database: String,
    collection: String,
    schema: TenantSchema,
}

impl MongoRecordStore {
    /// Connect and ping, retrying with the startup preset.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
        schema: TenantSchema,
    ) -> Result<Self, StoreError> {
        let client = retry("mongo_connect", &RetryConfig::startup(), || async {
            let client = Client::with_uri_str(uri).await?;
            client.database("admin").run_command(doc! { "ping": 1 }).await?;
            Ok::<_, mongodb::error::Error>(client)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(database, collection, "Connected to record store");
        Ok(Self::from_client(client, database, collection, schema))
    }

    pub fn from_client(client: Client, database: &str, collection: &str, schema: TenantSchema) -> Self {
        Self {
            client,
            database: database.to_string(),
            collection: collection.to_string(),
            schema,
        }
    }
}

fn to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn id_filter(id: &TenantId) -> Document {
    match ObjectId::parse_str(id.as_str()) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "_id": id.as_str() },
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, StoreError> {
        let found = self
            .client
            .database(&self.database)
            .collection::<Document>(&self.collection)
            .find_one(id_filter(id))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let Some(document) = found else {
            return Ok(None);
        };
        let Value::Object(map) = to_json(document) else {
            return Err(StoreError::Backend("find_one returned a non-document".into()));
        };
        self.schema
            .record_from_document(&map, Some(id))
            .map(Some)
            .map_err(|source| StoreError::Corrupt { id: id.clone(), source })
    }

    async fn watch(&self, filter: &FeedFilter) -> Result<Box<dyn ChangeFeed>, FeedError> {
        let pipeline = [doc! {
            "$match": {
                "ns.db": filter.database.as_str(),
                "ns.coll": filter.collection.as_str(),
                "operationType": { "$in": filter.operations.clone() },
            }
        }];

        let stream = self
            .client
            .database(&filter.database)
            .watch()
            .pipeline(pipeline)
            .await
            .map_err(|e| FeedError::Open(e.to_string()))?
            .with_type::<Document>();

        debug!(database = %filter.database, collection = %filter.collection, "Change stream opened");
        Ok(Box::new(MongoChangeFeed { stream: Some(stream) }))
    }
}

pub struct MongoChangeFeed {
    stream: Option<ChangeStream<Document>>,
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn next_event(&mut self) -> Result<Option<RawEvent>, FeedError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next().await {
            Some(Ok(event)) => Ok(Some(to_json(event))),
            Some(Err(e)) => Err(FeedError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        // Dropping the stream kills the server cursor.
        if self.stream.take().is_some() {
            debug!("Change stream closed");
        }
        Ok(())
    }
}
