// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change event wire shape.
//!
//! Feeds hand out raw JSON documents shaped like a document-store change
//! stream entry:
//!
//! ```text
//! {
//!   "operationType": "update",
//!   "ns": { "db": "system", "coll": "brands" },
//!   "documentKey": { "_id": "65f1..." },
//!   "updateDescription": {
//!     "updatedFields": { "name": "Brand Alpha" },
//!     "removedFields": [ "deletedAt" ]
//!   },
//!   "fullDocument": { ... }            // insert / replace only
//! }
//! ```
//!
//! [`ChangeEvent::decode`] turns that into a tagged union with one variant per
//! operation kind, each carrying only the fields it needs.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tenant::TenantId;

pub const OP_INSERT: &str = "insert";
pub const OP_UPDATE: &str = "update";
pub const OP_REPLACE: &str = "replace";
pub const OP_DELETE: &str = "delete";

/// Raw change event as delivered by a [`crate::store::ChangeFeed`].
pub type RawEvent = Value;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed change event: {0}")]
    Malformed(String),
    #[error("Tenant '{id}' is missing required field '{field}'")]
    MissingField { id: String, field: String },
    #[error("Field '{field}' of tenant '{id}' is invalid: expected {expected}")]
    InvalidField {
        id: String,
        field: String,
        expected: &'static str,
    },
    #[error("{operation} event for tenant '{id}' carries neither a document nor a diff")]
    MissingPayload { operation: &'static str, id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "_id")]
    pub id: TenantId,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateDescription {
    #[serde(rename = "updatedFields", default)]
    pub updated_fields: Map<String, Value>,
    #[serde(rename = "removedFields", default)]
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    pub fn is_empty(&self) -> bool {
        self.updated_fields.is_empty() && self.removed_fields.is_empty()
    }

    pub fn removes(&self, field: &str) -> bool {
        self.removed_fields.iter().any(|f| f == field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub coll: String,
}

/// Decoded change event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operationType", rename_all = "lowercase")]
pub enum ChangeEvent {
    Insert {
        #[serde(rename = "documentKey")]
        document_key: DocumentKey,
        #[serde(rename = "fullDocument")]
        full_document: Option<Map<String, Value>>,
    },
    Update {
        #[serde(rename = "documentKey")]
        document_key: DocumentKey,
        #[serde(rename = "updateDescription")]
        update_description: UpdateDescription,
    },
    Replace {
        #[serde(rename = "documentKey")]
        document_key: DocumentKey,
        #[serde(rename = "fullDocument")]
        full_document: Option<Map<String, Value>>,
        #[serde(rename = "updateDescription")]
        update_description: Option<UpdateDescription>,
    },
    Delete {
        #[serde(rename = "documentKey")]
        document_key: DocumentKey,
    },
    /// The cursor was invalidated upstream (collection dropped or renamed).
    Invalidate,
    #[serde(other)]
    Unsupported,
}

impl ChangeEvent {
    pub fn decode(raw: &RawEvent) -> Result<Self, DecodeError> {
        Self::deserialize(raw).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Insert { .. } => OP_INSERT,
            Self::Update { .. } => OP_UPDATE,
            Self::Replace { .. } => OP_REPLACE,
            Self::Delete { .. } => OP_DELETE,
            Self::Invalidate => "invalidate",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Self::Insert { document_key, .. }
            | Self::Update { document_key, .. }
            | Self::Replace { document_key, .. }
            | Self::Delete { document_key } => Some(&document_key.id),
            Self::Invalidate | Self::Unsupported => None,
        }
    }
}

/// Namespace and operation of a raw event, used for feed-side filtering.
pub fn routing_of(raw: &RawEvent) -> (Namespace, Option<&str>) {
    let ns = raw
        .get("ns")
        .and_then(|ns| Namespace::deserialize(ns).ok())
        .unwrap_or_default();
    let op = raw.get("operationType").and_then(Value::as_str);
    (ns, op)
}
