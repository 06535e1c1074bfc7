// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant ("brand") records and the attribute maps projected into the cache.
//!
//! Field names follow the canonical document layout:
//!
//! ```text
//! {
//!   "_id":       "65f1c0ffee...",        // immutable
//!   "name":      "Brand Alpha",
//!   "slug":      "alpha",                // routing key (field name is configurable)
//!   "domain":    "alpha.example.com",    // optional cached extra
//!   "createdAt": "2026-01-01T00:00:00Z",
//!   "updatedAt": "2026-01-02T00:00:00Z",
//!   "deletedAt": "2026-01-03T00:00:00Z"  // present => soft-deleted
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::feed::event::DecodeError;

pub const ID_FIELD: &str = "_id";
pub const NAME_FIELD: &str = "name";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const DELETED_AT_FIELD: &str = "deletedAt";

/// Leading character reserved for non-forward cache keys (the `$id:` reverse
/// index lives under the same prefix).
pub const RESERVED_KEY_MARKER: char = '$';

/// What a usable routing key must look like, or `None` if `key` is one.
pub fn routing_key_violation(key: &str) -> Option<&'static str> {
    if key.trim().is_empty() {
        Some("non-empty string")
    } else if key.trim_start().starts_with(RESERVED_KEY_MARKER) {
        Some("string not starting with '$'")
    } else {
        None
    }
}

/// Opaque tenant identifier.
///
/// Object ids are carried as their hex string. Deserializes from a plain
/// string, an integer, or an Extended-JSON `{"$oid": "..."}` wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a JSON value, accepting the shapes a change feed may carry.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(Self::new),
            _ => None,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("expected a tenant id, found {}", value))
        })
    }
}

/// Which document fields make up a tenant's cached attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSchema {
    /// Field holding the routing key (`slug` or `domain`).
    pub routing_key_field: String,
    /// Optional string fields copied into the forward entry when present.
    pub cached_fields: Vec<String>,
}

impl Default for TenantSchema {
    fn default() -> Self {
        Self {
            routing_key_field: "slug".to_string(),
            cached_fields: vec!["domain".to_string()],
        }
    }
}

impl TenantSchema {
    pub fn new(routing_key_field: impl Into<String>, cached_fields: Vec<String>) -> Self {
        let routing_key_field = routing_key_field.into();
        // The routing field is always cached; never list it twice.
        let cached_fields = cached_fields
            .into_iter()
            .filter(|f| f != &routing_key_field && f != NAME_FIELD && f != ID_FIELD)
            .collect();
        Self { routing_key_field, cached_fields }
    }

    pub fn is_routing_key(&self, field: &str) -> bool {
        field == self.routing_key_field
    }

    pub fn is_cached_extra(&self, field: &str) -> bool {
        self.cached_fields.iter().any(|f| f == field)
    }

    /// Fields whose change must be reflected in an existing forward entry.
    pub fn is_attribute(&self, field: &str) -> bool {
        field == NAME_FIELD || self.is_cached_extra(field)
    }

    /// Decode a full tenant document.
    ///
    /// `id` overrides the document's own `_id` (change events carry it in
    /// `documentKey`, which is authoritative).
    pub fn record_from_document(
        &self,
        document: &Map<String, Value>,
        id: Option<&TenantId>,
    ) -> Result<TenantRecord, DecodeError> {
        let id = match id {
            Some(id) => id.clone(),
            None => {
                let raw = document.get(ID_FIELD).ok_or_else(|| DecodeError::MissingField {
                    id: "<unknown>".to_string(),
                    field: ID_FIELD.to_string(),
                })?;
                TenantId::from_value(raw).ok_or_else(|| DecodeError::InvalidField {
                    id: "<unknown>".to_string(),
                    field: ID_FIELD.to_string(),
                    expected: "object id or string",
                })?
            }
        };

        let name = required_string(document, NAME_FIELD, &id)?;
        let routing_key = required_string(document, &self.routing_key_field, &id)?;
        if let Some(expected) = routing_key_violation(&routing_key) {
            return Err(DecodeError::InvalidField {
                id: id.to_string(),
                field: self.routing_key_field.clone(),
                expected,
            });
        }

        let mut extra = BTreeMap::new();
        for field in &self.cached_fields {
            match document.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    extra.insert(field.clone(), s.clone());
                }
                Some(_) => {
                    return Err(DecodeError::InvalidField {
                        id: id.to_string(),
                        field: field.clone(),
                        expected: "string",
                    })
                }
            }
        }

        let deleted_at = match document.get(DELETED_AT_FIELD) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| DecodeError::InvalidField {
                id: id.to_string(),
                field: DELETED_AT_FIELD.to_string(),
                expected: "timestamp",
            })?),
        };

        Ok(TenantRecord {
            created_at: document.get(CREATED_AT_FIELD).and_then(parse_timestamp),
            updated_at: document.get(UPDATED_AT_FIELD).and_then(parse_timestamp),
            id,
            name,
            routing_key,
            extra,
            deleted_at,
        })
    }
}

fn required_string(
    document: &Map<String, Value>,
    field: &str,
    id: &TenantId,
) -> Result<String, DecodeError> {
    match document.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        None | Some(Value::Null) => Err(DecodeError::MissingField {
            id: id.to_string(),
            field: field.to_string(),
        }),
        Some(_) => Err(DecodeError::InvalidField {
            id: id.to_string(),
            field: field.to_string(),
            expected: "string",
        }),
    }
}

/// Parse the timestamp shapes seen in tenant documents: RFC 3339 strings,
/// epoch milliseconds, and Extended-JSON `$date` wrappers.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::Object(map) => match map.get("$date")? {
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            other => parse_timestamp(other),
        },
        _ => None,
    }
}

/// Canonical tenant record as stored in the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub routing_key: String,
    pub extra: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantRecord {
    pub fn new(id: impl Into<TenantId>, routing_key: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            routing_key: routing_key.into(),
            extra: BTreeMap::new(),
            created_at: Some(now),
            updated_at: Some(now),
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn with_extra(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The subset of the record that is projected into the cache.
    pub fn attributes(&self) -> TenantAttributes {
        TenantAttributes {
            id: self.id.clone(),
            name: self.name.clone(),
            routing_key: self.routing_key.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Render the record as a store document.
    pub fn to_document(&self, schema: &TenantSchema) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        doc.insert(NAME_FIELD.to_string(), Value::String(self.name.clone()));
        doc.insert(schema.routing_key_field.clone(), Value::String(self.routing_key.clone()));
        for (field, value) in &self.extra {
            doc.insert(field.clone(), Value::String(value.clone()));
        }
        if let Some(at) = self.created_at {
            doc.insert(CREATED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        if let Some(at) = self.updated_at {
            doc.insert(UPDATED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        if let Some(at) = self.deleted_at {
            doc.insert(DELETED_AT_FIELD.to_string(), Value::String(at.to_rfc3339()));
        }
        doc
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cache entry is missing field '{0}'")]
pub struct MissingField(pub String);

/// Flat attribute map served to the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantAttributes {
    pub id: TenantId,
    pub name: String,
    pub routing_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl TenantAttributes {
    /// Field/value pairs as written into the forward entry.
    pub fn to_fields(&self, schema: &TenantSchema) -> Vec<(String, String)> {
        let mut fields = vec![
            (ID_FIELD.to_string(), self.id.to_string()),
            (NAME_FIELD.to_string(), self.name.clone()),
            (schema.routing_key_field.clone(), self.routing_key.clone()),
        ];
        fields.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields
    }

    /// Rebuild attributes from a forward entry. Unknown fields are kept as extras.
    pub fn from_fields(
        fields: &BTreeMap<String, String>,
        schema: &TenantSchema,
    ) -> Result<Self, MissingField> {
        let get = |field: &str| {
            fields
                .get(field)
                .cloned()
                .ok_or_else(|| MissingField(field.to_string()))
        };

        let id = TenantId::new(get(ID_FIELD)?);
        let name = get(NAME_FIELD)?;
        let routing_key = get(&schema.routing_key_field)?;
        let extra = fields
            .iter()
            .filter(|(k, _)| {
                k.as_str() != ID_FIELD && k.as_str() != NAME_FIELD && !schema.is_routing_key(k)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self { id, name, routing_key, extra })
    }

    /// Merge a set of attribute changes in place (routing key excluded).
    pub fn apply_changes(&mut self, set: &BTreeMap<String, String>, removed: &[String]) {
        for (field, value) in set {
            if field == NAME_FIELD {
                self.name = value.clone();
            } else {
                self.extra.insert(field.clone(), value.clone());
            }
        }
        for field in removed {
            self.extra.remove(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_tenant_id_shapes() {
        assert_eq!(TenantId::from_value(&json!("abc")), Some(TenantId::new("abc")));
        assert_eq!(TenantId::from_value(&json!(1)), Some(TenantId::new("1")));
        assert_eq!(
            TenantId::from_value(&json!({"$oid": "65f1c0ffee00000000000001"})),
            Some(TenantId::new("65f1c0ffee00000000000001"))
        );
        assert_eq!(TenantId::from_value(&json!("")), None);
        assert_eq!(TenantId::from_value(&json!(null)), None);
        assert_eq!(TenantId::from_value(&json!([1])), None);
    }

    #[test]
    fn test_tenant_id_deserialize() {
        let id: TenantId = serde_json::from_value(json!({"$oid": "ff"})).unwrap();
        assert_eq!(id.as_str(), "ff");
        assert!(serde_json::from_value::<TenantId>(json!(true)).is_err());
    }

    #[test]
    fn test_schema_never_duplicates_routing_field() {
        let schema = TenantSchema::new("domain", vec!["domain".into(), "name".into(), "region".into()]);
        assert_eq!(schema.cached_fields, vec!["region".to_string()]);
        assert!(schema.is_routing_key("domain"));
        assert!(schema.is_attribute("name"));
        assert!(schema.is_attribute("region"));
        assert!(!schema.is_attribute("domain"));
    }

    #[test]
    fn test_record_from_document() {
        let schema = TenantSchema::default();
        let record = schema
            .record_from_document(
                &doc(json!({
                    "_id": "1",
                    "name": "Alpha",
                    "slug": "alpha",
                    "domain": "alpha.example.com",
                    "createdAt": "2026-01-01T00:00:00Z",
                    "ignored": 42
                })),
                None,
            )
            .unwrap();

        assert_eq!(record.id, TenantId::new("1"));
        assert_eq!(record.routing_key, "alpha");
        assert_eq!(record.extra.get("domain").map(String::as_str), Some("alpha.example.com"));
        assert!(record.created_at.is_some());
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_record_missing_name_is_reported() {
        let schema = TenantSchema::default();
        let err = schema
            .record_from_document(&doc(json!({"_id": "1", "slug": "alpha"})), None)
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_record_rejects_blank_routing_key() {
        let schema = TenantSchema::default();
        let err = schema
            .record_from_document(&doc(json!({"_id": "1", "name": "A", "slug": "  "})), None)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { ref field, .. } if field == "slug"));
    }

    #[test]
    fn test_record_deleted_at_shapes() {
        let schema = TenantSchema::default();
        for deleted in [
            json!("2026-01-01T00:00:00Z"),
            json!(1767225600000i64),
            json!({"$date": {"$numberLong": "1767225600000"}}),
            json!({"$date": "2026-01-01T00:00:00Z"}),
        ] {
            let record = schema
                .record_from_document(
                    &doc(json!({"_id": "1", "name": "A", "slug": "a", "deletedAt": deleted})),
                    None,
                )
                .unwrap();
            assert!(record.is_deleted());
        }

        let record = schema
            .record_from_document(
                &doc(json!({"_id": "1", "name": "A", "slug": "a", "deletedAt": null})),
                None,
            )
            .unwrap();
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_document_round_trip() {
        let schema = TenantSchema::default();
        let record = TenantRecord::new("7", "seven", "Seven").with_extra("domain", "seven.io");
        let parsed = schema.record_from_document(&record.to_document(&schema), None).unwrap();
        assert_eq!(parsed.attributes(), record.attributes());
    }

    #[test]
    fn test_attributes_fields_round_trip() {
        let schema = TenantSchema::default();
        let attrs = TenantRecord::new("1", "alpha", "Alpha")
            .with_extra("domain", "alpha.io")
            .attributes();
        let fields: BTreeMap<String, String> = attrs.to_fields(&schema).into_iter().collect();
        assert_eq!(fields.get("_id").map(String::as_str), Some("1"));
        assert_eq!(fields.get("slug").map(String::as_str), Some("alpha"));
        assert_eq!(TenantAttributes::from_fields(&fields, &schema).unwrap(), attrs);
    }

    #[test]
    fn test_attributes_from_incomplete_fields() {
        let schema = TenantSchema::default();
        let fields: BTreeMap<String, String> =
            [("_id".to_string(), "1".to_string())].into_iter().collect();
        assert_eq!(
            TenantAttributes::from_fields(&fields, &schema).unwrap_err(),
            MissingField("name".to_string())
        );
    }

    #[test]
    fn test_apply_changes() {
        let mut attrs = TenantRecord::new("1", "alpha", "Alpha")
            .with_extra("domain", "alpha.io")
            .attributes();
        let set: BTreeMap<String, String> =
            [("name".to_string(), "Alpha Corp".to_string())].into_iter().collect();
        attrs.apply_changes(&set, &["domain".to_string()]);
        assert_eq!(attrs.name, "Alpha Corp");
        assert!(attrs.extra.is_empty());
        assert_eq!(attrs.routing_key, "alpha");
    }

    #[test]
    fn test_reserved_routing_key_rejected() {
        let schema = TenantSchema::default();
        let doc = TenantRecord::new("1", "$id:2", "Alpha").to_document(&schema);
        let err = schema.record_from_document(&doc, None).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { ref field, .. } if field == "slug"));

        assert_eq!(routing_key_violation("alpha"), None);
        assert_eq!(routing_key_violation("a$b"), None);
        assert!(routing_key_violation(" $id:1").is_some());
        assert!(routing_key_violation("  ").is_some());
    }
}
