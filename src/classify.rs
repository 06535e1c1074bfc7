// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event classification: raw change event in, cache transition out.
//!
//! Pure and synchronous. Precedence within one event:
//!
//! 1. soft delete (`deletedAt` set, routing field removed, or a hard delete)
//! 2. restore (`deletedAt` removed or nulled)
//! 3. rename (routing field changed)
//! 4. attribute update (`name` or a cached extra changed)
//! 5. ignored (only untracked fields changed)

use std::collections::BTreeMap;

use serde_json::Value;

use crate::feed::event::{ChangeEvent, DecodeError, RawEvent, UpdateDescription, OP_INSERT, OP_REPLACE};
use crate::tenant::{
    parse_timestamp, routing_key_violation, TenantAttributes, TenantId, TenantSchema,
    DELETED_AT_FIELD, NAME_FIELD,
};

/// Changed cached attributes carried by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub set: BTreeMap<String, String>,
    /// Cached extras that were removed. Never `name` or the routing key.
    pub removed: Vec<String>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    pub fn set_pairs(&self) -> Vec<(String, String)> {
        self.set.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Create { attributes: TenantAttributes },
    AttributeUpdate { id: TenantId, changes: FieldChanges },
    /// Routing key changed; the old key is whatever the reverse entry holds.
    Rename { id: TenantId, to: String, changes: FieldChanges },
    SoftDelete { id: TenantId },
    Restore { id: TenantId },
    Ignored { id: Option<TenantId>, reason: &'static str },
    /// Upstream invalidated the feed; the cursor is unusable.
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Create,
    AttributeUpdate,
    Rename,
    SoftDelete,
    Restore,
    Ignored,
    Invalidated,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::AttributeUpdate => "attribute_update",
            Self::Rename => "rename",
            Self::SoftDelete => "soft_delete",
            Self::Restore => "restore",
            Self::Ignored => "ignored",
            Self::Invalidated => "invalidated",
        }
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Self::Create { .. } => TransitionKind::Create,
            Self::AttributeUpdate { .. } => TransitionKind::AttributeUpdate,
            Self::Rename { .. } => TransitionKind::Rename,
            Self::SoftDelete { .. } => TransitionKind::SoftDelete,
            Self::Restore { .. } => TransitionKind::Restore,
            Self::Ignored { .. } => TransitionKind::Ignored,
            Self::Invalidated => TransitionKind::Invalidated,
        }
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Self::Create { attributes } => Some(&attributes.id),
            Self::AttributeUpdate { id, .. }
            | Self::Rename { id, .. }
            | Self::SoftDelete { id }
            | Self::Restore { id } => Some(id),
            Self::Ignored { id, .. } => id.as_ref(),
            Self::Invalidated => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    schema: TenantSchema,
}

impl Classifier {
    pub fn new(schema: TenantSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &TenantSchema {
        &self.schema
    }

    pub fn classify(&self, raw: &RawEvent) -> Result<Transition, DecodeError> {
        match ChangeEvent::decode(raw)? {
            ChangeEvent::Insert { document_key, full_document } => {
                let document = full_document.ok_or_else(|| DecodeError::MissingPayload {
                    operation: OP_INSERT,
                    id: document_key.id.to_string(),
                })?;
                self.from_document(&document_key.id, &document)
            }
            ChangeEvent::Update { document_key, update_description } => {
                self.from_diff(document_key.id, &update_description)
            }
            ChangeEvent::Replace { document_key, full_document, update_description } => {
                match (update_description, full_document) {
                    (Some(diff), _) if !diff.is_empty() => self.from_diff(document_key.id, &diff),
                    (_, Some(document)) => self.from_document(&document_key.id, &document),
                    (_, None) => Err(DecodeError::MissingPayload {
                        operation: OP_REPLACE,
                        id: document_key.id.to_string(),
                    }),
                }
            }
            ChangeEvent::Delete { document_key } => Ok(Transition::SoftDelete { id: document_key.id }),
            ChangeEvent::Invalidate => Ok(Transition::Invalidated),
            ChangeEvent::Unsupported => Ok(Transition::Ignored {
                id: None,
                reason: "unsupported operation",
            }),
        }
    }

    fn from_document(
        &self,
        id: &TenantId,
        document: &serde_json::Map<String, Value>,
    ) -> Result<Transition, DecodeError> {
        let record = self.schema.record_from_document(document, Some(id))?;
        if record.is_deleted() {
            // Inserted or replaced in the deleted state
            return Ok(Transition::SoftDelete { id: record.id });
        }
        Ok(Transition::Create { attributes: record.attributes() })
    }

    fn from_diff(&self, id: TenantId, diff: &UpdateDescription) -> Result<Transition, DecodeError> {
        let updated = &diff.updated_fields;

        match updated.get(DELETED_AT_FIELD) {
            Some(Value::Null) => return Ok(Transition::Restore { id }),
            Some(raw) => {
                if parse_timestamp(raw).is_none() {
                    return Err(invalid(&id, DELETED_AT_FIELD, "timestamp"));
                }
                return Ok(Transition::SoftDelete { id });
            }
            None => {}
        }
        if diff.removes(DELETED_AT_FIELD) {
            return Ok(Transition::Restore { id });
        }

        let routing_field = &self.schema.routing_key_field;
        if diff.removes(routing_field) {
            return Ok(Transition::SoftDelete { id });
        }

        let changes = self.attribute_changes(&id, diff)?;

        if let Some(raw) = updated.get(routing_field) {
            let to = match raw {
                Value::String(s) => match routing_key_violation(s) {
                    None => s.clone(),
                    Some(expected) => return Err(invalid(&id, routing_field, expected)),
                },
                Value::Null => return Ok(Transition::SoftDelete { id }),
                _ => return Err(invalid(&id, routing_field, "string")),
            };
            return Ok(Transition::Rename { id, to, changes });
        }

        if changes.is_empty() {
            return Ok(Transition::Ignored {
                id: Some(id),
                reason: "no cached field changed",
            });
        }
        Ok(Transition::AttributeUpdate { id, changes })
    }

    fn attribute_changes(
        &self,
        id: &TenantId,
        diff: &UpdateDescription,
    ) -> Result<FieldChanges, DecodeError> {
        let mut changes = FieldChanges::default();

        for (field, value) in &diff.updated_fields {
            if !self.schema.is_attribute(field) {
                continue;
            }
            match value {
                Value::String(s) => {
                    changes.set.insert(field.clone(), s.clone());
                }
                Value::Null if field == NAME_FIELD => return Err(missing(id, NAME_FIELD)),
                Value::Null => changes.removed.push(field.clone()),
                _ => return Err(invalid(id, field, "string")),
            }
        }

        for field in &diff.removed_fields {
            if field == NAME_FIELD {
                return Err(missing(id, NAME_FIELD));
            }
            if self.schema.is_cached_extra(field) && !changes.removed.contains(field) {
                changes.removed.push(field.clone());
            }
        }

        Ok(changes)
    }
}

fn invalid(id: &TenantId, field: &str, expected: &'static str) -> DecodeError {
    DecodeError::InvalidField {
        id: id.to_string(),
        field: field.to_string(),
        expected,
    }
}

fn missing(id: &TenantId, field: &str) -> DecodeError {
    DecodeError::MissingField {
        id: id.to_string(),
        field: field.to_string(),
    }
}
