// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key layout.
//!
//! ```text
//! {prefix}{routing_key}   -> hash of tenant attributes   (forward)
//! {prefix}$id:{id}        -> routing key string          (reverse)
//! ```
//!
//! Routing keys starting with `$` are rejected when events are decoded, so
//! the two families cannot collide.

use crate::tenant::TenantId;

pub const DEFAULT_PREFIX: &str = "brands:";
const REVERSE_MARKER: &str = "$id:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    pub fn forward(&self, routing_key: &str) -> String {
        format!("{}{}", self.prefix, routing_key)
    }

    #[inline]
    pub fn reverse(&self, id: &TenantId) -> String {
        format!("{}{}{}", self.prefix, REVERSE_MARKER, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let keys = KeyLayout::default();
        assert_eq!(keys.forward("alpha"), "brands:alpha");
        assert_eq!(keys.reverse(&TenantId::new("1")), "brands:$id:1");
    }

    #[test]
    fn test_custom_prefix() {
        let keys = KeyLayout::new("tenants:");
        assert_eq!(keys.prefix(), "tenants:");
        assert_eq!(keys.forward("beta"), "tenants:beta");
        assert_eq!(keys.reverse(&TenantId::new("65f1")), "tenants:$id:65f1");
    }
}
