// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the directory synchronizer.
//!
//! # Example
//!
//! ```
//! use tenant_directory::DirectoryConfig;
//!
//! // Defaults: `system.brands`, routed by `slug`, keys under `brands:`
//! let config = DirectoryConfig::default();
//! assert_eq!(config.key_prefix, "brands:");
//!
//! // Route by domain instead, caching the slug alongside
//! let config = DirectoryConfig {
//!     routing_key_field: "domain".into(),
//!     cached_fields: vec!["slug".into()],
//!     ..Default::default()
//! };
//! assert_eq!(config.key_layout().forward("a.example.com"), "brands:a.example.com");
//! ```

use serde::Deserialize;

use crate::cache::keys::{KeyLayout, DEFAULT_PREFIX};
use crate::store::FeedFilter;
use crate::tenant::TenantSchema;

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// MongoDB connection string, used with the `mongodb` feature
    #[serde(default)]
    pub mongo_url: Option<String>,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Document field holding the routing key
    #[serde(default = "default_routing_key_field")]
    pub routing_key_field: String,

    /// Optional string fields copied into the forward entry
    #[serde(default = "default_cached_fields")]
    pub cached_fields: Vec<String>,
}

fn default_key_prefix() -> String { DEFAULT_PREFIX.to_string() }
fn default_database() -> String { "system".to_string() }
fn default_collection() -> String { "brands".to_string() }
fn default_routing_key_field() -> String { "slug".to_string() }
fn default_cached_fields() -> Vec<String> { vec!["domain".to_string()] }

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            mongo_url: None,
            database: default_database(),
            collection: default_collection(),
            routing_key_field: default_routing_key_field(),
            cached_fields: default_cached_fields(),
        }
    }
}

impl DirectoryConfig {
    pub fn feed_filter(&self) -> FeedFilter {
        FeedFilter::new(self.database.as_str(), self.collection.as_str())
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::new(self.key_prefix.as_str())
    }

    pub fn schema(&self) -> TenantSchema {
        TenantSchema::new(self.routing_key_field.as_str(), self.cached_fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_serde_defaults() {
        let parsed: DirectoryConfig = serde_json::from_str("{}").unwrap();
        let default = DirectoryConfig::default();
        assert_eq!(parsed.key_prefix, default.key_prefix);
        assert_eq!(parsed.database, "system");
        assert_eq!(parsed.collection, "brands");
        assert_eq!(parsed.routing_key_field, "slug");
        assert_eq!(parsed.cached_fields, vec!["domain".to_string()]);
        assert!(parsed.redis_url.is_none());
    }

    #[test]
    fn test_derived_components() {
        let config: DirectoryConfig = serde_json::from_str(
            r#"{"key_prefix": "t:", "database": "core", "collection": "tenants",
                "routing_key_field": "domain", "cached_fields": ["domain", "region"]}"#,
        )
        .unwrap();

        assert!(config.feed_filter().matches("core", "tenants", "update"));
        assert_eq!(config.key_layout().reverse(&"9".into()), "t:$id:9");
        let schema = config.schema();
        assert!(schema.is_routing_key("domain"));
        assert_eq!(schema.cached_fields, vec!["region".to_string()]);
    }
}
