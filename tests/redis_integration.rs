//! Integration tests against a real Redis.
//!
//! The record store stays in memory; only the directory cache is real. Tests
//! use testcontainers, so Docker is the only requirement.
//!
//! # Running Tests
//! ```bash
//! cargo test --test redis_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

use tenant_directory::{
    CacheBatch, CacheError, DirectoryCache, DirectoryConfig, DirectorySynchronizer,
    InMemoryRecordStore, RedisDirectoryCache, ResolveError, SyncState, TenantId, TenantRecord,
};

// =============================================================================
// Container Helpers
// =============================================================================

fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

async fn wait_until<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for the cache");
}

// =============================================================================
// Cache Backend
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_batch_applies_hash_and_string_entries() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cache = RedisDirectoryCache::connect(&redis_url(&redis)).await.expect("connect");

    let mut batch = CacheBatch::new();
    batch
        .set_fields(
            "brands:alpha",
            vec![
                ("_id".into(), "1".into()),
                ("name".into(), "Alpha".into()),
                ("slug".into(), "alpha".into()),
            ],
        )
        .set_value("brands:$id:1", "alpha");
    cache.execute(&batch).await.expect("execute");

    let fields = cache.get_fields("brands:alpha").await.unwrap();
    assert_eq!(fields.get("name").map(String::as_str), Some("Alpha"));
    assert_eq!(cache.get_value("brands:$id:1").await.unwrap().as_deref(), Some("alpha"));

    let mut batch = CacheBatch::new();
    batch
        .remove_fields("brands:alpha", vec!["name".into()])
        .set_fields("brands:alpha", vec![])
        .delete("brands:$id:1");
    cache.execute(&batch).await.expect("execute");

    let fields = cache.get_fields("brands:alpha").await.unwrap();
    assert!(!fields.contains_key("name"));
    assert_eq!(fields.len(), 2);
    assert_eq!(cache.get_value("brands:$id:1").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_missing_keys_read_empty() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cache = RedisDirectoryCache::connect(&redis_url(&redis)).await.expect("connect");

    assert!(cache.get_fields("brands:ghost").await.unwrap().is_empty());
    assert_eq!(cache.get_value("brands:$id:ghost").await.unwrap(), None);

    // Empty batches never reach the server
    cache.execute(&CacheBatch::new()).await.expect("empty batch");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_wrong_type_reported() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cache = RedisDirectoryCache::connect(&redis_url(&redis)).await.expect("connect");

    cache.set_value("brands:alpha", "not a hash").await.unwrap();
    let err = cache.get_fields("brands:alpha").await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_connect_to_dead_server() {
    // Nothing listens on port 1; the startup retry gives up
    let result = RedisDirectoryCache::connect("redis://127.0.0.1:1").await;
    assert!(matches!(result, Err(CacheError::Backend(_))));
}

// =============================================================================
// Synchronizer over Redis
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_synchronizer_projects_into_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);

    let config = DirectoryConfig {
        redis_url: Some(redis_url(&redis)),
        ..Default::default()
    };
    let store = Arc::new(InMemoryRecordStore::new(config.schema()));
    let mut sync = DirectorySynchronizer::with_redis(&config, store.clone())
        .await
        .expect("connect");
    sync.start().await.expect("start");
    let resolver = sync.resolver();

    store.insert(&TenantRecord::new("1", "alpha", "Alpha").with_extra("domain", "alpha.io"));
    wait_until(|| async { resolver.resolve("alpha").await.is_ok() }).await;
    let attrs = resolver.resolve("alpha").await.unwrap();
    assert_eq!(attrs.name, "Alpha");
    assert_eq!(attrs.extra.get("domain").map(String::as_str), Some("alpha.io"));

    // Rename moves the forward entry
    let id = TenantId::new("1");
    store.set_routing_key(&id, "alpha-2");
    wait_until(|| async { resolver.resolve("alpha-2").await.is_ok() }).await;
    assert!(matches!(resolver.resolve("alpha").await, Err(ResolveError::NotFound(_))));

    // Soft delete removes both entries
    store.soft_delete(&id);
    wait_until(|| async { resolver.resolve("alpha-2").await.is_err() }).await;

    let client = redis::Client::open(redis_url(&redis)).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let keys: Vec<String> = conn.keys("brands:*").await.unwrap();
    assert!(keys.is_empty(), "leftover keys: {:?}", keys);

    sync.stop().await.expect("stop");
    assert_eq!(sync.state(), SyncState::Stopped);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_custom_prefix_isolates_directories() {
    let docker = Cli::default();
    let redis = redis_container(&docker);

    let config = DirectoryConfig {
        redis_url: Some(redis_url(&redis)),
        key_prefix: "tenants:".into(),
        ..Default::default()
    };
    let store = Arc::new(InMemoryRecordStore::new(config.schema()));
    let mut sync = DirectorySynchronizer::with_redis(&config, store.clone())
        .await
        .expect("connect");
    sync.start().await.expect("start");

    store.insert(&TenantRecord::new("7", "gamma", "Gamma"));
    let resolver = sync.resolver();
    wait_until(|| async { resolver.resolve("gamma").await.is_ok() }).await;

    let client = redis::Client::open(redis_url(&redis)).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let reverse: Option<String> = conn.get("tenants:$id:7").await.unwrap();
    assert_eq!(reverse.as_deref(), Some("gamma"));
    let legacy: Vec<String> = conn.keys("brands:*").await.unwrap();
    assert!(legacy.is_empty());

    sync.stop().await.expect("stop");
}
