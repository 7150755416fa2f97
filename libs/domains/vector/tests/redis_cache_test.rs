//! Cache layer against a real Redis. Run with `cargo test -- --ignored`.

mod common;

use std::sync::Arc;

use domain_vector::{
    CacheConfig, CacheLayer, CacheStore, CollectionSpec, EngineConfig, RedisCacheStore,
    SearchQuery, Target, VectorRecord, VectorService,
};
use test_utils::{TestDataBuilder, TestRedis};

fn target(collection: &str) -> Target {
    Target::new(common::SERVER, collection).unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_store_keys_and_delete() {
    let redis = TestRedis::new().await;
    let store = RedisCacheStore::connect(redis.url()).await.unwrap();

    store.set_ex("vc:a:1", "one".to_string(), 60).await.unwrap();
    store.set_ex("vc:a:2", "two".to_string(), 60).await.unwrap();
    store.set_ex("vc:b:1", "three".to_string(), 60).await.unwrap();

    let mut keys = store.keys("vc:a:*").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["vc:a:1".to_string(), "vc:a:2".to_string()]);

    assert_eq!(store.delete(&keys).await.unwrap(), 2);
    assert_eq!(store.get("vc:a:1").await.unwrap(), None);
    assert_eq!(store.get("vc:b:1").await.unwrap(), Some("three".to_string()));
    assert_eq!(store.delete(&[]).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_cache_layer_over_redis() {
    let redis = TestRedis::new().await;
    let store = Arc::new(RedisCacheStore::from_manager(redis.connection_manager()));
    let cache = CacheLayer::new(store, CacheConfig::default().with_key_prefix("itest"));

    let docs = target("docs");
    let other = target("other");
    let key = cache.key(&docs, "search").limit(5).build();
    let other_key = cache.key(&other, "search").limit(5).build();

    cache.set(&key, &vec![1u32, 2, 3], None).await;
    cache.set(&other_key, &vec![9u32], None).await;
    assert_eq!(cache.get::<Vec<u32>>(&key).await, Some(vec![1, 2, 3]));

    assert_eq!(cache.invalidate(&docs).await, 1);
    assert_eq!(cache.get::<Vec<u32>>(&key).await, None);
    assert_eq!(cache.get::<Vec<u32>>(&other_key).await, Some(vec![9]));

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.errors), (2, 1, 0));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_service_search_cached_in_redis() {
    let builder = TestDataBuilder::from_test_name("test_service_search_cached_in_redis");
    let redis = TestRedis::new().await;
    let backend = common::FakeBackend::new();

    let config = EngineConfig::default();
    let store = Arc::new(RedisCacheStore::connect_with_retry(redis.url(), 3).await.unwrap());
    let service = VectorService::new(common::SERVER, config, backend.factory(), store);

    service
        .create_collection(CollectionSpec::new("cached", 4))
        .await
        .unwrap();
    let records = (0..10)
        .map(|i| VectorRecord::new(builder.point_id(i), builder.embedding(4, i)))
        .collect();
    service.insert_vectors("cached", records, None).await.unwrap();

    let query = SearchQuery::new(builder.embedding(4, 3), 3);
    let first = service.search("cached", query.clone()).await.unwrap();
    let second = service.search("cached", query).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.results, second.results);
    assert_eq!(common::FakeBackend::count(&backend.state.searches), 1);
}
