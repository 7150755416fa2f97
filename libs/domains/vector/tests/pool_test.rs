mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use domain_vector::{
    CollectionSpec, ConnectionFailure, EngineConfig, PoolConfig, SearchQuery, Target, VectorError,
    VectorRecord,
};
use test_utils::TestDataBuilder;
use tokio::sync::watch;
use tokio::task::JoinSet;

const DIM: usize = 4;

fn config(max_connections: usize) -> EngineConfig {
    EngineConfig {
        pool: PoolConfig::default()
            .with_limits(0, max_connections)
            .with_acquire_timeout(Duration::from_secs(30), Duration::from_millis(10)),
        ..EngineConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_searches_respect_max_connections() {
    let builder = TestDataBuilder::from_test_name("test_concurrent_searches_respect_max_connections");
    let backend = FakeBackend::new();
    backend.create(CollectionSpec::new("pooled", DIM as u32));
    let service = Arc::new(common::service(&backend, config(3)));

    let records = (0..20)
        .map(|i| VectorRecord::new(builder.point_id(i), builder.embedding(DIM, i)))
        .collect();
    service.insert_vectors("pooled", records, None).await.unwrap();
    backend.set_search_delay(Duration::from_millis(50));

    let mut tasks = JoinSet::new();
    for i in 0..40 {
        let service = Arc::clone(&service);
        let vector = builder.embedding(DIM, 1_000 + i);
        tasks.spawn(async move { service.search("pooled", SearchQuery::new(vector, 3)).await });
    }
    while let Some(joined) = tasks.join_next().await {
        let response = joined.unwrap().unwrap();
        assert_eq!(response.results.len(), 3);
    }

    assert!(FakeBackend::count(&backend.state.max_in_flight) <= 3);
    let stats = service.pool_status("pooled").unwrap().unwrap();
    assert_eq!(stats.active, 0);
    assert!(stats.total() <= 3);
    assert!(stats.total_requests >= 40);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_surfaces_connection_error() {
    let backend = FakeBackend::new();
    let registry = domain_vector::PoolRegistry::new(
        PoolConfig::default()
            .with_limits(0, 1)
            .with_acquire_timeout(Duration::from_millis(300), Duration::from_millis(50)),
        backend.factory(),
    );
    let target = Target::new(common::SERVER, "busy").unwrap();

    let held = registry.acquire(&target).await.unwrap();
    let err = registry.acquire(&target).await.unwrap_err();
    assert!(matches!(
        err,
        VectorError::Connection {
            reason: ConnectionFailure::PoolExhausted,
            ..
        }
    ));
    assert!(!err.is_transient());

    drop(held);
    assert!(registry.acquire(&target).await.is_ok());
    assert_eq!(FakeBackend::count(&backend.state.connects), 1);
}

#[tokio::test]
async fn test_pools_are_isolated_per_collection() {
    let backend = FakeBackend::new();
    let service = common::service(&backend, config(2));
    service
        .create_collection(CollectionSpec::new("alpha", DIM as u32))
        .await
        .unwrap();
    service
        .create_collection(CollectionSpec::new("beta", DIM as u32))
        .await
        .unwrap();

    let alpha = service.scale_pool("alpha", 5).await.unwrap();
    assert_eq!(alpha.idle, 2, "scaling is clamped to max_connections");
    let beta = service.scale_pool("beta", 1).await.unwrap();
    assert_eq!(beta.idle, 1);

    let collections: Vec<String> = service
        .pool_statuses()
        .into_iter()
        .filter(|s| !s.target.is_server_scope())
        .map(|s| s.target.collection)
        .collect();
    assert_eq!(collections, vec!["alpha".to_string(), "beta".to_string()]);

    assert!(service.delete_collection("alpha").await.unwrap());
    assert!(service.pool_status("alpha").unwrap().is_none());
    assert_eq!(service.pool_status("beta").unwrap().unwrap().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_reaps_and_refills() {
    let backend = FakeBackend::new();
    let engine = EngineConfig {
        pool: PoolConfig::default()
            .with_limits(1, 4)
            .with_idle_timeout(Duration::from_secs(30))
            .with_maintenance_intervals(Duration::from_secs(10), Duration::from_secs(3600)),
        ..EngineConfig::default()
    };
    let service = common::service(&backend, engine);
    service.scale_pool("reaped", 4).await.unwrap();
    assert_eq!(FakeBackend::count(&backend.state.connects), 4);

    let (tx, rx) = watch::channel(false);
    let handle = service.spawn_maintenance(rx);

    tokio::time::sleep(Duration::from_secs(45)).await;
    let stats = service.pool_status("reaped").unwrap().unwrap();
    assert_eq!(stats.idle, 1, "stale connections closed, minimum kept");
    assert!(stats.closed >= 3);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
