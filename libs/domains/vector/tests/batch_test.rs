mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use domain_vector::{
    BatchConfig, BatchJob, BatchMode, BatchProcessor, CollectionSpec, PoolConfig, PoolRegistry,
    Target, VectorRecord,
};
use test_utils::TestDataBuilder;

const COLLECTION: &str = "batch-docs";

fn records(builder: &TestDataBuilder, n: usize) -> Vec<VectorRecord> {
    (0..n as u64)
        .map(|i| VectorRecord::new(builder.point_id(i), builder.embedding(4, i)))
        .collect()
}

fn setup(config: BatchConfig) -> (FakeBackend, BatchProcessor, Target) {
    let backend = FakeBackend::new();
    backend.create(CollectionSpec::new(COLLECTION, 4));

    let pool = Arc::new(PoolRegistry::new(
        PoolConfig::default().with_limits(0, 8),
        backend.factory(),
    ));
    let target = Target::new(common::SERVER, COLLECTION).unwrap();
    (backend, BatchProcessor::new(pool, config), target)
}

#[tokio::test]
async fn test_parallel_batch_of_2500() {
    let builder = TestDataBuilder::from_test_name("test_parallel_batch_of_2500");
    let (backend, processor, target) = setup(BatchConfig::default().with_parallelism(true, 2));

    let result = processor
        .run(BatchJob::upsert(target, records(&builder, 2500)).with_chunk_size(1000))
        .await;

    let sizes: Vec<usize> = result.per_chunk.iter().map(|c| c.size).collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert_eq!(result.inserted, 2500);
    assert_eq!(result.errors, 0);
    assert_eq!(backend.point_count(COLLECTION), 2500);
    assert_eq!(FakeBackend::count(&backend.state.upserts), 3);
}

#[tokio::test(start_paused = true)]
async fn test_counts_always_add_up() {
    let builder = TestDataBuilder::from_test_name("test_counts_always_add_up");

    for &n in &[0usize, 1, 7, 100, 333] {
        for &chunk in &[1usize, 10, 50, 1000] {
            for mode in [BatchMode::Sequential, BatchMode::Parallel] {
                let (backend, processor, target) = setup(
                    BatchConfig::default()
                        .with_parallelism(true, 3)
                        .with_retries(1, Duration::from_millis(5)),
                );
                // Every chunk of exactly 10 items fails permanently
                backend.fail_upserts_of_size(10);

                let result = processor
                    .run(
                        BatchJob::upsert(target, records(&builder, n))
                            .with_chunk_size(chunk)
                            .with_mode(mode),
                    )
                    .await;

                assert_eq!(
                    result.inserted + result.errors,
                    n,
                    "n={} chunk={} mode={:?}",
                    n,
                    chunk,
                    mode
                );
                assert_eq!(backend.point_count(COLLECTION), result.inserted);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_on_retry() {
    let builder = TestDataBuilder::from_test_name("test_transient_failure_recovers_on_retry");
    let (backend, processor, target) =
        setup(BatchConfig::default().with_retries(3, Duration::from_millis(100)));
    backend.fail_next_upserts(2);

    let result = processor
        .run(BatchJob::upsert(target, records(&builder, 50)).with_chunk_size(50))
        .await;

    assert!(result.is_complete());
    assert_eq!(result.per_chunk[0].attempts, 3);
    assert_eq!(backend.point_count(COLLECTION), 50);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chunk_is_reported_not_raised() {
    let builder = TestDataBuilder::from_test_name("test_exhausted_chunk_is_reported_not_raised");
    let (backend, processor, target) =
        setup(BatchConfig::default().with_retries(2, Duration::from_millis(10)));
    backend.fail_upserts_of_size(5);

    let result = processor
        .run(BatchJob::upsert(target, records(&builder, 25)).with_chunk_size(10))
        .await;

    assert_eq!((result.inserted, result.errors), (20, 5));
    let failed = result.per_chunk.iter().find(|c| !c.succeeded).unwrap();
    assert_eq!(failed.index, 2);
    assert_eq!(failed.attempts, 3);
}

#[tokio::test]
async fn test_batch_delete() {
    let builder = TestDataBuilder::from_test_name("test_batch_delete");
    let (backend, processor, target) = setup(BatchConfig::default());

    let records = records(&builder, 30);
    let ids = records.iter().map(|r| r.id).take(20).collect();
    processor.run(BatchJob::upsert(target.clone(), records)).await;

    let result = processor
        .run(BatchJob::delete(target, ids).with_chunk_size(8))
        .await;
    assert_eq!(result.per_chunk.len(), 3);
    assert_eq!(result.inserted, 20);
    assert_eq!(backend.point_count(COLLECTION), 10);
}
