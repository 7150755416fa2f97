//! Chunked bulk writes.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::config::BatchConfig;
use crate::error::VectorResult;
use crate::metrics;
use crate::models::{BatchItems, BatchJob, BatchMode, BatchOperation, BatchResult, ChunkResult, Target};
use crate::pool::PoolRegistry;
use crate::retry::{RetryPolicy, retry_with_policy};

/// Index ranges of the chunks `total` items are split into.
pub fn plan_chunks(total: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..total)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(total))
        .collect()
}

fn split_items(items: BatchItems, chunk_size: usize) -> Vec<BatchItems> {
    fn split<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
        let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
        let mut iter = items.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(chunk_size).collect());
        }
        chunks
    }

    let chunk_size = chunk_size.max(1);
    match items {
        BatchItems::Records(records) => split(records, chunk_size)
            .into_iter()
            .map(BatchItems::Records)
            .collect(),
        BatchItems::Ids(ids) => split(ids, chunk_size)
            .into_iter()
            .map(BatchItems::Ids)
            .collect(),
    }
}

/// Runs [`BatchJob`]s through the pool, one backend call per chunk.
pub struct BatchProcessor {
    pool: Arc<PoolRegistry>,
    cache: Option<Arc<CacheLayer>>,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(pool: Arc<PoolRegistry>, config: BatchConfig) -> Self {
        Self {
            pool,
            cache: None,
            config,
        }
    }

    /// Invalidate the target's cache entries after successful writes.
    pub fn with_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.config.max_retries, self.config.retry_delay)
            .with_attempt_timeout(self.config.chunk_timeout)
    }

    /// Execute `job`. Partial failure is reported in the counts, never as an
    /// error: `inserted + errors` always equals the number of items.
    pub async fn run(&self, job: BatchJob) -> BatchResult {
        let started = Instant::now();
        let total = job.items.len();
        if total == 0 {
            return BatchResult::default();
        }

        let chunk_size = self.config.effective_chunk_size(job.chunk_size);
        let parallel = job.mode == BatchMode::Parallel
            && self.config.parallel_enabled
            && total > chunk_size * 2;

        let chunks = split_items(job.items, chunk_size);
        debug!(
            target = %job.target,
            operation = job.operation.as_str(),
            total,
            chunks = chunks.len(),
            chunk_size,
            parallel,
            "Running batch"
        );

        let mut per_chunk = if parallel {
            self.run_parallel(job.operation, &job.target, chunks).await
        } else {
            self.run_sequential(job.operation, &job.target, chunks).await
        };
        per_chunk.sort_by_key(|chunk| chunk.index);

        let inserted = per_chunk.iter().filter(|c| c.succeeded).map(|c| c.size).sum();
        let errors = per_chunk.iter().filter(|c| !c.succeeded).map(|c| c.size).sum();

        if inserted > 0 {
            if let Some(cache) = &self.cache {
                cache.invalidate(&job.target).await;
            }
        }

        let result = BatchResult {
            inserted,
            errors,
            per_chunk,
            duration: started.elapsed(),
        };

        if result.is_complete() {
            info!(
                target = %job.target,
                operation = job.operation.as_str(),
                items = inserted,
                elapsed_ms = result.duration.as_millis() as u64,
                "Batch completed"
            );
        } else {
            warn!(
                target = %job.target,
                operation = job.operation.as_str(),
                inserted,
                errors,
                "Batch completed with failed chunks"
            );
        }
        result
    }

    async fn run_sequential(
        &self,
        operation: BatchOperation,
        target: &Target,
        chunks: Vec<BatchItems>,
    ) -> Vec<ChunkResult> {
        let policy = self.retry_policy();
        let mut results = Vec::with_capacity(chunks.len());
        for (index, items) in chunks.into_iter().enumerate() {
            results.push(execute_chunk(&self.pool, &policy, operation, target, index, &items).await);
        }
        results
    }

    async fn run_parallel(
        &self,
        operation: BatchOperation,
        target: &Target,
        chunks: Vec<BatchItems>,
    ) -> Vec<ChunkResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallel_batches.max(1)));
        let policy = self.retry_policy();
        let mut join_set: JoinSet<ChunkResult> = JoinSet::new();
        let mut pending: BTreeMap<usize, usize> = BTreeMap::new();

        for (index, items) in chunks.into_iter().enumerate() {
            pending.insert(index, items.len());

            let semaphore = Arc::clone(&semaphore);
            let pool = Arc::clone(&self.pool);
            let policy = policy.clone();
            let target = target.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        return failed_chunk(index, items.len(), err.to_string());
                    }
                };
                execute_chunk(&pool, &policy, operation, &target, index, &items).await
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    pending.remove(&result.index);
                    results.push(result);
                }
                Err(err) => warn!(target = %target, error = %err, "Batch chunk task failed"),
            }
        }

        // Chunks whose task died still count as failed items
        for (index, size) in pending {
            results.push(failed_chunk(index, size, "chunk task aborted".to_string()));
        }
        results
    }
}

fn failed_chunk(index: usize, size: usize, error: String) -> ChunkResult {
    ChunkResult {
        index,
        size,
        succeeded: false,
        attempts: 0,
        error: Some(error),
        duration: Default::default(),
    }
}

async fn write_chunk(
    pool: &PoolRegistry,
    operation: BatchOperation,
    target: &Target,
    items: &BatchItems,
) -> VectorResult<()> {
    let conn = pool.acquire(target).await?;
    match items {
        BatchItems::Records(records) => conn.upsert(&target.collection, records).await?,
        BatchItems::Ids(ids) => {
            conn.delete(&target.collection, ids).await?;
        }
    }
    debug!(
        target = %target,
        operation = operation.as_str(),
        conn = conn.id(),
        items = items.len(),
        "Chunk written"
    );
    Ok(())
}

async fn execute_chunk(
    pool: &PoolRegistry,
    policy: &RetryPolicy,
    operation: BatchOperation,
    target: &Target,
    index: usize,
    items: &BatchItems,
) -> ChunkResult {
    let started = Instant::now();
    let size = items.len();
    let mut attempts = 0;

    let outcome = retry_with_policy(policy, "batch_chunk", |attempt| {
        attempts = attempt;
        write_chunk(pool, operation, target, items)
    })
    .await;

    metrics::batch_chunk(operation.as_str(), outcome.is_ok(), size);

    let error = match outcome {
        Ok(()) => None,
        Err(err) => {
            warn!(
                target = %target,
                chunk = index,
                size,
                attempts,
                error = %err,
                "Batch chunk failed"
            );
            Some(err.to_string())
        }
    };

    ChunkResult {
        index,
        size,
        succeeded: error.is_none(),
        attempts,
        error,
        duration: started.elapsed(),
    }
}
