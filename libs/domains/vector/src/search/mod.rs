//! Similarity search over the pool.
//!
//! Large limits are split into offset sub-queries that run concurrently,
//! multi-vector requests fan out one search per vector and aggregate, and
//! hybrid requests blend a vector search with a keyword scroll. Every public
//! path consults the cache first and writes back on a miss.
//!
//! Backend calls from every level of the fan-out share one gate of
//! `max_concurrent_queries` permits.

mod aggregate;
mod keyword;
mod tuning;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{BackendQuery, ScrollRequest};
use crate::cache::{CacheKey, CacheLayer};
use crate::config::SearchConfig;
use crate::error::{VectorError, VectorResult};
use crate::metrics;
use crate::models::{
    Aggregation, HybridRequest, ScrollPage, SearchQuery, SearchRequest, SearchResponse,
    SearchResult, Target,
};
use crate::pool::PoolRegistry;
use crate::retry::{RetryPolicy, retry_with_policy};

pub use aggregate::{aggregate, merge_hybrid, normalize_weights};
pub use keyword::keyword_score;
pub use tuning::{ef_for_limit, split_limit};

use aggregate::{dedupe_max, sort_by_score};
use keyword::payload_text;

pub(crate) fn validate_vectors(vectors: &[Vec<f32>]) -> VectorResult<()> {
    let first = vectors
        .first()
        .ok_or_else(|| VectorError::validation("at least one query vector is required"))?;
    if first.is_empty() {
        return Err(VectorError::validation("query vector must not be empty"));
    }
    for vector in vectors {
        if vector.len() != first.len() {
            return Err(VectorError::validation(format!(
                "query vectors differ in dimension: {} vs {}",
                first.len(),
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(VectorError::validation("query vector contains non-finite values"));
        }
    }
    Ok(())
}

fn validate_threshold(threshold: Option<f32>) -> VectorResult<()> {
    match threshold {
        Some(t) if !t.is_finite() => Err(VectorError::validation("score threshold must be finite")),
        _ => Ok(()),
    }
}

fn apply_threshold(results: &mut Vec<SearchResult>, threshold: Option<f32>) {
    if let Some(t) = threshold {
        results.retain(|r| r.score >= t);
    }
}

/// Cache key of a request and the target generation it was built at.
struct Lookup {
    key: CacheKey,
    generation: u64,
}

pub struct SearchEngine {
    pool: Arc<PoolRegistry>,
    cache: Option<Arc<CacheLayer>>,
    config: SearchConfig,
    permits: Semaphore,
}

impl SearchEngine {
    pub fn new(pool: Arc<PoolRegistry>, config: SearchConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrent_queries.max(1));
        Self {
            pool,
            cache: None,
            config,
            permits,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// `limit` clamped to `1..=max_limit`; 0 means the default limit.
    pub fn effective_limit(&self, limit: u32) -> u32 {
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };
        limit.min(self.config.max_limit).max(1)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.config.max_retries, self.config.retry_delay)
            .with_attempt_timeout(self.config.query_timeout)
    }

    fn cache(&self) -> Option<&CacheLayer> {
        self.cache.as_deref().filter(|c| c.is_enabled())
    }

    /// Generation first, so an invalidation racing with the backend call is
    /// always observed at write-back.
    fn lookup(&self, target: &Target, build: impl FnOnce(&CacheLayer) -> CacheKey) -> Option<Lookup> {
        let cache = self.cache()?;
        let generation = cache.generation(target);
        Some(Lookup {
            key: build(cache),
            generation,
        })
    }

    async fn cached_results(&self, lookup: Option<&Lookup>) -> Option<Vec<SearchResult>> {
        self.cache()?.get(&lookup?.key).await
    }

    async fn store_results(&self, target: &Target, lookup: Option<&Lookup>, results: &[SearchResult]) {
        if let (Some(cache), Some(lookup)) = (self.cache(), lookup) {
            cache
                .set_if_current(target, lookup.generation, &lookup.key, &results, None)
                .await;
        }
    }

    async fn permit(&self) -> VectorResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|err| VectorError::Internal(format!("search gate closed: {}", err)))
    }

    /// Backend calls currently allowed to start.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn query_once(&self, target: &Target, query: &BackendQuery) -> VectorResult<Vec<SearchResult>> {
        let _permit = self.permit().await?;
        let conn = self.pool.acquire(target).await?;
        conn.search(&target.collection, query).await
    }

    async fn query(&self, target: &Target, query: BackendQuery) -> VectorResult<Vec<SearchResult>> {
        let query = &query;
        retry_with_policy(&self.retry_policy(), "search", |_| self.query_once(target, query)).await
    }

    /// One page of points matching `request.filter`.
    pub async fn scroll(&self, target: &Target, request: &ScrollRequest) -> VectorResult<ScrollPage> {
        retry_with_policy(&self.retry_policy(), "scroll", |_| async move {
            let _permit = self.permit().await?;
            let conn = self.pool.acquire(target).await?;
            conn.scroll(&target.collection, request).await
        })
        .await
    }

    /// Uncached single-vector search.
    ///
    /// Limits above `parallel_search_threshold` are covered by concurrent
    /// offset sub-queries whose results are merged, de-duplicated by id and
    /// truncated back to the limit.
    pub async fn search_single(
        &self,
        target: &Target,
        query: &SearchQuery,
    ) -> VectorResult<Vec<SearchResult>> {
        validate_vectors(std::slice::from_ref(&query.vector))?;
        validate_threshold(query.score_threshold)?;

        let limit = self.effective_limit(query.limit);
        let ef = ef_for_limit(limit, &self.config);
        let parts = split_limit(limit, self.config.parallel_search_threshold);

        let backend_query = |offset: u64, limit: u64| BackendQuery {
            vector: query.vector.clone(),
            limit,
            offset,
            filter: query.filter.clone(),
            score_threshold: query.score_threshold,
            ef,
            with_vectors: query.with_vectors,
            with_payload: query.with_payload,
        };

        let mut results = if parts.len() <= 1 {
            self.query(target, backend_query(0, u64::from(limit))).await?
        } else {
            debug!(target = %target, limit, sub_queries = parts.len(), "Splitting search");
            let outcomes: Vec<VectorResult<Vec<SearchResult>>> = stream::iter(parts)
                .map(|(offset, n)| self.query(target, backend_query(offset, n)))
                .buffer_unordered(self.config.max_concurrent_queries.max(1))
                .collect()
                .await;

            let mut merged = Vec::with_capacity(limit as usize);
            for outcome in outcomes {
                merged.extend(outcome?);
            }
            dedupe_max(merged)
        };

        sort_by_score(&mut results);
        results.truncate(limit as usize);
        apply_threshold(&mut results, query.score_threshold);
        Ok(results)
    }

    /// Cached search over one or more vectors.
    pub async fn search(&self, target: &Target, request: &SearchRequest) -> VectorResult<SearchResponse> {
        let started = Instant::now();
        validate_vectors(&request.vectors)?;
        validate_threshold(request.score_threshold)?;

        let limit = self.effective_limit(request.limit);
        let kind = if request.vectors.len() > 1 { "multi" } else { "single" };

        let lookup = self.lookup(target, |cache| {
            cache
                .key(target, "search")
                .vectors(&request.vectors)
                .limit(limit)
                .filter(request.filter.as_ref())
                .threshold(request.score_threshold)
                .aggregation(request.aggregation, request.weights.as_deref())
                .flag("with_vectors", request.with_vectors)
                .flag("with_payload", request.with_payload)
                .build()
        });

        if let Some(results) = self.cached_results(lookup.as_ref()).await {
            metrics::search(kind, true, started.elapsed());
            return Ok(SearchResponse {
                results,
                duration: started.elapsed(),
                cached: true,
            });
        }

        let results = if request.vectors.len() == 1 {
            let query = SearchQuery {
                vector: request.vectors[0].clone(),
                limit,
                filter: request.filter.clone(),
                score_threshold: request.score_threshold,
                with_vectors: request.with_vectors,
                with_payload: request.with_payload,
            };
            self.search_single(target, &query).await?
        } else {
            self.search_multi(target, request, limit).await?
        };

        self.store_results(target, lookup.as_ref(), &results).await;
        metrics::search(kind, false, started.elapsed());
        Ok(SearchResponse {
            results,
            duration: started.elapsed(),
            cached: false,
        })
    }

    async fn search_multi(
        &self,
        target: &Target,
        request: &SearchRequest,
        limit: u32,
    ) -> VectorResult<Vec<SearchResult>> {
        // Reject bad weights before any backend call
        if request.aggregation == Aggregation::Weighted {
            normalize_weights(request.weights.as_deref(), request.vectors.len())?;
        }

        let queries: Vec<SearchQuery> = request
            .vectors
            .iter()
            .map(|vector| SearchQuery {
                vector: vector.clone(),
                limit,
                filter: request.filter.clone(),
                score_threshold: None,
                with_vectors: request.with_vectors,
                with_payload: request.with_payload,
            })
            .collect();

        let outcomes: Vec<VectorResult<Vec<SearchResult>>> = stream::iter(queries)
            .map(|query| async move { self.search_single(target, &query).await })
            .buffered(self.config.max_concurrent_queries.max(1))
            .collect()
            .await;

        let sets = outcomes.into_iter().collect::<VectorResult<Vec<_>>>()?;
        let mut results = aggregate(
            sets,
            request.aggregation,
            request.weights.as_deref(),
            limit as usize,
        )?;
        apply_threshold(&mut results, request.score_threshold);
        Ok(results)
    }

    /// Points whose text field matches `request.text`, scored by the
    /// fraction of query terms they contain.
    async fn keyword_candidates(
        &self,
        target: &Target,
        request: &HybridRequest,
        limit: u32,
    ) -> VectorResult<Vec<SearchResult>> {
        let wanted = limit as usize * self.config.keyword_candidates_factor.max(1) as usize;
        let filter = request
            .filter
            .clone()
            .unwrap_or_default()
            .with_text(&request.text_field, &request.text);

        let mut candidates = Vec::new();
        let mut scanned = 0usize;
        let mut cursor = None;
        loop {
            let page = self
                .scroll(
                    target,
                    &ScrollRequest {
                        filter: Some(filter.clone()),
                        limit: (wanted - scanned).min(u32::MAX as usize) as u32,
                        cursor,
                        with_vectors: false,
                    },
                )
                .await?;

            if page.records.is_empty() {
                break;
            }
            scanned += page.records.len();

            for record in page.records {
                let score = payload_text(record.payload.as_ref(), &request.text_field)
                    .map(|text| keyword_score(text, &request.text))
                    .unwrap_or(0.0);
                if score > 0.0 {
                    candidates.push(SearchResult {
                        id: record.id,
                        score,
                        payload: record.payload,
                        vector: None,
                    });
                }
            }

            match page.next_cursor {
                Some(next) if scanned < wanted => cursor = Some(next),
                _ => break,
            }
        }
        Ok(candidates)
    }

    /// Cached hybrid search: vector and keyword sub-searches run
    /// concurrently and are blended with [`merge_hybrid`].
    pub async fn hybrid_search(
        &self,
        target: &Target,
        request: &HybridRequest,
    ) -> VectorResult<SearchResponse> {
        let started = Instant::now();
        validate_vectors(std::slice::from_ref(&request.vector))?;
        validate_threshold(request.score_threshold)?;
        if request.text.trim().is_empty() {
            return Err(VectorError::validation("hybrid search text must not be empty"));
        }

        let vector_weight = request.vector_weight.unwrap_or(self.config.vector_weight);
        let text_weight = request.text_weight.unwrap_or(self.config.text_weight);
        if [vector_weight, text_weight]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(VectorError::validation("hybrid weights must be finite and non-negative"));
        }

        let limit = self.effective_limit(request.limit);
        let lookup = self.lookup(target, |cache| {
            cache
                .key(target, "hybrid")
                .vector(&request.vector)
                .text(&request.text_field, &request.text)
                .limit(limit)
                .filter(request.filter.as_ref())
                .threshold(request.score_threshold)
                .weights(vector_weight, text_weight)
                .build()
        });

        if let Some(results) = self.cached_results(lookup.as_ref()).await {
            metrics::search("hybrid", true, started.elapsed());
            return Ok(SearchResponse {
                results,
                duration: started.elapsed(),
                cached: true,
            });
        }

        let vector_query = SearchQuery {
            vector: request.vector.clone(),
            limit,
            filter: request.filter.clone(),
            score_threshold: None,
            with_vectors: false,
            with_payload: true,
        };
        let (vector_results, keyword_results) = tokio::try_join!(
            self.search_single(target, &vector_query),
            self.keyword_candidates(target, request, limit),
        )?;

        debug!(
            target = %target,
            vector_hits = vector_results.len(),
            keyword_hits = keyword_results.len(),
            "Merging hybrid results"
        );

        let mut results = merge_hybrid(
            vector_results,
            keyword_results,
            vector_weight,
            text_weight,
            limit as usize,
        );
        apply_threshold(&mut results, request.score_threshold);

        self.store_results(target, lookup.as_ref(), &results).await;
        metrics::search("hybrid", false, started.elapsed());
        Ok(SearchResponse {
            results,
            duration: started.elapsed(),
            cached: false,
        })
    }
}
