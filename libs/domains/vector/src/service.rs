use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::backend::{ConnectionFactory, ScrollRequest};
use crate::batch::BatchProcessor;
use crate::cache::{CacheLayer, CacheStats, CacheStore};
use crate::config::EngineConfig;
use crate::error::{VectorError, VectorResult};
use crate::models::{
    BatchJob, BatchResult, CollectionInfo, CollectionSpec, DeleteResponse, HybridRequest,
    InsertResponse, ScrollPage, SearchFilter, SearchQuery, SearchRequest, SearchResponse, Target,
    UpdateResponse, VectorRecord, validate_embedding,
};
use crate::pool::{PoolRegistry, PoolStats};
use crate::retry::{RetryPolicy, retry_with_policy};
use crate::search::SearchEngine;

/// Entry point for protocol handlers.
///
/// Composes the pool, batch processor, search engine and cache for one
/// backend server. Writes invalidate the affected collection's cache
/// namespace; searches read through it.
pub struct VectorService {
    server: String,
    pool: Arc<PoolRegistry>,
    cache: Arc<CacheLayer>,
    batch: BatchProcessor,
    search: SearchEngine,
    retry: RetryPolicy,
    schemas: RwLock<HashMap<String, CollectionSpec>>,
}

impl VectorService {
    pub fn new(
        server: impl Into<String>,
        config: EngineConfig,
        factory: Arc<dyn ConnectionFactory>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let pool = Arc::new(PoolRegistry::new(config.pool.clone(), factory));
        let cache = Arc::new(CacheLayer::new(store, config.cache.clone()));
        Self::from_parts(server, config, pool, cache)
    }

    /// Assemble from an existing pool and cache, e.g. to share them or to
    /// inject a test clock.
    pub fn from_parts(
        server: impl Into<String>,
        config: EngineConfig,
        pool: Arc<PoolRegistry>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        let retry = RetryPolicy::linear(config.search.max_retries, config.search.retry_delay)
            .with_attempt_timeout(config.search.query_timeout);
        let batch = BatchProcessor::new(Arc::clone(&pool), config.batch).with_cache(Arc::clone(&cache));
        let search = SearchEngine::new(Arc::clone(&pool), config.search).with_cache(Arc::clone(&cache));

        Self {
            server: server.into(),
            pool,
            cache,
            batch,
            search,
            retry,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn pool(&self) -> &Arc<PoolRegistry> {
        &self.pool
    }

    fn target(&self, collection: &str) -> VectorResult<Target> {
        Target::new(self.server.clone(), collection)
    }

    fn admin_target(&self) -> Target {
        Target::server_scope(self.server.clone())
    }

    // ===== Schema registry =====

    fn known_schema(&self, collection: &str) -> Option<CollectionSpec> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    fn remember_schema(&self, spec: CollectionSpec) {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.name.clone(), spec);
    }

    fn forget_schema(&self, collection: &str) {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(collection);
    }

    /// Schema of `collection`, fetched from the backend on first use.
    pub async fn schema(&self, collection: &str) -> VectorResult<CollectionSpec> {
        if let Some(spec) = self.known_schema(collection) {
            return Ok(spec);
        }
        Ok(self.get_collection_info(collection).await?.spec)
    }

    async fn check_dimensions<'a>(
        &self,
        collection: &str,
        vectors: impl IntoIterator<Item = &'a [f32]>,
    ) -> VectorResult<CollectionSpec> {
        let spec = self.schema(collection).await?;
        for vector in vectors {
            validate_embedding(vector, spec.vector_size)?;
        }
        Ok(spec)
    }

    // ===== Collection Management =====

    #[instrument(skip(self, spec), fields(collection = %spec.name, vector_size = spec.vector_size))]
    pub async fn create_collection(&self, spec: CollectionSpec) -> VectorResult<()> {
        spec.validate()?;
        let target = self.target(&spec.name)?;
        let admin = &self.admin_target();
        let spec_ref = &spec;

        retry_with_policy(&self.retry, "create_collection", |_| async move {
            let conn = self.pool.acquire(admin).await?;
            conn.create_collection(spec_ref).await
        })
        .await?;

        self.cache.invalidate(&target).await;
        info!(collection = %spec.name, "Created collection");
        self.remember_schema(spec);
        Ok(())
    }

    /// Drop a collection with its schema, cache namespace and pool.
    #[instrument(skip(self))]
    pub async fn delete_collection(&self, collection: &str) -> VectorResult<bool> {
        let target = self.target(collection)?;
        let admin = &self.admin_target();

        let deleted = retry_with_policy(&self.retry, "delete_collection", |_| async move {
            let conn = self.pool.acquire(admin).await?;
            conn.delete_collection(collection).await
        })
        .await?;

        self.forget_schema(collection);
        self.cache.invalidate(&target).await;
        self.pool.remove_target(&target);
        info!(collection, deleted, "Deleted collection");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    pub async fn list_collections(&self) -> VectorResult<Vec<String>> {
        let admin = &self.admin_target();
        let mut names = retry_with_policy(&self.retry, "list_collections", |_| async move {
            let conn = self.pool.acquire(admin).await?;
            conn.list_collections().await
        })
        .await?;
        names.sort();
        Ok(names)
    }

    /// Collection info, served from the metadata cache when fresh.
    #[instrument(skip(self))]
    pub async fn get_collection_info(&self, collection: &str) -> VectorResult<CollectionInfo> {
        let target = self.target(collection)?;
        let key = self.cache.metadata_key(&target);
        let generation = self.cache.generation(&target);

        if let Some(info) = self.cache.get::<CollectionInfo>(&key).await {
            self.remember_schema(info.spec.clone());
            return Ok(info);
        }

        let admin = &self.admin_target();
        let info = retry_with_policy(&self.retry, "collection_info", |_| async move {
            let conn = self.pool.acquire(admin).await?;
            conn.collection_info(collection).await
        })
        .await?
        .ok_or_else(|| VectorError::CollectionNotFound(collection.to_string()))?;

        self.cache
            .set_if_current(
                &target,
                generation,
                &key,
                &info,
                Some(self.cache.config().metadata_ttl),
            )
            .await;
        self.remember_schema(info.spec.clone());
        Ok(info)
    }

    // ===== Vector Operations =====

    async fn check_records(&self, collection: &str, records: &[VectorRecord]) -> VectorResult<()> {
        self.check_dimensions(collection, records.iter().map(|r| r.embedding.as_slice()))
            .await?;
        if let Some(record) = records
            .iter()
            .find(|r| r.payload.as_ref().is_some_and(|p| !p.is_object()))
        {
            return Err(VectorError::validation(format!(
                "payload of {} must be a JSON object",
                record.id
            )));
        }
        Ok(())
    }

    /// Chunked insert. Dimensions are checked locally first; a mismatch
    /// rejects the whole request without touching the backend.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn insert_vectors(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
        batch_size: Option<usize>,
    ) -> VectorResult<InsertResponse> {
        let started = Instant::now();
        let target = self.target(collection)?;
        self.check_records(collection, &records).await?;

        let mut job = BatchJob::upsert(target, records);
        if let Some(size) = batch_size {
            job = job.with_chunk_size(size);
        }
        let result = self.batch.run(job).await;

        Ok(InsertResponse {
            inserted_count: result.inserted,
            error_count: result.errors,
            duration: started.elapsed(),
        })
    }

    #[instrument(skip(self, query), fields(limit = query.limit))]
    pub async fn search(&self, collection: &str, query: SearchQuery) -> VectorResult<SearchResponse> {
        let target = self.target(collection)?;
        self.check_dimensions(collection, [query.vector.as_slice()]).await?;
        self.search.search(&target, &query.into()).await
    }

    #[instrument(skip(self, request), fields(vectors = request.vectors.len(), aggregation = ?request.aggregation))]
    pub async fn search_multi(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> VectorResult<SearchResponse> {
        let target = self.target(collection)?;
        self.check_dimensions(collection, request.vectors.iter().map(Vec::as_slice))
            .await?;
        self.search.search(&target, &request).await
    }

    #[instrument(skip(self, request), fields(limit = request.limit))]
    pub async fn hybrid_search(
        &self,
        collection: &str,
        request: HybridRequest,
    ) -> VectorResult<SearchResponse> {
        let target = self.target(collection)?;
        self.check_dimensions(collection, [request.vector.as_slice()]).await?;
        self.search.hybrid_search(&target, &request).await
    }

    async fn retrieve_one(&self, target: &Target, id: Uuid) -> VectorResult<Option<VectorRecord>> {
        let ids = [id];
        let ids = &ids;
        let records = retry_with_policy(&self.retry, "retrieve", |_| async move {
            let conn = self.pool.acquire(target).await?;
            conn.retrieve(&target.collection, ids, true).await
        })
        .await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    /// Replace the embedding and/or shallow-merge the payload of one point.
    ///
    /// A point that does not exist yields `updated = false`.
    #[instrument(skip(self, vector, payload), fields(id = %id))]
    pub async fn update_vector(
        &self,
        collection: &str,
        id: Uuid,
        vector: Option<Vec<f32>>,
        payload: Option<Value>,
    ) -> VectorResult<UpdateResponse> {
        let target = self.target(collection)?;
        if vector.is_none() && payload.is_none() {
            return Err(VectorError::validation("update needs a vector or a payload"));
        }
        if let Some(vector) = &vector {
            self.check_dimensions(collection, [vector.as_slice()]).await?;
        }
        let patch = match payload {
            Some(Value::Object(patch)) => Some(patch),
            Some(_) => return Err(VectorError::validation("payload must be a JSON object")),
            None => None,
        };

        let Some(mut record) = self.retrieve_one(&target, id).await? else {
            debug!(id = %id, "Point not found, nothing to update");
            return Ok(UpdateResponse { updated: false });
        };

        if let Some(vector) = vector {
            record.embedding = vector;
        }
        if let Some(patch) = patch {
            let mut merged = match record.payload.take() {
                Some(Value::Object(existing)) => existing,
                _ => serde_json::Map::new(),
            };
            merged.extend(patch);
            record.payload = Some(Value::Object(merged));
        }

        let target_ref = &target;
        let record = &record;
        retry_with_policy(&self.retry, "update_vector", |_| async move {
            let conn = self.pool.acquire(target_ref).await?;
            conn.upsert(&target_ref.collection, std::slice::from_ref(record)).await
        })
        .await?;

        self.cache.invalidate(&target).await;
        Ok(UpdateResponse { updated: true })
    }

    /// Chunked replacement of whole points, embedding and payload.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn update_vectors(
        &self,
        collection: &str,
        records: Vec<VectorRecord>,
        batch_size: Option<usize>,
    ) -> VectorResult<BatchResult> {
        let target = self.target(collection)?;
        self.check_records(collection, &records).await?;

        let mut job = BatchJob::update(target, records);
        if let Some(size) = batch_size {
            job = job.with_chunk_size(size);
        }
        Ok(self.batch.run(job).await)
    }

    /// One point with its embedding and payload.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn get_vector(&self, collection: &str, id: Uuid) -> VectorResult<VectorRecord> {
        let target = self.target(collection)?;
        self.retrieve_one(&target, id)
            .await?
            .ok_or(VectorError::VectorNotFound(id))
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_vector(&self, collection: &str, id: Uuid) -> VectorResult<DeleteResponse> {
        let target = self.target(collection)?;
        if self.retrieve_one(&target, id).await?.is_none() {
            return Ok(DeleteResponse { deleted: false });
        }

        let ids = [id];
        let (target_ref, ids) = (&target, &ids);
        retry_with_policy(&self.retry, "delete_vector", |_| async move {
            let conn = self.pool.acquire(target_ref).await?;
            conn.delete(&target_ref.collection, ids).await
        })
        .await?;

        self.cache.invalidate(&target).await;
        Ok(DeleteResponse { deleted: true })
    }

    /// Chunked delete through the batch processor.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn delete_vectors(
        &self,
        collection: &str,
        ids: Vec<Uuid>,
        batch_size: Option<usize>,
    ) -> VectorResult<BatchResult> {
        let mut job = BatchJob::delete(self.target(collection)?, ids);
        if let Some(size) = batch_size {
            job = job.with_chunk_size(size);
        }
        Ok(self.batch.run(job).await)
    }

    /// One page of points, optionally filtered. Pass the returned cursor to
    /// continue.
    #[instrument(skip(self, filter))]
    pub async fn scroll(
        &self,
        collection: &str,
        filter: Option<SearchFilter>,
        limit: u32,
        cursor: Option<Uuid>,
    ) -> VectorResult<ScrollPage> {
        let target = self.target(collection)?;
        let request = ScrollRequest {
            filter: filter.filter(|f| !f.is_empty()),
            limit: self.search.effective_limit(limit),
            cursor,
            with_vectors: false,
        };
        self.search.scroll(&target, &request).await
    }

    // ===== Introspection =====

    pub fn pool_status(&self, collection: &str) -> VectorResult<Option<PoolStats>> {
        Ok(self.pool.status(&self.target(collection)?))
    }

    pub fn pool_statuses(&self) -> Vec<PoolStats> {
        self.pool.statuses()
    }

    pub async fn scale_pool(&self, collection: &str, desired: usize) -> VectorResult<PoolStats> {
        self.pool.scale(&self.target(collection)?, desired).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the pool's idle reaper and health prober.
    pub fn spawn_maintenance(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.pool.spawn_maintenance(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackendConnection, MockConnectionFactory};
    use crate::cache::MemoryCacheStore;
    use crate::models::{CollectionStatus, DistanceMetric};
    use serde_json::json;
    use std::sync::Mutex;

    fn info(name: &str, size: u32) -> CollectionInfo {
        CollectionInfo {
            spec: CollectionSpec::new(name, size),
            points_count: 0,
            indexed_vectors_count: 0,
            segments_count: 1,
            status: CollectionStatus::Green,
        }
    }

    fn service(factory: MockConnectionFactory) -> VectorService {
        VectorService::new(
            "http://qdrant:6334",
            EngineConfig::default(),
            Arc::new(factory),
            Arc::new(MemoryCacheStore::new()),
        )
    }

    #[tokio::test]
    async fn test_dimension_mismatch_never_reaches_backend() {
        let mut factory = MockConnectionFactory::new();
        factory.expect_connect().times(1).returning(|_| {
            let mut conn = MockBackendConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_collection_info()
                .times(1)
                .returning(|name| Ok(Some(info(name, 3))));
            conn.expect_upsert().never();
            Ok(Box::new(conn))
        });
        let service = service(factory);

        let records = vec![
            VectorRecord::new(Uuid::from_u128(1), vec![0.1, 0.2, 0.3]),
            VectorRecord::new(Uuid::from_u128(2), vec![0.1, 0.2]),
        ];
        let err = service.insert_vectors("docs", records, None).await.unwrap_err();
        assert_eq!(err.kind(), "validation");

        // Schema is remembered, no second info call
        let err = service
            .search("docs", SearchQuery::new(vec![0.1], 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_malformed_collection_name_is_rejected() {
        let service = service(MockConnectionFactory::new());
        let err = service
            .insert_vectors("bad name!", Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(service.get_collection_info("_server").await.is_err());
    }

    #[tokio::test]
    async fn test_create_collection_registers_schema() {
        let mut factory = MockConnectionFactory::new();
        factory.expect_connect().returning(|_| {
            let mut conn = MockBackendConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_create_collection().times(1).returning(|_| Ok(()));
            conn.expect_collection_info().never();
            Ok(Box::new(conn))
        });
        let service = service(factory);

        let spec = CollectionSpec::new("docs", 4).with_distance(DistanceMetric::DotProduct);
        service.create_collection(spec.clone()).await.unwrap();
        assert_eq!(service.schema("docs").await.unwrap(), spec);
    }

    #[tokio::test]
    async fn test_update_merges_payload() {
        let stored: Arc<Mutex<Vec<VectorRecord>>> = Default::default();
        let stored_clone = stored.clone();

        let mut factory = MockConnectionFactory::new();
        factory.expect_connect().returning(move |_| {
            let stored = stored_clone.clone();
            let mut conn = MockBackendConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_collection_info()
                .returning(|name| Ok(Some(info(name, 2))));
            conn.expect_retrieve().returning(|_, ids, _| {
                Ok(ids
                    .iter()
                    .filter(|id| **id == Uuid::from_u128(1))
                    .map(|id| {
                        VectorRecord::new(*id, vec![1.0, 0.0])
                            .with_payload(json!({"title": "old", "lang": "en"}))
                    })
                    .collect())
            });
            conn.expect_upsert().returning(move |_, records| {
                stored.lock().unwrap().extend_from_slice(records);
                Ok(())
            });
            Ok(Box::new(conn))
        });
        let service = service(factory);

        let response = service
            .update_vector("docs", Uuid::from_u128(1), None, Some(json!({"title": "new"})))
            .await
            .unwrap();
        assert!(response.updated);

        let written = stored.lock().unwrap()[0].clone();
        assert_eq!(written.embedding, vec![1.0, 0.0]);
        assert_eq!(written.payload, Some(json!({"title": "new", "lang": "en"})));

        let missing = service
            .update_vector("docs", Uuid::from_u128(9), Some(vec![0.0, 1.0]), None)
            .await
            .unwrap();
        assert!(!missing.updated);

        let err = service
            .update_vector("docs", Uuid::from_u128(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_collection_info_is_cached() {
        let mut factory = MockConnectionFactory::new();
        factory.expect_connect().returning(|_| {
            let mut conn = MockBackendConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_collection_info()
                .times(1)
                .returning(|name| Ok(Some(info(name, 8))));
            Ok(Box::new(conn))
        });
        let service = service(factory);

        let first = service.get_collection_info("docs").await.unwrap();
        let second = service.get_collection_info("docs").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let mut factory = MockConnectionFactory::new();
        factory.expect_connect().returning(|_| {
            let mut conn = MockBackendConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_collection_info().returning(|_| Ok(None));
            Ok(Box::new(conn))
        });
        let service = service(factory);

        let err = service.get_collection_info("ghost").await.unwrap_err();
        assert!(matches!(err, VectorError::CollectionNotFound(name) if name == "ghost"));
    }
}
