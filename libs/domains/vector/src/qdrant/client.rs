use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    self, CreateCollectionBuilder, DeletePointsBuilder, GetPointsBuilder, PointId, PointStruct,
    ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::QdrantConfig;
use super::convert::{
    extract_vector, from_qdrant_distance, from_qdrant_status, payload_to_qdrant, point_id_to_uuid,
    qdrant_to_payload, to_qdrant_distance, to_qdrant_filter, uuid_to_point_id,
};
use crate::backend::{BackendConnection, BackendQuery, ConnectionFactory, ScrollRequest};
use crate::error::{VectorError, VectorResult};
use crate::models::{
    CollectionInfo, CollectionSpec, ScrollPage, SearchResult, Target, VectorRecord,
};

/// gRPC status codes after which a session is not handed out again.
const BROKEN_CODES: &[&str] = &["Unavailable", "Cancelled", "Unknown", "client"];

/// A Qdrant client bound to one target, owned by the pool.
pub struct QdrantConnection {
    client: Qdrant,
    target: Target,
    broken: AtomicBool,
}

impl QdrantConnection {
    pub fn from_client(client: Qdrant, target: Target) -> Self {
        Self {
            client,
            target,
            broken: AtomicBool::new(false),
        }
    }

    /// Convert a client error, marking the session broken on transport failures.
    fn track<T>(&self, result: Result<T, qdrant_client::QdrantError>) -> VectorResult<T> {
        result.map_err(|e| {
            let err = VectorError::from(e);
            if let VectorError::Backend { code, .. } = &err {
                if BROKEN_CODES.contains(&code.as_str()) {
                    debug!(target = %self.target, code = %code, "Marking connection broken");
                    self.broken.store(true, Ordering::Relaxed);
                }
            }
            err
        })
    }
}

#[async_trait]
impl BackendConnection for QdrantConnection {
    fn is_open(&self) -> bool {
        !self.broken.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> VectorResult<()> {
        self.track(self.client.health_check().await)?;
        Ok(())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> VectorResult<()> {
        let mut builder = CreateCollectionBuilder::new(&spec.name)
            .vectors_config(VectorParamsBuilder::new(
                spec.vector_size as u64,
                to_qdrant_distance(spec.distance),
            ))
            .on_disk_payload(spec.on_disk_payload);

        if let Some(hnsw) = &spec.hnsw {
            let hnsw_config = qdrant::HnswConfigDiff {
                m: hnsw.m.map(u64::from),
                ef_construct: hnsw.ef_construct.map(u64::from),
                full_scan_threshold: hnsw.full_scan_threshold.map(u64::from),
                ..Default::default()
            };
            builder = builder.hnsw_config(hnsw_config);
        }
        if let Some(shards) = spec.shard_number {
            builder = builder.shard_number(shards);
        }
        if let Some(replicas) = spec.replication_factor {
            builder = builder.replication_factor(replicas);
        }

        self.track(self.client.create_collection(builder).await)?;
        info!(collection = %spec.name, size = spec.vector_size, "Collection created");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> VectorResult<bool> {
        if !self.track(self.client.collection_exists(name).await)? {
            return Ok(false);
        }
        let response = self.track(self.client.delete_collection(name).await)?;
        Ok(response.result)
    }

    async fn list_collections(&self) -> VectorResult<Vec<String>> {
        let response = self.track(self.client.list_collections().await)?;
        let mut names: Vec<String> = response
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn collection_info(&self, name: &str) -> VectorResult<Option<CollectionInfo>> {
        if !self.track(self.client.collection_exists(name).await)? {
            return Ok(None);
        }

        let response = self.track(self.client.collection_info(name).await)?;
        let result = response
            .result
            .ok_or_else(|| VectorError::Internal("Collection info missing result".to_string()))?;

        let params = result.config.as_ref().and_then(|c| c.params.as_ref());
        let (vector_size, distance) = match params
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|vc| vc.config.as_ref())
        {
            Some(qdrant::vectors_config::Config::Params(p)) => {
                (p.size as u32, from_qdrant_distance(p.distance()))
            }
            Some(qdrant::vectors_config::Config::ParamsMap(map)) => map
                .map
                .values()
                .next()
                .map(|p| (p.size as u32, from_qdrant_distance(p.distance())))
                .unwrap_or((0, Default::default())),
            None => (0, Default::default()),
        };

        let mut spec = CollectionSpec::new(name, vector_size).with_distance(distance);
        if let Some(params) = params {
            spec.shard_number = Some(params.shard_number);
            spec.replication_factor = params.replication_factor;
            spec.on_disk_payload = params.on_disk_payload;
        }

        Ok(Some(CollectionInfo {
            spec,
            points_count: result.points_count.unwrap_or_default(),
            indexed_vectors_count: result.indexed_vectors_count.unwrap_or_default(),
            segments_count: result.segments_count,
            status: from_qdrant_status(result.status()),
        }))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> VectorResult<()> {
        let points = records
            .iter()
            .map(|r| {
                Ok(PointStruct::new(
                    uuid_to_point_id(r.id),
                    r.embedding.clone(),
                    payload_to_qdrant(r.payload.as_ref())?,
                ))
            })
            .collect::<VectorResult<Vec<_>>>()?;

        let builder = UpsertPointsBuilder::new(collection, points).wait(true);
        self.track(self.client.upsert_points(builder).await)?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &BackendQuery,
    ) -> VectorResult<Vec<SearchResult>> {
        let mut builder = SearchPointsBuilder::new(collection, query.vector.clone(), query.limit)
            .params(SearchParamsBuilder::default().hnsw_ef(query.ef))
            .with_payload(query.with_payload)
            .with_vectors(query.with_vectors);

        if query.offset > 0 {
            builder = builder.offset(query.offset);
        }
        if let Some(threshold) = query.score_threshold {
            builder = builder.score_threshold(threshold);
        }
        if let Some(filter) = query.filter.as_ref().filter(|f| !f.is_empty()) {
            builder = builder.filter(to_qdrant_filter(filter)?);
        }

        let response = self.track(self.client.search_points(builder).await)?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(SearchResult {
                    id: point_id_to_uuid(point.id.as_ref())?,
                    score: point.score,
                    vector: extract_vector(point.vectors.as_ref()),
                    payload: qdrant_to_payload(point.payload),
                })
            })
            .collect()
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[Uuid],
        with_vectors: bool,
    ) -> VectorResult<Vec<VectorRecord>> {
        let point_ids: Vec<PointId> = ids.iter().copied().map(uuid_to_point_id).collect();
        let builder = GetPointsBuilder::new(collection, point_ids)
            .with_vectors(with_vectors)
            .with_payload(true);

        let response = self.track(self.client.get_points(builder).await)?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(VectorRecord {
                    id: point_id_to_uuid(point.id.as_ref())?,
                    embedding: extract_vector(point.vectors.as_ref()).unwrap_or_default(),
                    payload: qdrant_to_payload(point.payload),
                })
            })
            .collect()
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> VectorResult<u64> {
        let point_ids: Vec<PointId> = ids.iter().copied().map(uuid_to_point_id).collect();
        let count = point_ids.len() as u64;

        let builder = DeletePointsBuilder::new(collection)
            .points(point_ids)
            .wait(true);
        self.track(self.client.delete_points(builder).await)?;
        Ok(count)
    }

    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> VectorResult<ScrollPage> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .limit(request.limit)
            .with_payload(true)
            .with_vectors(request.with_vectors);

        if let Some(filter) = request.filter.as_ref().filter(|f| !f.is_empty()) {
            builder = builder.filter(to_qdrant_filter(filter)?);
        }
        if let Some(cursor) = request.cursor {
            builder = builder.offset(uuid_to_point_id(cursor));
        }

        let response = self.track(self.client.scroll(builder).await)?;

        let records = response
            .result
            .into_iter()
            .map(|point| {
                Ok(VectorRecord {
                    id: point_id_to_uuid(point.id.as_ref())?,
                    embedding: extract_vector(point.vectors.as_ref()).unwrap_or_default(),
                    payload: qdrant_to_payload(point.payload),
                })
            })
            .collect::<VectorResult<Vec<_>>>()?;

        let next_cursor = response
            .next_page_offset
            .as_ref()
            .map(|p| point_id_to_uuid(Some(p)))
            .transpose()?;

        Ok(ScrollPage {
            records,
            next_cursor,
        })
    }
}

/// Opens a [`QdrantConnection`] per pool slot.
///
/// `Target::server` is used as the gRPC URL; the API key and request timeout
/// come from [`QdrantConfig`].
pub struct QdrantConnectionFactory {
    config: QdrantConfig,
}

impl QdrantConnectionFactory {
    pub fn new(config: QdrantConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QdrantConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for QdrantConnectionFactory {
    async fn connect(&self, target: &Target) -> VectorResult<Box<dyn BackendConnection>> {
        let mut builder = Qdrant::from_url(&target.server).timeout(self.config.timeout());

        if let Some(api_key) = &self.config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorError::backend_unreachable(target, e.to_string()))?;

        // The channel is lazy, so probe once before handing the session out.
        client
            .health_check()
            .await
            .map_err(|e| VectorError::backend_unreachable(target, e.to_string()))?;

        debug!(target = %target, "Opened Qdrant connection");
        Ok(Box::new(QdrantConnection::from_client(
            client,
            target.clone(),
        )))
    }
}
