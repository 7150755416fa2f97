use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{VectorError, VectorResult};

/// Reserved collection name for server-level administrative calls.
pub const SERVER_SCOPE: &str = "_server";

/// Longest collection name accepted.
pub const MAX_COLLECTION_NAME_LEN: usize = 255;

/// One logical backend destination: a collection bound to a server.
///
/// Pools and cache namespaces are partitioned by target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub server: String,
    pub collection: String,
}

impl Target {
    /// Build a target for a user collection, validating the name.
    pub fn new(server: impl Into<String>, collection: impl Into<String>) -> VectorResult<Self> {
        let collection = collection.into();
        validate_collection_name(&collection)?;
        Ok(Self {
            server: server.into(),
            collection,
        })
    }

    /// Target used for calls that are not bound to a collection
    /// (create/delete/list collections).
    pub fn server_scope(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            collection: SERVER_SCOPE.to_string(),
        }
    }

    pub fn is_server_scope(&self) -> bool {
        self.collection == SERVER_SCOPE
    }

    /// Stable, glob-safe namespace for cache keys belonging to this target.
    ///
    /// Ends with `:` so no namespace is a prefix of another.
    pub fn cache_namespace(&self, prefix: &str) -> String {
        let digest = Sha256::digest(self.server.as_bytes());
        let server_hash: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}:{}:{}:", prefix, server_hash, self.collection)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.collection)
    }
}

/// Collection names: `[A-Za-z0-9][A-Za-z0-9_-]{0,254}`.
pub fn validate_collection_name(name: &str) -> VectorResult<()> {
    if name.is_empty() {
        return Err(VectorError::validation("collection name must not be empty"));
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(VectorError::validation(format!(
            "collection name exceeds {} characters",
            MAX_COLLECTION_NAME_LEN
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !first_ok || !rest_ok {
        return Err(VectorError::validation(format!(
            "malformed collection name '{}'",
            name
        )));
    }
    Ok(())
}

/// Distance metric for similarity calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
    Manhattan,
}

/// HNSW index configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: Option<u32>,
    pub ef_construct: Option<u32>,
    pub full_scan_threshold: Option<u32>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: Some(16),
            ef_construct: Some(100),
            full_scan_threshold: None,
        }
    }
}

/// Schema of a collection. Immutable once created; changing it means
/// replacing the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub vector_size: u32,
    pub distance: DistanceMetric,
    pub hnsw: Option<HnswConfig>,
    pub shard_number: Option<u32>,
    pub replication_factor: Option<u32>,
    pub on_disk_payload: bool,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, vector_size: u32) -> Self {
        Self {
            name: name.into(),
            vector_size,
            distance: DistanceMetric::default(),
            hnsw: None,
            shard_number: None,
            replication_factor: None,
            on_disk_payload: false,
        }
    }

    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_hnsw(mut self, hnsw: HnswConfig) -> Self {
        self.hnsw = Some(hnsw);
        self
    }

    pub fn with_shards(mut self, shard_number: u32, replication_factor: u32) -> Self {
        self.shard_number = Some(shard_number);
        self.replication_factor = Some(replication_factor);
        self
    }

    pub fn validate(&self) -> VectorResult<()> {
        validate_collection_name(&self.name)?;
        if self.vector_size == 0 {
            return Err(VectorError::validation("vector_size must be positive"));
        }
        if self.shard_number == Some(0) || self.replication_factor == Some(0) {
            return Err(VectorError::validation(
                "shard_number and replication_factor must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionStatus {
    Green,
    Yellow,
    Red,
    Grey,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Green => "green",
            CollectionStatus::Yellow => "yellow",
            CollectionStatus::Red => "red",
            CollectionStatus::Grey => "grey",
        }
    }
}

/// Collection information as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub spec: CollectionSpec,
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub segments_count: u64,
    pub status: CollectionStatus,
}

/// A stored point: embedding plus optional JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub payload: Option<serde_json::Value>,
}

impl VectorRecord {
    pub fn new(id: Uuid, embedding: Vec<f32>) -> Self {
        Self {
            id,
            embedding,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Checks one embedding against the collection dimension.
pub fn validate_embedding(embedding: &[f32], vector_size: u32) -> VectorResult<()> {
    if embedding.len() != vector_size as usize {
        return Err(VectorError::validation(format!(
            "dimension mismatch: expected {}, got {}",
            vector_size,
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(VectorError::validation("embedding contains non-finite values"));
    }
    Ok(())
}

/// Full-text condition on a payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub field: String,
    pub text: String,
}

/// Payload filter. Maps are ordered so fingerprints are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Payload key must equal the value
    pub must: BTreeMap<String, serde_json::Value>,
    /// Payload key must not equal the value
    pub must_not: BTreeMap<String, serde_json::Value>,
    pub text: Option<TextMatch>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.must.insert(key.into(), value);
        self
    }

    pub fn must_not(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.must_not.insert(key.into(), value);
        self
    }

    pub fn with_text(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.text = Some(TextMatch {
            field: field.into(),
            text: text.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty() && self.text.is_none()
    }
}

/// How per-vector result sets are combined in a multi-vector search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregation {
    #[default]
    None,
    Average,
    Max,
    Weighted,
}

/// Single-vector query as handed to the facade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub limit: u32,
    pub filter: Option<SearchFilter>,
    pub score_threshold: Option<f32>,
    pub with_vectors: bool,
    pub with_payload: bool,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, limit: u32) -> Self {
        Self {
            vector,
            limit,
            filter: None,
            score_threshold: None,
            with_vectors: false,
            with_payload: true,
        }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }
}

impl From<SearchQuery> for SearchRequest {
    fn from(query: SearchQuery) -> Self {
        Self {
            vectors: vec![query.vector],
            limit: query.limit,
            filter: query.filter,
            score_threshold: query.score_threshold,
            aggregation: Aggregation::None,
            weights: None,
            with_vectors: query.with_vectors,
            with_payload: query.with_payload,
        }
    }
}

/// Search request over one or more query vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub vectors: Vec<Vec<f32>>,
    pub limit: u32,
    pub filter: Option<SearchFilter>,
    pub score_threshold: Option<f32>,
    pub aggregation: Aggregation,
    pub weights: Option<Vec<f32>>,
    pub with_vectors: bool,
    pub with_payload: bool,
}

impl SearchRequest {
    pub fn multi(vectors: Vec<Vec<f32>>, limit: u32, aggregation: Aggregation) -> Self {
        Self {
            vectors,
            limit,
            filter: None,
            score_threshold: None,
            aggregation,
            weights: None,
            with_vectors: false,
            with_payload: true,
        }
    }

    pub fn with_weights(mut self, weights: Vec<f32>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }
}

/// Vector similarity combined with keyword relevance over a payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridRequest {
    pub vector: Vec<f32>,
    pub text: String,
    pub text_field: String,
    pub limit: u32,
    pub filter: Option<SearchFilter>,
    pub score_threshold: Option<f32>,
    /// Falls back to the configured default when `None`
    pub vector_weight: Option<f32>,
    /// Falls back to the configured default when `None`
    pub text_weight: Option<f32>,
}

impl HybridRequest {
    pub fn new(vector: Vec<f32>, text: impl Into<String>, limit: u32) -> Self {
        Self {
            vector,
            text: text.into(),
            text_field: "text".to_string(),
            limit,
            filter: None,
            score_threshold: None,
            vector_weight: None,
            text_weight: None,
        }
    }

    pub fn with_weights(mut self, vector_weight: f32, text_weight: f32) -> Self {
        self.vector_weight = Some(vector_weight);
        self.text_weight = Some(text_weight);
        self
    }

    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }
}

/// Search result, ordered by score descending in every returned list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub score: f32,
    pub payload: Option<serde_json::Value>,
    pub vector: Option<Vec<f32>>,
}

impl SearchResult {
    pub fn new(id: Uuid, score: f32) -> Self {
        Self {
            id,
            score,
            payload: None,
            vector: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// One page of a scroll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollPage {
    pub records: Vec<VectorRecord>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    Insert,
    Update,
    Delete,
}

impl BatchOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOperation::Insert => "insert",
            BatchOperation::Update => "update",
            BatchOperation::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchMode {
    Sequential,
    #[default]
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchItems {
    Records(Vec<VectorRecord>),
    Ids(Vec<Uuid>),
}

impl BatchItems {
    pub fn len(&self) -> usize {
        match self {
            BatchItems::Records(records) => records.len(),
            BatchItems::Ids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request-scoped bulk write
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    pub operation: BatchOperation,
    pub target: Target,
    pub items: BatchItems,
    /// Falls back to the configured chunk size when `None`
    pub chunk_size: Option<usize>,
    pub mode: BatchMode,
}

impl BatchJob {
    pub fn upsert(target: Target, records: Vec<VectorRecord>) -> Self {
        Self {
            operation: BatchOperation::Insert,
            target,
            items: BatchItems::Records(records),
            chunk_size: None,
            mode: BatchMode::default(),
        }
    }

    /// Replace existing points; written like an upsert.
    pub fn update(target: Target, records: Vec<VectorRecord>) -> Self {
        Self {
            operation: BatchOperation::Update,
            ..Self::upsert(target, records)
        }
    }

    pub fn delete(target: Target, ids: Vec<Uuid>) -> Self {
        Self {
            operation: BatchOperation::Delete,
            target,
            items: BatchItems::Ids(ids),
            chunk_size: None,
            mode: BatchMode::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Outcome of one chunk of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub index: usize,
    pub size: usize,
    pub succeeded: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Items written (or deleted) successfully
    pub inserted: usize,
    /// Items in chunks that failed after retries
    pub errors: usize,
    /// Sorted by chunk index
    pub per_chunk: Vec<ChunkResult>,
    pub duration: Duration,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.inserted + self.errors
    }

    pub fn is_complete(&self) -> bool {
        self.errors == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub inserted_count: usize,
    pub error_count: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub duration: Duration,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}
