//! Vector Domain Library
//!
//! Client-side engine for a remote vector store: pooled connections per
//! target, chunked batch writes with retry, tuned and fanned-out similarity
//! search, and a fail-open result cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              VectorService               │  ← entry point for handlers
//! └───────┬───────────────┬──────────────┬───┘
//!         │               │              │
//! ┌───────▼───────┐ ┌─────▼────────┐ ┌───▼────────┐
//! │ BatchProcessor│ │ SearchEngine │ │ CacheLayer │──▶ CacheStore
//! └───────┬───────┘ └─────┬────────┘ └────────────┘   (Redis / memory)
//!         │               │
//! ┌───────▼───────────────▼──┐
//! │       PoolRegistry       │  ← one pool per Target, LIFO idle reuse
//! └────────────┬─────────────┘
//!              │ ConnectionFactory / BackendConnection
//! ┌────────────▼─────────────┐
//! │          Qdrant          │
//! └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use core_config::FromEnv;
//! use domain_vector::{
//!     CollectionSpec, EngineConfig, MemoryCacheStore, QdrantConfig, QdrantConnectionFactory,
//!     SearchQuery, VectorRecord, VectorService,
//! };
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let qdrant = QdrantConfig::from_env()?;
//! let service = VectorService::new(
//!     qdrant.url.clone(),
//!     EngineConfig::from_env()?,
//!     Arc::new(QdrantConnectionFactory::new(qdrant)),
//!     Arc::new(MemoryCacheStore::new()),
//! );
//!
//! service.create_collection(CollectionSpec::new("documents", 3)).await?;
//! service
//!     .insert_vectors(
//!         "documents",
//!         vec![VectorRecord::new(Uuid::new_v4(), vec![0.1, 0.2, 0.3])],
//!         None,
//!     )
//!     .await?;
//!
//! let response = service
//!     .search("documents", SearchQuery::new(vec![0.1, 0.2, 0.3], 10))
//!     .await?;
//! println!("{} results", response.results.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pool;
pub mod qdrant;
pub mod retry;
pub mod search;
pub mod service;

pub use backend::{BackendConnection, BackendQuery, ConnectionFactory, ScrollRequest};
pub use batch::BatchProcessor;
pub use cache::{CacheLayer, CacheStats, CacheStore, MemoryCacheStore, RedisCacheStore};
pub use config::{BatchConfig, CacheConfig, CacheStrategy, EngineConfig, PoolConfig, SearchConfig};
pub use error::{ConnectionFailure, VectorError, VectorResult};
pub use models::{
    Aggregation, BatchJob, BatchMode, BatchOperation, BatchResult, ChunkResult, CollectionInfo,
    CollectionSpec, CollectionStatus, DeleteResponse, DistanceMetric, HnswConfig, HybridRequest,
    InsertResponse, ScrollPage, SearchFilter, SearchQuery, SearchRequest, SearchResponse,
    SearchResult, Target, UpdateResponse, VectorRecord,
};
pub use pool::{PoolRegistry, PoolStats, PooledConnection};
pub use qdrant::{QdrantConfig, QdrantConnectionFactory};
pub use retry::{Backoff, RetryPolicy, retry_with_policy};
pub use search::SearchEngine;
pub use service::VectorService;
