//! Seam between the engine and a remote vector store.
//!
//! The pool owns [`BackendConnection`]s created by a [`ConnectionFactory`];
//! everything above the pool talks to the store only through these traits.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::VectorResult;
use crate::models::{
    CollectionInfo, CollectionSpec, ScrollPage, SearchFilter, SearchResult, Target, VectorRecord,
};

/// One raw similarity query as sent to the store
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    pub vector: Vec<f32>,
    pub limit: u64,
    pub offset: u64,
    pub filter: Option<SearchFilter>,
    pub score_threshold: Option<f32>,
    /// ANN tuning parameter (`hnsw_ef`)
    pub ef: u64,
    pub with_vectors: bool,
    pub with_payload: bool,
}

/// One page request of a scroll
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollRequest {
    pub filter: Option<SearchFilter>,
    pub limit: u32,
    pub cursor: Option<Uuid>,
    pub with_vectors: bool,
}

/// A live session to a vector store.
///
/// Never shared between concurrent callers; the pool hands each one to a
/// single borrower at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Cheap local check; `false` means the session must not be reused.
    fn is_open(&self) -> bool;

    /// Lightweight liveness probe.
    async fn ping(&self) -> VectorResult<()>;

    async fn create_collection(&self, spec: &CollectionSpec) -> VectorResult<()>;

    /// Returns `false` if the collection did not exist.
    async fn delete_collection(&self, name: &str) -> VectorResult<bool>;

    async fn list_collections(&self) -> VectorResult<Vec<String>>;

    async fn collection_info(&self, name: &str) -> VectorResult<Option<CollectionInfo>>;

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> VectorResult<()>;

    async fn search(&self, collection: &str, query: &BackendQuery)
        -> VectorResult<Vec<SearchResult>>;

    /// Points that do not exist are omitted from the result.
    async fn retrieve(
        &self,
        collection: &str,
        ids: &[Uuid],
        with_vectors: bool,
    ) -> VectorResult<Vec<VectorRecord>>;

    /// Returns the number of ids submitted for deletion.
    async fn delete(&self, collection: &str, ids: &[Uuid]) -> VectorResult<u64>;

    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> VectorResult<ScrollPage>;
}

/// Opens new sessions for a target
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, target: &Target) -> VectorResult<Box<dyn BackendConnection>>;
}
