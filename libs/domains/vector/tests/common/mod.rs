//! In-process fake vector store for integration tests.
//!
//! Scores with cosine similarity by brute force, applies the payload filter
//! and counts every backend call so tests can assert on traffic.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain_vector::{
    BackendConnection, BackendQuery, CollectionInfo, CollectionSpec, CollectionStatus,
    ConnectionFactory, EngineConfig, MemoryCacheStore, ScrollPage, ScrollRequest, SearchFilter,
    SearchResult, Target, VectorError, VectorRecord, VectorResult, VectorService,
};
use uuid::Uuid;

pub const SERVER: &str = "http://fake-qdrant:6334";

struct Collection {
    spec: CollectionSpec,
    points: BTreeMap<Uuid, VectorRecord>,
}

#[derive(Default)]
pub struct FakeState {
    collections: Mutex<HashMap<String, Collection>>,
    pub connects: AtomicUsize,
    pub calls: AtomicUsize,
    pub upserts: AtomicUsize,
    pub searches: AtomicUsize,
    pub scrolls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    fail_upsert_size: Mutex<Option<usize>>,
    fail_next_upserts: AtomicUsize,
    search_delay: Mutex<Duration>,
}

/// Shared handle to the fake store; also its own connection factory.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub state: Arc<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }

    /// Every upsert of exactly `size` records fails with a transient error.
    pub fn fail_upserts_of_size(&self, size: usize) {
        *self.state.fail_upsert_size.lock().unwrap() = Some(size);
    }

    /// The next `n` upserts fail with a transient error.
    pub fn fail_next_upserts(&self, n: usize) {
        self.state.fail_next_upserts.store(n, Ordering::SeqCst);
    }

    pub fn set_search_delay(&self, delay: Duration) {
        *self.state.search_delay.lock().unwrap() = delay;
    }

    pub fn create(&self, spec: CollectionSpec) {
        self.state.collections.lock().unwrap().insert(
            spec.name.clone(),
            Collection {
                spec,
                points: BTreeMap::new(),
            },
        );
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.state
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, |c| c.points.len())
    }

    pub fn point(&self, collection: &str, id: Uuid) -> Option<VectorRecord> {
        self.state
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|c| c.points.get(&id).cloned())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for FakeBackend {
    async fn connect(&self, _target: &Target) -> VectorResult<Box<dyn BackendConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    state: Arc<FakeState>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn matches(record: &VectorRecord, filter: Option<&SearchFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let payload = record.payload.as_ref();
    let field = |key: &str| payload.and_then(|p| p.get(key));

    if filter.must.iter().any(|(k, v)| field(k) != Some(v)) {
        return false;
    }
    if filter.must_not.iter().any(|(k, v)| field(k) == Some(v)) {
        return false;
    }
    if let Some(text) = &filter.text {
        let Some(haystack) = field(&text.field).and_then(|v| v.as_str()) else {
            return false;
        };
        let haystack = haystack.to_lowercase();
        return text
            .text
            .split_whitespace()
            .any(|term| haystack.contains(&term.to_lowercase()));
    }
    true
}

fn not_found(name: &str) -> VectorError {
    VectorError::CollectionNotFound(name.to_string())
}

impl FakeConnection {
    fn call(&self) {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendConnection for FakeConnection {
    fn is_open(&self) -> bool {
        true
    }

    async fn ping(&self) -> VectorResult<()> {
        Ok(())
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> VectorResult<()> {
        self.call();
        let mut collections = self.state.collections.lock().unwrap();
        if collections.contains_key(&spec.name) {
            return Err(VectorError::Validation(format!("{} already exists", spec.name)));
        }
        collections.insert(
            spec.name.clone(),
            Collection {
                spec: spec.clone(),
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> VectorResult<bool> {
        self.call();
        Ok(self.state.collections.lock().unwrap().remove(name).is_some())
    }

    async fn list_collections(&self) -> VectorResult<Vec<String>> {
        self.call();
        Ok(self.state.collections.lock().unwrap().keys().cloned().collect())
    }

    async fn collection_info(&self, name: &str) -> VectorResult<Option<CollectionInfo>> {
        self.call();
        Ok(self
            .state
            .collections
            .lock()
            .unwrap()
            .get(name)
            .map(|c| CollectionInfo {
                spec: c.spec.clone(),
                points_count: c.points.len() as u64,
                indexed_vectors_count: 0,
                segments_count: 1,
                status: CollectionStatus::Green,
            }))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> VectorResult<()> {
        self.call();
        self.state.upserts.fetch_add(1, Ordering::SeqCst);

        let fail_next = self
            .state
            .fail_next_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let fail_size = *self.state.fail_upsert_size.lock().unwrap() == Some(records.len());
        if fail_next || fail_size {
            return Err(VectorError::backend("Unavailable", "injected failure"));
        }

        let mut collections = self.state.collections.lock().unwrap();
        let target = collections.get_mut(collection).ok_or_else(|| not_found(collection))?;
        for record in records {
            target.points.insert(record.id, record.clone());
        }
        Ok(())
    }

    /// Scores against the points present when the call starts, then waits
    /// out the configured delay, like a slow backend answering from a
    /// snapshot.
    async fn search(&self, collection: &str, query: &BackendQuery) -> VectorResult<Vec<SearchResult>> {
        self.call();
        self.state.searches.fetch_add(1, Ordering::SeqCst);

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let results = {
            let collections = self.state.collections.lock().unwrap();
            collections
                .get(collection)
                .map(|target| {
                    let mut scored: Vec<SearchResult> = target
                        .points
                        .values()
                        .filter(|r| matches(r, query.filter.as_ref()))
                        .map(|r| SearchResult {
                            id: r.id,
                            score: cosine(&query.vector, &r.embedding),
                            payload: if query.with_payload { r.payload.clone() } else { None },
                            vector: query.with_vectors.then(|| r.embedding.clone()),
                        })
                        .filter(|r| query.score_threshold.is_none_or(|t| r.score >= t))
                        .collect();
                    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
                    scored
                        .into_iter()
                        .skip(query.offset as usize)
                        .take(query.limit as usize)
                        .collect::<Vec<_>>()
                })
                .ok_or_else(|| not_found(collection))
        };

        let delay = *self.state.search_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        results
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[Uuid],
        with_vectors: bool,
    ) -> VectorResult<Vec<VectorRecord>> {
        self.call();
        let collections = self.state.collections.lock().unwrap();
        let target = collections.get(collection).ok_or_else(|| not_found(collection))?;
        Ok(ids
            .iter()
            .filter_map(|id| target.points.get(id))
            .map(|r| {
                let mut r = r.clone();
                if !with_vectors {
                    r.embedding.clear();
                }
                r
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[Uuid]) -> VectorResult<u64> {
        self.call();
        let mut collections = self.state.collections.lock().unwrap();
        let target = collections.get_mut(collection).ok_or_else(|| not_found(collection))?;
        for id in ids {
            target.points.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn scroll(&self, collection: &str, request: &ScrollRequest) -> VectorResult<ScrollPage> {
        self.call();
        self.state.scrolls.fetch_add(1, Ordering::SeqCst);

        let collections = self.state.collections.lock().unwrap();
        let target = collections.get(collection).ok_or_else(|| not_found(collection))?;

        let mut matching = target
            .points
            .range(request.cursor.unwrap_or(Uuid::nil())..)
            .map(|(_, r)| r)
            .filter(|r| matches(r, request.filter.as_ref()));

        let records: Vec<VectorRecord> = matching
            .by_ref()
            .take(request.limit as usize)
            .map(|r| {
                let mut r = r.clone();
                if !request.with_vectors {
                    r.embedding.clear();
                }
                r
            })
            .collect();
        let next_cursor = matching.next().map(|r| r.id);

        Ok(ScrollPage {
            records,
            next_cursor,
        })
    }
}

/// Service over `backend` with an in-memory cache.
pub fn service(backend: &FakeBackend, config: EngineConfig) -> VectorService {
    VectorService::new(
        SERVER,
        config,
        backend.factory(),
        Arc::new(MemoryCacheStore::new()),
    )
}

