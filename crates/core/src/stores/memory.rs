use crate::error::SearchError;
use crate::models::{Chunk, Distance, ScoredPoint};
use crate::traits::VectorStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct Collection {
    dimensions: usize,
    distance: Distance,
    points: BTreeMap<u64, Chunk>,
}

/// In-process store with brute-force scoring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert_points` calls that carried at least one point.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::Relaxed)
    }

    pub fn point_count(&self, name: &str) -> Option<usize> {
        self.collections
            .lock()
            .get(name)
            .map(|collection| collection.points.len())
    }

    fn missing(name: &str) -> SearchError {
        SearchError::BackendResponse {
            backend: "memory".to_string(),
            details: format!("collection `{name}` does not exist"),
        }
    }
}

fn similarity(distance: Distance, left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let norm = |vector: &[f32]| vector.iter().map(|value| value * value).sum::<f32>().sqrt();
            let denominator = norm(left) * norm(right);
            if denominator > f32::EPSILON {
                dot / denominator
            } else {
                0.0
            }
        }
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
        let mut names = self.collections.lock().keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, SearchError> {
        Ok(self.collections.lock().contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError> {
        let mut collections = self.collections.lock();
        if collections.contains_key(name) {
            return Err(SearchError::BackendResponse {
                backend: "memory".to_string(),
                details: format!("collection `{name}` already exists"),
            });
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimensions,
                distance,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
        self.collections
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::missing(name))
    }

    async fn upsert_points(&self, name: &str, chunks: &[Chunk]) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut collections = self.collections.lock();
        let collection = collections.get_mut(name).ok_or_else(|| Self::missing(name))?;
        if let Some(bad) = chunks
            .iter()
            .find(|chunk| chunk.vector.len() != collection.dimensions)
        {
            return Err(SearchError::Request(format!(
                "point {} has dimension {}, collection `{name}` expects {}",
                bad.id,
                bad.vector.len(),
                collection.dimensions
            )));
        }

        for chunk in chunks {
            collection.points.insert(chunk.id, chunk.clone());
        }
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, SearchError> {
        let collections = self.collections.lock();
        let collection = collections.get(name).ok_or_else(|| Self::missing(name))?;

        let mut hits = collection
            .points
            .values()
            .map(|chunk| ScoredPoint {
                id: chunk.id,
                score: similarity(collection.distance, vector, &chunk.vector),
                parent_id: chunk.parent_id(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score).then(left.id.cmp(&right.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn retrieve_text(&self, name: &str, id: u64) -> Result<Option<String>, SearchError> {
        let collections = self.collections.lock();
        let collection = collections.get(name).ok_or_else(|| Self::missing(name))?;
        Ok(collection
            .points
            .get(&id)
            .and_then(Chunk::text)
            .map(str::to_string))
    }
}
