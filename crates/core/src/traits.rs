use crate::error::SearchError;
use crate::models::{Chunk, Distance, ScoredPoint};
use async_trait::async_trait;

/// Collection-oriented vector store, one collection per document.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>, SearchError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, SearchError> {
        Ok(self.list_collections().await?.iter().any(|existing| existing == name))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError>;

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError>;

    async fn upsert_points(&self, name: &str, chunks: &[Chunk]) -> Result<(), SearchError>;

    /// Hits scoring at least `score_threshold`, best first, at most `limit`.
    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, SearchError>;

    /// Stored text of a point; `None` for small chunks or unknown ids.
    async fn retrieve_text(&self, name: &str, id: u64) -> Result<Option<String>, SearchError>;
}
