use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkTier {
    Large,
    Small,
}

/// Tier-specific part of a chunk. A large chunk is its own parent and owns the
/// text; a small chunk only points at its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkBody {
    Large { text: String },
    Small { parent_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub document_name: String,
    pub vector: Vec<f32>,
    pub body: ChunkBody,
}

impl Chunk {
    pub fn large(id: u64, document_name: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id,
            document_name: document_name.into(),
            vector,
            body: ChunkBody::Large { text: text.into() },
        }
    }

    pub fn small(id: u64, document_name: impl Into<String>, parent_id: u64, vector: Vec<f32>) -> Self {
        Self {
            id,
            document_name: document_name.into(),
            vector,
            body: ChunkBody::Small { parent_id },
        }
    }

    pub fn tier(&self) -> ChunkTier {
        match self.body {
            ChunkBody::Large { .. } => ChunkTier::Large,
            ChunkBody::Small { .. } => ChunkTier::Small,
        }
    }

    pub fn parent_id(&self) -> u64 {
        match self.body {
            ChunkBody::Large { .. } => self.id,
            ChunkBody::Small { parent_id } => parent_id,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ChunkBody::Large { text } => Some(text),
            ChunkBody::Small { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentChunks {
    pub large: Vec<Chunk>,
    pub small: Vec<Chunk>,
}

impl DocumentChunks {
    pub fn len(&self) -> usize {
        self.large.len() + self.small.len()
    }

    pub fn is_empty(&self) -> bool {
        self.large.is_empty() && self.small.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.large.iter().chain(self.small.iter())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Distance {
    #[default]
    Dot,
    Cosine,
}

impl Distance {
    pub fn as_qdrant(&self) -> &'static str {
        match self {
            Distance::Dot => "Dot",
            Distance::Cosine => "Cosine",
        }
    }
}

/// A similarity-search hit as returned by one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
    pub parent_id: u64,
}

/// A hit after the cross-collection merge, remembering where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub collection: String,
    pub point_id: u64,
    pub parent_id: u64,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub large_size: usize,
    pub large_overlap: usize,
    pub small_size: usize,
    pub small_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            large_size: 2_500,
            large_overlap: 400,
            small_size: 300,
            small_overlap: 80,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub large_batch_size: usize,
    pub small_batch_size: usize,
    pub max_concurrent_documents: usize,
    /// Size of the CPU worker pool. Defaults to the number of physical cores.
    pub worker_threads: usize,
    pub rewrite: bool,
    pub distance: Distance,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            large_batch_size: 200,
            small_batch_size: 500,
            max_concurrent_documents: 1,
            worker_threads: num_cpus::get_physical(),
            rewrite: true,
            distance: Distance::Dot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupScope {
    /// One hit per `parent_id` across every collection.
    #[default]
    Global,
    PerCollection,
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub candidates_per_collection: usize,
    pub score_threshold: f32,
    pub context_size: usize,
    pub search_timeout: Option<Duration>,
    pub dedup_scope: DedupScope,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            candidates_per_collection: 10,
            score_threshold: 0.25,
            context_size: 5,
            search_timeout: None,
            dedup_scope: DedupScope::Global,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { points: usize },
    Replaced { points: usize },
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    Indexed { large: usize, small: usize, replaced: bool },
    AlreadyPresent,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub name: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents: Vec<DocumentReport>,
    pub context_sentences: usize,
    pub model_version: u64,
}

impl IngestionReport {
    pub fn failed(&self) -> impl Iterator<Item = &DocumentReport> {
        self.documents
            .iter()
            .filter(|report| matches!(report.status, DocumentStatus::Failed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_defaults_to_physical_cores() {
        let options = IngestionOptions::default();
        assert_eq!(options.worker_threads, num_cpus::get_physical());
        assert!(options.worker_threads >= 1);
    }
}
