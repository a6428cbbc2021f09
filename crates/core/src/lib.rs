pub mod chunking;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod retriever;
pub mod stores;
pub mod synonyms;
pub mod text;
pub mod traits;
pub mod writer;

pub use chunking::{Chunker, Passage, RecursiveSplitter, BOUNDARY_SEPARATORS};
pub use corpus::{Corpus, DirectoryCorpus, MemoryCorpus};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{EmbeddingError, IngestError, SearchError};
pub use ingest::{IngestionOrchestrator, WorkerPool};
pub use models::{
    Chunk, ChunkBody, ChunkTier, ChunkingConfig, DedupScope, Distance, DocumentChunks,
    DocumentReport, DocumentStatus, IngestionOptions, IngestionReport, RankedHit,
    RetrievalOptions, ScoredPoint, WriteOutcome,
};
pub use prompt::{build_user_prompt, NOT_READY_MESSAGE, SYSTEM_PROMPT};
pub use retriever::{rank_hits, QueryRetriever};
pub use stores::{MemoryStore, QdrantStore};
pub use synonyms::{
    expand, train, ContextSnapshot, SynonymExpander, SynonymModel, SynonymPaths, SynonymStore,
    TrainingParams,
};
pub use text::{split_sentences, TextAnalyzer};
pub use traits::VectorStore;
pub use writer::IndexWriter;
