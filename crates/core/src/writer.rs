use crate::error::{EmbeddingError, IngestError};
use crate::models::{Distance, DocumentChunks, IngestionOptions, WriteOutcome};
use crate::traits::VectorStore;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Loads chunked documents into per-document collections.
///
/// Create, delete and upsert for one collection are serialised behind that
/// collection's lock; different collections proceed independently.
pub struct IndexWriter {
    store: Arc<dyn VectorStore>,
    dimensions: usize,
    distance: Distance,
    large_batch_size: usize,
    small_batch_size: usize,
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndexWriter {
    pub fn new(store: Arc<dyn VectorStore>, dimensions: usize, options: &IngestionOptions) -> Self {
        Self {
            store,
            dimensions,
            distance: options.distance,
            large_batch_size: options.large_batch_size.max(1),
            small_batch_size: options.small_batch_size.max(1),
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Forgets the lock of `name` once no other write holds or awaits it.
    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    pub async fn upsert_document(
        &self,
        name: &str,
        chunks: &DocumentChunks,
        rewrite: bool,
    ) -> Result<WriteOutcome, IngestError> {
        if let Some(bad) = chunks.iter().find(|chunk| chunk.vector.len() != self.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.vector.len(),
            }
            .into());
        }

        let lock = self.lock_for(name);
        let outcome = {
            let _guard = lock.lock().await;
            self.write_collection(name, chunks, rewrite).await
        };
        self.release_lock(name, lock);
        outcome
    }

    async fn write_collection(
        &self,
        name: &str,
        chunks: &DocumentChunks,
        rewrite: bool,
    ) -> Result<WriteOutcome, IngestError> {
        let existed = self.store.collection_exists(name).await?;
        if existed {
            if !rewrite {
                info!(collection = %name, "collection already present, skipping");
                return Ok(WriteOutcome::AlreadyPresent);
            }
            self.store.delete_collection(name).await?;
            debug!(collection = %name, "old collection dropped");
        }
        self.store
            .create_collection(name, self.dimensions, self.distance)
            .await?;

        let batches = chunks
            .large
            .chunks(self.large_batch_size)
            .chain(chunks.small.chunks(self.small_batch_size))
            .map(|batch| self.store.upsert_points(name, batch));
        let sent = try_join_all(batches).await?.len();

        info!(
            collection = %name,
            large = chunks.large.len(),
            small = chunks.small.len(),
            batches = sent,
            replaced = existed,
            "document indexed"
        );

        let points = chunks.len();
        Ok(if existed {
            WriteOutcome::Replaced { points }
        } else {
            WriteOutcome::Created { points }
        })
    }
}
