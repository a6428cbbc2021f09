use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{DedupScope, RankedHit, RetrievalOptions};
use crate::synonyms::SynonymExpander;
use crate::traits::VectorStore;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns a question into the knowledge-base context handed to the LLM.
pub struct QueryRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    expander: SynonymExpander,
    options: RetrievalOptions,
}

impl QueryRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        expander: SynonymExpander,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            expander,
            options,
        }
    }

    /// Newline-joined parent texts of the best hits across every collection,
    /// best first. Empty when nothing clears the score threshold.
    pub async fn prepare_context(&self, question: &str) -> Result<String, SearchError> {
        let hits = self.ranked_hits(question).await?;

        let texts = try_join_all(
            hits.iter()
                .map(|hit| self.store.retrieve_text(&hit.collection, hit.parent_id)),
        )
        .await?;

        let mut context = Vec::with_capacity(texts.len());
        for (hit, text) in hits.iter().zip(texts) {
            match text {
                Some(text) => context.push(text),
                None => warn!(
                    collection = %hit.collection,
                    parent_id = hit.parent_id,
                    "parent chunk has no text"
                ),
            }
        }

        Ok(context.join("\n"))
    }

    /// Deduplicated, ranked hits for `question`, at most `context_size`.
    pub async fn ranked_hits(&self, question: &str) -> Result<Vec<RankedHit>, SearchError> {
        let normalized = self.expander.analyzer().preprocess(question).join(" ");
        let expanded = self.expander.expand(&normalized)?;
        debug!(question = %question, expanded = %expanded, "question expanded");

        let embedder = Arc::clone(&self.embedder);
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&expanded))
            .await
            .map_err(|err| SearchError::Request(format!("embedding task failed: {err}")))??;

        let collections = self.store.list_collections().await?;
        let per_collection = try_join_all(
            collections
                .iter()
                .map(|collection| self.search_collection(collection, &vector)),
        )
        .await?;

        let hits = rank_hits(
            per_collection.into_iter().flatten().collect(),
            self.options.dedup_scope,
            self.options.context_size,
        );
        debug!(collections = collections.len(), hits = hits.len(), "search finished");
        Ok(hits)
    }

    async fn search_collection(
        &self,
        collection: &str,
        vector: &[f32],
    ) -> Result<Vec<RankedHit>, SearchError> {
        let search = self.store.search(
            collection,
            vector,
            self.options.candidates_per_collection,
            self.options.score_threshold,
        );

        let points = match self.options.search_timeout {
            Some(limit) => match tokio::time::timeout(limit, search).await {
                Ok(points) => points?,
                Err(_) => {
                    warn!(collection = %collection, timeout_ms = limit.as_millis() as u64, "search timed out");
                    Vec::new()
                }
            },
            None => search.await?,
        };

        Ok(points
            .into_iter()
            .map(|point| RankedHit {
                collection: collection.to_string(),
                point_id: point.id,
                parent_id: point.parent_id,
                score: point.score,
            })
            .collect())
    }
}

/// Sorts by score (ties: collection name, then point id), keeps the first hit
/// per parent and truncates to `limit`.
pub fn rank_hits(mut hits: Vec<RankedHit>, scope: DedupScope, limit: usize) -> Vec<RankedHit> {
    hits.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.collection.cmp(&right.collection))
            .then_with(|| left.point_id.cmp(&right.point_id))
    });

    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| {
            let key = match scope {
                DedupScope::Global => (None, hit.parent_id),
                DedupScope::PerCollection => (Some(hit.collection.clone()), hit.parent_id),
            };
            seen.insert(key)
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::models::{Chunk, Distance, ScoredPoint};
    use crate::stores::MemoryStore;
    use crate::synonyms::{train, ContextSnapshot, SynonymStore, TrainingParams};
    use crate::text::TextAnalyzer;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixed(Vec<f32>);

    impl Embedder for Fixed {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    /// Never answers searches on the `slow` collection.
    struct Stalling(MemoryStore);

    #[async_trait]
    impl VectorStore for Stalling {
        async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
            self.0.list_collections().await
        }

        async fn create_collection(
            &self,
            name: &str,
            dimensions: usize,
            distance: Distance,
        ) -> Result<(), SearchError> {
            self.0.create_collection(name, dimensions, distance).await
        }

        async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
            self.0.delete_collection(name).await
        }

        async fn upsert_points(&self, name: &str, chunks: &[Chunk]) -> Result<(), SearchError> {
            self.0.upsert_points(name, chunks).await
        }

        async fn search(
            &self,
            name: &str,
            vector: &[f32],
            limit: usize,
            score_threshold: f32,
        ) -> Result<Vec<ScoredPoint>, SearchError> {
            if name == "slow" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.0.search(name, vector, limit, score_threshold).await
        }

        async fn retrieve_text(&self, name: &str, id: u64) -> Result<Option<String>, SearchError> {
            self.0.retrieve_text(name, id).await
        }
    }

    fn hit(collection: &str, point_id: u64, parent_id: u64, score: f32) -> RankedHit {
        RankedHit {
            collection: collection.to_string(),
            point_id,
            parent_id,
            score,
        }
    }

    fn ready_expander() -> SynonymExpander {
        let analyzer = Arc::new(TextAnalyzer::russian().unwrap());
        let snapshot = ContextSnapshot::build(["Токеон — это компания. Компания принимает платежи."], &analyzer);
        let params = TrainingParams {
            vector_size: 8,
            epochs: 1,
            buckets: 1_000,
            ..TrainingParams::default()
        };
        let store = SynonymStore::in_memory();
        store.install(train(&snapshot, &params).unwrap());
        SynonymExpander::new(Arc::new(store), analyzer)
    }

    fn retriever(store: Arc<dyn VectorStore>, options: RetrievalOptions) -> QueryRetriever {
        QueryRetriever::new(store, Arc::new(Fixed(vec![1.0, 0.0])), ready_expander(), options)
    }

    async fn collection(store: &MemoryStore, name: &str, chunks: &[Chunk]) {
        store.create_collection(name, 2, Distance::Dot).await.unwrap();
        store.upsert_points(name, chunks).await.unwrap();
    }

    #[test]
    fn duplicate_parent_across_collections_is_kept_once() {
        let ranked = rank_hits(
            vec![hit("a", 3, 0, 0.5), hit("b", 7, 0, 0.7), hit("b", 8, 1, 0.4)],
            DedupScope::Global,
            5,
        );
        assert_eq!(ranked, vec![hit("b", 7, 0, 0.7), hit("b", 8, 1, 0.4)]);
    }

    #[test]
    fn per_collection_scope_keeps_same_parent_from_other_collections() {
        let ranked = rank_hits(
            vec![hit("a", 3, 0, 0.5), hit("b", 7, 0, 0.7), hit("b", 4, 0, 0.6)],
            DedupScope::PerCollection,
            5,
        );
        assert_eq!(ranked, vec![hit("b", 7, 0, 0.7), hit("a", 3, 0, 0.5)]);
    }

    #[test]
    fn equal_scores_break_ties_by_collection_then_point() {
        let ranked = rank_hits(
            vec![hit("b", 1, 0, 0.5), hit("a", 2, 0, 0.5), hit("a", 1, 9, 0.5)],
            DedupScope::Global,
            5,
        );
        assert_eq!(ranked, vec![hit("a", 1, 9, 0.5), hit("a", 2, 0, 0.5)]);
    }

    #[tokio::test]
    async fn context_is_ordered_by_score_and_truncated() {
        let store = MemoryStore::new();
        let scores = [0.9f32, 0.4, 0.6, 0.8, 0.3, 0.95];
        let chunks = scores
            .iter()
            .enumerate()
            .map(|(id, score)| Chunk::large(id as u64, "doc", format!("текст {score}"), vec![*score, 0.0]))
            .collect::<Vec<_>>();
        collection(&store, "doc", &chunks).await;

        let context = retriever(Arc::new(store), RetrievalOptions::default())
            .prepare_context("что такое Токеон")
            .await
            .unwrap();

        assert_eq!(context, "текст 0.95\nтекст 0.9\nтекст 0.8\nтекст 0.6\nтекст 0.4");
    }

    #[tokio::test]
    async fn small_hit_resolves_to_parent_text() {
        let store = MemoryStore::new();
        collection(
            &store,
            "doc",
            &[
                Chunk::large(0, "doc", "большой фрагмент", vec![0.3, 0.0]),
                Chunk::small(1, "doc", 0, vec![0.9, 0.0]),
            ],
        )
        .await;

        let context = retriever(Arc::new(store), RetrievalOptions::default())
            .prepare_context("платежи")
            .await
            .unwrap();

        assert_eq!(context, "большой фрагмент");
    }

    #[tokio::test]
    async fn nothing_above_threshold_gives_empty_context() {
        let store = MemoryStore::new();
        collection(&store, "doc", &[Chunk::large(0, "doc", "далеко", vec![0.1, 0.9])]).await;

        let context = retriever(Arc::new(store), RetrievalOptions::default())
            .prepare_context("вопрос")
            .await
            .unwrap();

        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn missing_model_is_not_ready() {
        let expander = SynonymExpander::new(
            Arc::new(SynonymStore::in_memory()),
            Arc::new(TextAnalyzer::russian().unwrap()),
        );
        let retriever = QueryRetriever::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Fixed(vec![1.0, 0.0])),
            expander,
            RetrievalOptions::default(),
        );

        let err = retriever.prepare_context("что такое Токеон").await.unwrap_err();
        assert!(err.is_not_ready());
    }

    #[tokio::test]
    async fn slow_collection_contributes_nothing_after_timeout() {
        let inner = MemoryStore::new();
        collection(&inner, "fast", &[Chunk::large(0, "fast", "быстрый", vec![0.9, 0.0])]).await;
        collection(&inner, "slow", &[Chunk::large(0, "slow", "медленный", vec![0.95, 0.0])]).await;
        let options = RetrievalOptions {
            search_timeout: Some(Duration::from_millis(50)),
            ..RetrievalOptions::default()
        };

        let context = retriever(Arc::new(Stalling(inner)), options)
            .prepare_context("вопрос")
            .await
            .unwrap();

        assert_eq!(context, "быстрый");
    }
}
