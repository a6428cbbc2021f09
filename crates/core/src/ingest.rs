use crate::chunking::Chunker;
use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{
    DocumentChunks, DocumentReport, DocumentStatus, IngestionOptions, IngestionReport, WriteOutcome,
};
use crate::synonyms::{train, ContextSnapshot, SynonymStore, TrainingParams};
use crate::text::TextAnalyzer;
use crate::traits::VectorStore;
use crate::writer::IndexWriter;
use chrono::Utc;
use futures::future::join_all;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tracing::{error, info, warn};

/// Long-lived pool for CPU-bound work (splitting, embedding, training).
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, IngestError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("kb-worker-{index}"))
            .panic_handler(|_| error!("worker job panicked"))
            .build()
            .map_err(|err| IngestError::WorkerPool(err.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job` on the pool and waits for it without blocking the runtime.
    pub async fn run<T, F>(&self, job: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = sender.send(job());
        });
        receiver
            .await
            .map_err(|_| IngestError::WorkerPool("job ended without a result".to_string()))
    }
}

/// Renews the knowledge base: indexes every document, then rebuilds the
/// context snapshot and retrains the synonym model from it.
///
/// Renewals on one orchestrator run one at a time.
pub struct IngestionOrchestrator {
    embedder: Arc<dyn Embedder>,
    writer: IndexWriter,
    synonyms: Arc<SynonymStore>,
    analyzer: Arc<TextAnalyzer>,
    chunker: Arc<Chunker>,
    pool: WorkerPool,
    options: IngestionOptions,
    training: TrainingParams,
    renewal: Mutex<()>,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        synonyms: Arc<SynonymStore>,
        analyzer: Arc<TextAnalyzer>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        if options.max_concurrent_documents == 0 {
            return Err(IngestError::InvalidArgument(
                "max_concurrent_documents must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            writer: IndexWriter::new(store, embedder.dimensions(), &options),
            chunker: Arc::new(Chunker::new(options.chunking)?),
            pool: WorkerPool::new(options.worker_threads)?,
            embedder,
            synonyms,
            analyzer,
            options,
            training: TrainingParams::default(),
            renewal: Mutex::new(()),
        })
    }

    pub fn with_training(mut self, training: TrainingParams) -> Self {
        self.training = training;
        self
    }

    pub async fn ingest(&self, corpus: Arc<dyn Corpus>) -> Result<IngestionReport, IngestError> {
        let _renewal = self.renewal.lock().await;
        let started_at = Utc::now();
        let names = corpus.document_names();
        if names.is_empty() {
            return Err(IngestError::EmptyCorpus(corpus.location()));
        }

        info!(
            documents = names.len(),
            concurrency = self.options.max_concurrent_documents,
            workers = self.pool.threads(),
            "ingestion started"
        );

        let permits = Semaphore::new(self.options.max_concurrent_documents);
        let (shared, permits) = (&corpus, &permits);
        let documents = join_all(names.iter().map(|name| async move {
            let status = match self.index_document(shared, name, permits).await {
                Ok(status) => status,
                Err(err) => {
                    warn!(document = %name, reason = %err, "document ingestion failed");
                    DocumentStatus::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            DocumentReport {
                name: name.clone(),
                status,
            }
        }))
        .await;

        let snapshot = {
            let corpus = Arc::clone(&corpus);
            let analyzer = Arc::clone(&self.analyzer);
            self.pool
                .run(move || rebuild_context(corpus.as_ref(), &analyzer))
                .await?
        };
        if snapshot.is_empty() {
            return Err(IngestError::EmptyContext);
        }
        self.synonyms.save_context(&snapshot)?;
        let context_sentences = snapshot.len();

        let params = self.training.clone();
        let model = self.pool.run(move || train(&snapshot, &params)).await??;
        let synonyms = Arc::clone(&self.synonyms);
        let model_version = self
            .pool
            .run(move || synonyms.persist_and_install(model))
            .await??;

        let report = IngestionReport {
            started_at,
            finished_at: Utc::now(),
            documents,
            context_sentences,
            model_version,
        };
        info!(
            documents = report.documents.len(),
            failed = report.failed().count(),
            context_sentences,
            model_version,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "ingestion finished"
        );
        Ok(report)
    }

    async fn index_document(
        &self,
        corpus: &Arc<dyn Corpus>,
        name: &str,
        permits: &Semaphore,
    ) -> Result<DocumentStatus, IngestError> {
        let _permit = permits
            .acquire()
            .await
            .map_err(|err| IngestError::WorkerPool(err.to_string()))?;

        let chunks = {
            let corpus = Arc::clone(corpus);
            let chunker = Arc::clone(&self.chunker);
            let embedder = Arc::clone(&self.embedder);
            let name = name.to_string();
            self.pool
                .run(move || -> Result<DocumentChunks, IngestError> {
                    let text = corpus.read_document(&name)?;
                    Ok(chunker.chunk(&text, &name, embedder.as_ref())?)
                })
                .await??
        };

        let outcome = self
            .writer
            .upsert_document(name, &chunks, self.options.rewrite)
            .await?;

        Ok(match outcome {
            WriteOutcome::AlreadyPresent => DocumentStatus::AlreadyPresent,
            WriteOutcome::Created { .. } | WriteOutcome::Replaced { .. } => DocumentStatus::Indexed {
                large: chunks.large.len(),
                small: chunks.small.len(),
                replaced: matches!(outcome, WriteOutcome::Replaced { .. }),
            },
        })
    }
}

/// Re-reads every document; unreadable ones are left out of the snapshot.
fn rebuild_context(corpus: &dyn Corpus, analyzer: &TextAnalyzer) -> ContextSnapshot {
    let mut snapshot = ContextSnapshot::default();
    for name in corpus.document_names() {
        match corpus.read_document(&name) {
            Ok(text) => snapshot.push_document(&text, analyzer),
            Err(err) => warn!(document = %name, reason = %err, "document left out of context"),
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MemoryCorpus;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::synonyms::{SynonymModel, SynonymPaths};
    use crate::stores::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Slow reads that record how many happen at the same time.
    struct Gauged {
        inner: MemoryCorpus,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Corpus for Gauged {
        fn document_names(&self) -> Vec<String> {
            self.inner.document_names()
        }

        fn read_document(&self, name: &str) -> Result<String, IngestError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.read_document(name)
        }
    }

    struct PartlyMissing {
        inner: MemoryCorpus,
        missing: &'static str,
    }

    impl Corpus for PartlyMissing {
        fn document_names(&self) -> Vec<String> {
            let mut names = self.inner.document_names();
            names.push(self.missing.to_string());
            names.sort();
            names
        }

        fn read_document(&self, name: &str) -> Result<String, IngestError> {
            if name == self.missing {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "removed").into());
            }
            self.inner.read_document(name)
        }
    }

    fn orchestrator(store: Arc<MemoryStore>, synonyms: Arc<SynonymStore>) -> IngestionOrchestrator {
        orchestrator_with(store, synonyms, 1)
    }

    fn orchestrator_with(
        store: Arc<MemoryStore>,
        synonyms: Arc<SynonymStore>,
        max_concurrent_documents: usize,
    ) -> IngestionOrchestrator {
        let options = IngestionOptions {
            worker_threads: 4,
            max_concurrent_documents,
            ..IngestionOptions::default()
        };
        IngestionOrchestrator::new(
            store,
            Arc::new(CharacterNgramEmbedder::default()),
            synonyms,
            Arc::new(TextAnalyzer::russian().unwrap()),
            options,
        )
        .unwrap()
        .with_training(TrainingParams {
            vector_size: 16,
            epochs: 2,
            buckets: 10_000,
            ..TrainingParams::default()
        })
    }

    #[tokio::test]
    async fn worker_pool_returns_job_result() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn panicking_job_is_a_worker_error() {
        let pool = WorkerPool::new(1).unwrap();
        let result = pool.run(|| -> u32 { panic!("boom") }).await;
        assert!(matches!(result, Err(IngestError::WorkerPool(_))));
        assert_eq!(pool.run(|| 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_document_does_not_abort_siblings() {
        let store = Arc::new(MemoryStore::new());
        let synonyms = Arc::new(SynonymStore::in_memory());
        let corpus = PartlyMissing {
            inner: MemoryCorpus::new([
                ("оферта", "Токеон — это компания. Компания принимает платежи."),
                ("тарифы", "Пополнение счёта бесплатно. Вывод средств стоит один процент."),
            ]),
            missing: "удалён",
        };

        let report = orchestrator(store.clone(), synonyms.clone())
            .ingest(Arc::new(corpus))
            .await
            .unwrap();

        assert_eq!(report.documents.len(), 3);
        let failed = report.failed().map(|doc| doc.name.as_str()).collect::<Vec<_>>();
        assert_eq!(failed, vec!["удалён"]);
        assert!(store.point_count("оферта").is_some());
        assert!(store.point_count("тарифы").is_some());
        assert!(store.point_count("удалён").is_none());
        assert_eq!(report.model_version, 1);
        assert!(synonyms.is_ready());
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn second_run_replaces_collections_and_model() {
        let store = Arc::new(MemoryStore::new());
        let synonyms = Arc::new(SynonymStore::in_memory());
        let orchestrator = orchestrator(store.clone(), synonyms.clone());
        let corpus: Arc<dyn Corpus> = Arc::new(MemoryCorpus::new([("doc", "Это тестовый файл. Токеон — это компания.")]));

        orchestrator.ingest(Arc::clone(&corpus)).await.unwrap();
        let report = orchestrator.ingest(corpus).await.unwrap();

        assert!(matches!(
            report.documents[0].status,
            DocumentStatus::Indexed { replaced: true, .. }
        ));
        assert_eq!(report.model_version, 2);
        assert_eq!(synonyms.version(), 2);
    }

    #[tokio::test]
    async fn documents_in_flight_never_exceed_the_bound() {
        for bound in [1, 2] {
            let corpus = Arc::new(Gauged {
                inner: MemoryCorpus::new((0..6).map(|index| {
                    (
                        format!("doc{index}"),
                        format!("Документ номер {index}. Токеон принимает платежи."),
                    )
                })),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });

            let orchestrator = orchestrator_with(
                Arc::new(MemoryStore::new()),
                Arc::new(SynonymStore::in_memory()),
                bound,
            );
            let report = orchestrator
                .ingest(corpus.clone())
                .await
                .unwrap();

            assert_eq!(report.failed().count(), 0);
            let peak = corpus.peak.load(Ordering::SeqCst);
            assert!(peak >= 1 && peak <= bound, "bound {bound}, peak {peak}");
        }
    }

    #[tokio::test]
    async fn overlapping_renewals_are_serialized() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let synonyms = Arc::new(SynonymStore::open(SynonymPaths {
            model: dir.path().join("synonyms.model"),
            context: dir.path().join("context.json"),
        })?);
        let orchestrator = orchestrator(Arc::new(MemoryStore::new()), synonyms.clone());
        let corpus: Arc<dyn Corpus> = Arc::new(MemoryCorpus::new([(
            "doc",
            "Токеон — это компания. Компания принимает платежи.",
        )]));

        let (first, second) = tokio::join!(
            orchestrator.ingest(Arc::clone(&corpus)),
            orchestrator.ingest(Arc::clone(&corpus))
        );

        let mut versions = vec![first?.model_version, second?.model_version];
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(synonyms.version(), 2);
        assert!(SynonymModel::load(&dir.path().join("synonyms.model")).is_ok());
        assert!(ContextSnapshot::load(&dir.path().join("context.json")).is_ok());
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn empty_corpus_is_fatal() {
        let result = orchestrator(Arc::new(MemoryStore::new()), Arc::new(SynonymStore::in_memory()))
            .ingest(Arc::new(MemoryCorpus::default()))
            .await;
        assert!(matches!(result, Err(IngestError::EmptyCorpus(_))));
    }

    #[tokio::test]
    async fn corpus_of_stop_words_is_an_empty_context() {
        let synonyms = Arc::new(SynonymStore::in_memory());
        let result = orchestrator(Arc::new(MemoryStore::new()), synonyms.clone())
            .ingest(Arc::new(MemoryCorpus::new([("doc", "И что? А как же!")])))
            .await;

        assert!(matches!(result, Err(IngestError::EmptyContext)));
        assert!(!synonyms.is_ready());
    }
}
