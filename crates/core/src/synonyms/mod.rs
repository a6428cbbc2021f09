//! Locally trained word-similarity model used to widen questions before they
//! are embedded.

mod model;
mod train;

pub use model::SynonymModel;
pub use train::{train, TrainingParams};

use crate::error::{IngestError, SearchError};
use crate::text::{split_sentences, TextAnalyzer};
use model::write_atomically;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const NEIGHBOURS: usize = 2;

/// Lemmatized, filtered token sequences of the whole corpus, one per sentence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSnapshot {
    sentences: Vec<Vec<String>>,
}

impl ContextSnapshot {
    pub fn new(sentences: Vec<Vec<String>>) -> Self {
        Self {
            sentences: sentences
                .into_iter()
                .filter(|sentence| !sentence.is_empty())
                .collect(),
        }
    }

    pub fn build<'a>(documents: impl IntoIterator<Item = &'a str>, analyzer: &TextAnalyzer) -> Self {
        let mut snapshot = Self::default();
        for document in documents {
            snapshot.push_document(document, analyzer);
        }
        snapshot
    }

    pub fn push_document(&mut self, text: &str, analyzer: &TextAnalyzer) {
        self.sentences.extend(
            split_sentences(text)
                .iter()
                .map(|sentence| analyzer.preprocess(sentence))
                .filter(|tokens| !tokens.is_empty()),
        );
    }

    pub fn sentences(&self) -> &[Vec<String>] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.iter().all(Vec::is_empty)
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomically(path, &json)
    }

    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let bytes = fs::read(path)?;
        let snapshot: Self = serde_json::from_slice(&bytes)?;
        Ok(Self::new(snapshot.sentences))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymPaths {
    pub model: PathBuf,
    pub context: PathBuf,
}

impl Default for SynonymPaths {
    fn default() -> Self {
        Self {
            model: PathBuf::from("data/synonyms.model"),
            context: PathBuf::from("data/context.json"),
        }
    }
}

/// Owned, versioned handle to the current synonym model.
///
/// Readers get either a complete model or `NotReady`; a retrain swaps the whole
/// `Arc`, so a query that already holds the previous model keeps using it.
#[derive(Debug)]
pub struct SynonymStore {
    paths: Option<SynonymPaths>,
    current: RwLock<Option<Arc<SynonymModel>>>,
    version: AtomicU64,
}

impl SynonymStore {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            current: RwLock::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Loads the model file when it exists; otherwise the store starts empty.
    pub fn open(paths: SynonymPaths) -> Result<Self, IngestError> {
        let store = Self {
            paths: Some(paths),
            current: RwLock::new(None),
            version: AtomicU64::new(0),
        };

        if let Some(paths) = &store.paths {
            if paths.model.is_file() {
                let model = SynonymModel::load(&paths.model)?;
                info!(
                    path = %paths.model.display(),
                    words = model.vocabulary().len(),
                    "synonym model loaded"
                );
                store.install(model);
            }
        }

        Ok(store)
    }

    /// Retrains from the persisted context snapshot when no model is installed.
    /// Returns whether a model was produced.
    pub fn restore(&self, params: &TrainingParams) -> Result<bool, IngestError> {
        if self.is_ready() {
            return Ok(false);
        }
        let Some(snapshot) = self.load_context()? else {
            return Ok(false);
        };
        if snapshot.is_empty() {
            warn!("persisted context snapshot is empty; synonym model stays absent");
            return Ok(false);
        }

        let model = train(&snapshot, params)?;
        self.persist_and_install(model)?;
        Ok(true)
    }

    pub fn current(&self) -> Result<Arc<SynonymModel>, SearchError> {
        self.current.read().clone().ok_or_else(|| {
            SearchError::NotReady("synonym model has not been trained yet".to_string())
        })
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn install(&self, model: SynonymModel) -> u64 {
        let mut current = self.current.write();
        *current = Some(Arc::new(model));
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Writes the model over the previous file, then makes it current.
    pub fn persist_and_install(&self, model: SynonymModel) -> Result<u64, IngestError> {
        if let Some(paths) = &self.paths {
            model.save(&paths.model)?;
        }
        Ok(self.install(model))
    }

    pub fn save_context(&self, snapshot: &ContextSnapshot) -> Result<(), IngestError> {
        match &self.paths {
            Some(paths) => snapshot.save(&paths.context),
            None => Ok(()),
        }
    }

    pub fn load_context(&self) -> Result<Option<ContextSnapshot>, IngestError> {
        match &self.paths {
            Some(paths) if paths.context.is_file() => ContextSnapshot::load(&paths.context).map(Some),
            _ => Ok(None),
        }
    }
}

/// Appends the nearest vocabulary neighbours of every question token.
///
/// The appended part is the de-duplicated union of the question's tokens and
/// their neighbours, in first-seen order.
pub fn expand(question: &str, model: &SynonymModel, analyzer: &TextAnalyzer) -> String {
    expand_with(question, model, analyzer, NEIGHBOURS)
}

fn expand_with(question: &str, model: &SynonymModel, analyzer: &TextAnalyzer, neighbours: usize) -> String {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for token in analyzer.preprocess(question) {
        let similar = model.most_similar(&token, neighbours);
        for term in std::iter::once(token).chain(similar.into_iter().map(|(word, _)| word)) {
            if seen.insert(term.clone()) {
                terms.push(term);
            }
        }
    }

    if terms.is_empty() {
        return question.to_string();
    }
    format!("{} {}", question, terms.join(" "))
}

#[derive(Debug, Clone)]
pub struct SynonymExpander {
    store: Arc<SynonymStore>,
    analyzer: Arc<TextAnalyzer>,
    neighbours: usize,
}

impl SynonymExpander {
    pub fn new(store: Arc<SynonymStore>, analyzer: Arc<TextAnalyzer>) -> Self {
        Self {
            store,
            analyzer,
            neighbours: NEIGHBOURS,
        }
    }

    pub fn analyzer(&self) -> &TextAnalyzer {
        &self.analyzer
    }

    pub fn store(&self) -> &Arc<SynonymStore> {
        &self.store
    }

    pub fn expand(&self, question: &str) -> Result<String, SearchError> {
        let model = self.store.current()?;
        Ok(expand_with(question, &model, &self.analyzer, self.neighbours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> TextAnalyzer {
        TextAnalyzer::russian().unwrap()
    }

    fn toy_model(analyzer: &TextAnalyzer) -> SynonymModel {
        SynonymModel::new(
            2,
            3,
            6,
            1_000,
            vec![
                analyzer.normal_form("счет"),
                analyzer.normal_form("баланс"),
                analyzer.normal_form("погода"),
            ],
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
            Vec::new(),
            Vec::new(),
        )
    }

    fn small_params() -> TrainingParams {
        TrainingParams {
            vector_size: 8,
            epochs: 2,
            buckets: 1_000,
            ..TrainingParams::default()
        }
    }

    #[test]
    fn snapshot_drops_sentences_without_tokens() {
        let analyzer = analyzer();
        let snapshot = ContextSnapshot::build(["Это тестовый файл. И что? Токеон — это компания."], &analyzer);
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.is_empty());
        assert!(snapshot.sentences().iter().flatten().all(|token| !analyzer.is_stop_word(token)));
    }

    #[test]
    fn snapshot_round_trips_as_pretty_json() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("context.json");
        let snapshot = ContextSnapshot::new(vec![vec!["токеон".to_string(), "компан".to_string()]]);

        snapshot.save(&path)?;
        let raw = fs::read_to_string(&path)?;
        assert!(raw.contains("\"токеон\""));
        assert!(raw.contains('\n'));
        assert_eq!(ContextSnapshot::load(&path)?, snapshot);
        Ok(())
    }

    #[test]
    fn empty_store_is_not_ready() {
        let store = SynonymStore::in_memory();
        assert!(!store.is_ready());
        assert!(store.current().unwrap_err().is_not_ready());
    }

    #[test]
    fn expand_without_model_is_not_ready() {
        let expander = SynonymExpander::new(Arc::new(SynonymStore::in_memory()), Arc::new(analyzer()));
        let err = expander.expand("вопрос").unwrap_err();
        assert!(err.is_not_ready());
    }

    #[test]
    fn install_swaps_model_and_bumps_version() {
        let analyzer = analyzer();
        let store = SynonymStore::in_memory();
        let first = store.install(toy_model(&analyzer));
        let held = store.current().unwrap();
        let second = store.install(toy_model(&analyzer));

        assert_eq!((first, second), (1, 2));
        assert_eq!(store.version(), 2);
        assert!(!Arc::ptr_eq(&held, &store.current().unwrap()));
    }

    #[test]
    fn expansion_appends_deduplicated_neighbours() {
        let analyzer = analyzer();
        let model = toy_model(&analyzer);
        let counted = analyzer.normal_form("счет");
        let balance = analyzer.normal_form("баланс");
        let weather = analyzer.normal_form("погода");

        let expanded = expand("счет баланс", &model, &analyzer);
        assert_eq!(expanded, format!("счет баланс {counted} {balance} {weather}"));
    }

    #[test]
    fn question_without_tokens_is_returned_as_is() {
        let analyzer = analyzer();
        assert_eq!(expand("что и как", &toy_model(&analyzer), &analyzer), "что и как");
    }

    #[test]
    fn open_without_files_leaves_store_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = SynonymStore::open(SynonymPaths {
            model: dir.path().join("synonyms.model"),
            context: dir.path().join("context.json"),
        })?;
        assert!(!store.is_ready());
        assert!(!store.restore(&small_params())?);
        Ok(())
    }

    #[test]
    fn restore_retrains_from_persisted_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let paths = SynonymPaths {
            model: dir.path().join("synonyms.model"),
            context: dir.path().join("context.json"),
        };
        let analyzer = analyzer();
        ContextSnapshot::build(["Токеон — это компания. Компания Токеон пополняет счета."], &analyzer)
            .save(&paths.context)?;

        let store = SynonymStore::open(paths.clone())?;
        assert!(store.restore(&small_params())?);
        assert!(store.is_ready());
        assert!(paths.model.is_file());

        let reopened = SynonymStore::open(paths)?;
        assert!(reopened.is_ready());
        assert_eq!(*reopened.current()?, *store.current()?);
        Ok(())
    }
}
