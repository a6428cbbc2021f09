use crate::error::IngestError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Source of named documents.
pub trait Corpus: Send + Sync {
    /// Document names in a stable order.
    fn document_names(&self) -> Vec<String>;

    fn read_document(&self, name: &str) -> Result<String, IngestError>;

    /// Where the documents come from, for messages.
    fn location(&self) -> String {
        "in-memory corpus".to_string()
    }
}

/// Plain-text files under a directory, named by file stem.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
    documents: BTreeMap<String, PathBuf>,
}

impl DirectoryCorpus {
    /// Walks `root` recursively for `*.txt` files. A `.txt` file passed as
    /// `root` is a corpus of one document.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, IngestError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(IngestError::InvalidArgument(format!(
                "corpus root {} does not exist",
                root.display()
            )));
        }

        let mut documents: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in discover_text_files(root) {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!(path = %path.display(), "skipping file with a non-utf8 name");
                continue;
            };
            if let Some(kept) = documents.get(name) {
                warn!(
                    document = %name,
                    kept = %kept.display(),
                    ignored = %path.display(),
                    "duplicate document name"
                );
                continue;
            }
            documents.insert(name.to_string(), path.clone());
        }

        Ok(Self {
            root: root.to_path_buf(),
            documents,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.documents.get(name).map(PathBuf::as_path)
    }
}

impl Corpus for DirectoryCorpus {
    fn document_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    fn read_document(&self, name: &str) -> Result<String, IngestError> {
        let path = self
            .documents
            .get(name)
            .ok_or_else(|| IngestError::DocumentNotFound(name.to_string()))?;
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

pub fn discover_text_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    documents: BTreeMap<String, String>,
}

impl MemoryCorpus {
    pub fn new<N, T>(documents: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            documents: documents
                .into_iter()
                .map(|(name, text)| (name.into(), text.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(name.into(), text.into());
    }
}

impl Corpus for MemoryCorpus {
    fn document_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    fn read_document(&self, name: &str) -> Result<String, IngestError> {
        self.documents
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::DocumentNotFound(name.to_string()))
    }
}
