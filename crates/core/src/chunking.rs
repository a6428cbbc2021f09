use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::models::{Chunk, ChunkingConfig, DocumentChunks};
use std::collections::VecDeque;

/// Break points in priority order: document structure first, then blank
/// lines and single newlines, then sentence, word and character boundaries.
pub const BOUNDARY_SEPARATORS: [&str; 9] = [
    "\n\nГлава ",
    "\n\nРаздел ",
    "\n\nСтатья ",
    "\nПункт ",
    "\n\n",
    "\n",
    ". ",
    " ",
    "",
];

/// Recursive boundary-preference splitter. Sizes are counted in characters.
///
/// The first separator present in the text is used; pieces still larger than
/// the target are split again with the remaining, weaker separators. Adjacent
/// small pieces are merged back up to the target size, carrying up to
/// `overlap` characters of the previous chunk into the next one.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        Self::with_separators(chunk_size, overlap, &BOUNDARY_SEPARATORS)
    }

    pub fn with_separators(
        chunk_size: usize,
        overlap: usize,
        separators: &[&str],
    ) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            separators: separators.iter().map(|sep| sep.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut weaker: &[String] = &[];

        for (index, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                weaker = &[];
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                weaker = &separators[index + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }

            if weaker.is_empty() {
                if let Some(trimmed) = non_empty_trimmed(piece) {
                    chunks.push(trimmed);
                }
            } else {
                chunks.extend(self.split_with(piece, weaker));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }

        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_window(&window) {
                    merged.push(chunk);
                }

                while total > self.overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((*piece, len));
            total += len;
        }

        if let Some(chunk) = join_window(&window) {
            merged.push(chunk);
        }

        merged
    }
}

/// Splits before every occurrence of `separator`, so the separator stays at
/// the start of the following piece. An empty separator splits into characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined = window.iter().map(|(piece, _)| *piece).collect::<String>();
    non_empty_trimmed(&joined)
}

fn non_empty_trimmed(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// One large passage together with the search-granularity pieces cut from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub small: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    large: RecursiveSplitter,
    small: RecursiveSplitter,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        Ok(Self {
            large: RecursiveSplitter::new(config.large_size, config.large_overlap)?,
            small: RecursiveSplitter::new(config.small_size, config.small_overlap)?,
        })
    }

    pub fn passages(&self, text: &str) -> Vec<Passage> {
        let resplit_from = self.small.chunk_size() * 2;

        self.large
            .split(text)
            .into_iter()
            .map(|large| {
                let small = if char_len(&large) < resplit_from {
                    vec![large.clone()]
                } else {
                    self.small.split(&large)
                };
                Passage { text: large, small }
            })
            .collect()
    }

    /// Splits and embeds one document. Ids come from a single counter, so a
    /// large chunk is always followed by the ids of its own small chunks.
    pub fn chunk(
        &self,
        text: &str,
        document_name: &str,
        embedder: &dyn Embedder,
    ) -> Result<DocumentChunks, EmbeddingError> {
        let mut chunks = DocumentChunks::default();
        let mut next_id = 0u64;

        for passage in self.passages(text) {
            let mut inputs = Vec::with_capacity(passage.small.len() + 1);
            inputs.push(passage.text.clone());
            inputs.extend(passage.small.iter().cloned());

            let mut vectors = embedder.embed_many(&inputs)?.into_iter();
            let large_vector = vectors.next().ok_or_else(|| {
                EmbeddingError::BackendResponse("missing embedding for large chunk".to_string())
            })?;

            let parent_id = next_id;
            chunks
                .large
                .push(Chunk::large(parent_id, document_name, passage.text, large_vector));
            next_id += 1;

            for vector in vectors {
                chunks
                    .small
                    .push(Chunk::small(next_id, document_name, parent_id, vector));
                next_id += 1;
            }
        }

        Ok(chunks)
    }
}
