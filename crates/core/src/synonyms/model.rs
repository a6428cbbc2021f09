use crate::embeddings::fnv1a;
use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const MAGIC: &[u8; 8] = b"KBSYN01\n";

/// Trained word-similarity model.
///
/// `vectors` holds one unit-length vector per vocabulary word: the word row
/// and its n-gram rows, averaged and normalised by the trainer. `ngram_rows`
/// keeps the trained subword rows so words outside the vocabulary can still be
/// placed in the space.
#[derive(Debug, Clone, PartialEq)]
pub struct SynonymModel {
    dimensions: usize,
    min_n: usize,
    max_n: usize,
    buckets: u32,
    words: Vec<String>,
    vectors: Vec<Vec<f32>>,
    ngram_buckets: Vec<u32>,
    ngram_rows: Vec<Vec<f32>>,
    word_index: HashMap<String, usize>,
    ngram_index: HashMap<u32, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelHeader {
    dimensions: usize,
    min_n: usize,
    max_n: usize,
    buckets: u32,
    words: Vec<String>,
    ngram_buckets: Vec<u32>,
}

impl SynonymModel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dimensions: usize,
        min_n: usize,
        max_n: usize,
        buckets: u32,
        words: Vec<String>,
        vectors: Vec<Vec<f32>>,
        ngram_buckets: Vec<u32>,
        ngram_rows: Vec<Vec<f32>>,
    ) -> Self {
        let word_index = words
            .iter()
            .enumerate()
            .map(|(index, word)| (word.clone(), index))
            .collect();
        let ngram_index = ngram_buckets
            .iter()
            .enumerate()
            .map(|(index, bucket)| (*bucket, index))
            .collect();

        Self {
            dimensions,
            min_n,
            max_n,
            buckets,
            words,
            vectors,
            ngram_buckets,
            ngram_rows,
            word_index,
            ngram_index,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.words
    }

    pub fn contains(&self, word: &str) -> bool {
        self.word_index.contains_key(word)
    }

    pub fn word_vector(&self, word: &str) -> Option<Vec<f32>> {
        if let Some(index) = self.word_index.get(word) {
            return Some(self.vectors[*index].clone());
        }

        let known = subword_buckets(word, self.min_n, self.max_n, self.buckets)
            .into_iter()
            .filter_map(|bucket| self.ngram_index.get(&bucket))
            .collect::<Vec<_>>();
        if known.is_empty() {
            return None;
        }

        let mut vector = vec![0f32; self.dimensions];
        for row in &known {
            for (acc, value) in vector.iter_mut().zip(&self.ngram_rows[**row]) {
                *acc += value;
            }
        }
        Some(normalized(vector))
    }

    /// Nearest vocabulary words by cosine similarity, best first, never
    /// including `word` itself.
    pub fn most_similar(&self, word: &str, topn: usize) -> Vec<(String, f32)> {
        let Some(query) = self.word_vector(word) else {
            return Vec::new();
        };

        let mut scored = self
            .words
            .iter()
            .zip(&self.vectors)
            .filter(|(candidate, _)| candidate.as_str() != word)
            .map(|(candidate, vector)| (candidate, dot(&query, vector)))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored
            .into_iter()
            .take(topn)
            .map(|(candidate, score)| (candidate.clone(), score))
            .collect()
    }

    /// Writes the model next to `path` and renames it into place, so readers
    /// see either the previous file or the complete new one.
    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        let header = serde_json::to_vec(&ModelHeader {
            dimensions: self.dimensions,
            min_n: self.min_n,
            max_n: self.max_n,
            buckets: self.buckets,
            words: self.words.clone(),
            ngram_buckets: self.ngram_buckets.clone(),
        })?;

        let floats = (self.vectors.len() + self.ngram_rows.len()) * self.dimensions;
        let mut bytes = Vec::with_capacity(MAGIC.len() + 8 + header.len() + floats * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&header);
        for row in self.vectors.iter().chain(&self.ngram_rows) {
            for value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        write_atomically(path, &bytes)
    }

    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let bytes = fs::read(path)?;
        if bytes.len() < MAGIC.len() + 8 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(IngestError::ModelFormat(format!(
                "{} is not a synonym model file",
                path.display()
            )));
        }

        let mut length = [0u8; 8];
        length.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + 8]);
        let header_start = MAGIC.len() + 8;
        let header_end = usize::try_from(u64::from_le_bytes(length))
            .ok()
            .and_then(|len| header_start.checked_add(len))
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| IngestError::ModelFormat("truncated header".to_string()))?;
        let header: ModelHeader = serde_json::from_slice(&bytes[header_start..header_end])?;

        let row_bytes = header.dimensions * 4;
        let rows = header.words.len() + header.ngram_buckets.len();
        let body = &bytes[header_end..];
        if header.dimensions == 0 || body.len() != rows * row_bytes {
            return Err(IngestError::ModelFormat(format!(
                "expected {} vector bytes, found {}",
                rows * row_bytes,
                body.len()
            )));
        }

        let mut decoded = body.chunks_exact(row_bytes).map(|row| {
            row.chunks_exact(4)
                .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
                .collect::<Vec<f32>>()
        });
        let vectors: Vec<Vec<f32>> = decoded.by_ref().take(header.words.len()).collect();
        let ngram_rows: Vec<Vec<f32>> = decoded.collect();

        Ok(Self::new(
            header.dimensions,
            header.min_n,
            header.max_n,
            header.buckets,
            header.words,
            vectors,
            header.ngram_buckets,
            ngram_rows,
        ))
    }
}

/// Stages `bytes` in a uniquely named file next to `path`, then renames it over
/// `path`. Readers see either the previous file or the complete new one.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let parent = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };

    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(bytes)?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Hashed character n-grams of `<word>`, lengths `min_n..=max_n`.
pub(crate) fn subword_buckets(word: &str, min_n: usize, max_n: usize, buckets: u32) -> Vec<u32> {
    let padded: Vec<char> = format!("<{word}>").chars().collect();
    let mut ids = Vec::new();

    for n in min_n.max(1)..=max_n {
        if n > padded.len() {
            break;
        }
        for window in padded.windows(n) {
            let gram = window.iter().collect::<String>();
            ids.push((fnv1a(gram.as_bytes()) % buckets.max(1) as u64) as u32);
        }
    }

    ids
}

pub(crate) fn normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}
