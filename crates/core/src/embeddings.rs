use crate::error::EmbeddingError;
use reqwest::blocking::Client;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Synchronous text-embedding contract shared by ingestion and query paths.
///
/// Implementations are built once and shared behind an `Arc`; they may block,
/// so async callers run them on a worker thread.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(token.as_bytes()) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

/// Client for a text-embeddings inference service (`POST {endpoint}/embed`).
///
/// The blocking client is created on first use, from the worker thread that
/// needs it, and then reused for every later call.
pub struct HttpEmbedder {
    endpoint: String,
    dimensions: usize,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            dimensions,
            timeout: Duration::from_secs(120),
            client: OnceLock::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> Result<&Client, EmbeddingError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().timeout(self.timeout).build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn check_dimensions(&self, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::BackendResponse("empty embedding batch".to_string()))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client()?
            .post(format!("{}/embed", self.endpoint))
            .json(&EmbedRequest { inputs: texts })
            .send()?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let vectors: Vec<Vec<f32>> = response.json()?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::BackendResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }

        self.check_dimensions(vectors)
    }
}
