use crate::error::SearchError;
use crate::models::{Chunk, Distance, ScoredPoint};
use crate::traits::VectorStore;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

/// Qdrant over its REST API. Collection names go into the URL as escaped path
/// segments, so document names with spaces or Cyrillic are safe.
pub struct QdrantStore {
    endpoint: Url,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: &str) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            client: Client::new(),
        })
    }

    pub fn with_client(endpoint: &str, client: Client) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SearchError::Request(format!("{} cannot be a base url", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn parse(response: Response, action: &str) -> Result<Value, SearchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("{action} returned {status}: {body}"),
            });
        }
        Ok(response.json().await?)
    }
}

fn point_payload(chunk: &Chunk) -> Value {
    let mut payload = json!({
        "document_name": chunk.document_name,
        "parent_id": chunk.parent_id(),
        "tier": chunk.tier(),
    });
    if let Some(text) = chunk.text() {
        payload["text"] = json!(text);
    }
    payload
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn list_collections(&self) -> Result<Vec<String>, SearchError> {
        let response = self.client.get(self.url(&["collections"])?).send().await?;
        let parsed = Self::parse(response, "list collections").await?;

        Ok(parsed
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|collection| collection.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, SearchError> {
        let response = self
            .client
            .get(self.url(&["collections", name])?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::parse(response, "get collection").await?;
        Ok(true)
    }

    async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&["collections", name])?)
            .json(&json!({
                "vectors": {
                    "size": dimensions,
                    "distance": distance.as_qdrant(),
                }
            }))
            .send()
            .await?;
        Self::parse(response, "create collection").await?;
        debug!(collection = %name, dimensions, "qdrant collection created");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), SearchError> {
        let response = self
            .client
            .delete(self.url(&["collections", name])?)
            .send()
            .await?;
        Self::parse(response, "delete collection").await?;
        Ok(())
    }

    async fn upsert_points(&self, name: &str, chunks: &[Chunk]) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "vector": chunk.vector,
                    "payload": point_payload(chunk),
                })
            })
            .collect::<Vec<_>>();

        let mut url = self.url(&["collections", name, "points"])?;
        url.set_query(Some("wait=true"));

        let response = self
            .client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::parse(response, "upsert points").await?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, SearchError> {
        let response = self
            .client
            .post(self.url(&["collections", name, "points", "search"])?)
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "score_threshold": score_threshold,
                "with_payload": ["parent_id"],
            }))
            .send()
            .await?;
        let parsed = Self::parse(response, "search").await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(id) = hit.pointer("/id").and_then(Value::as_u64) else {
                continue;
            };
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let parent_id = hit
                .pointer("/payload/parent_id")
                .and_then(Value::as_u64)
                .unwrap_or(id);

            result.push(ScoredPoint { id, score, parent_id });
        }

        Ok(result)
    }

    async fn retrieve_text(&self, name: &str, id: u64) -> Result<Option<String>, SearchError> {
        let response = self
            .client
            .post(self.url(&["collections", name, "points"])?)
            .json(&json!({
                "ids": [id],
                "with_payload": ["text"],
                "with_vector": false,
            }))
            .send()
            .await?;
        let parsed = Self::parse(response, "retrieve points").await?;

        Ok(parsed
            .pointer("/result/0/payload/text")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_escaped_path_segments() {
        let store = QdrantStore::new("http://localhost:6333/").unwrap();
        let url = store.url(&["collections", "Договор оферты", "points"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6333/collections/%D0%94%D0%BE%D0%B3%D0%BE%D0%B2%D0%BE%D1%80%20%D0%BE%D1%84%D0%B5%D1%80%D1%82%D1%8B/points"
        );
    }

    #[test]
    fn small_chunk_payload_has_no_text() {
        let small = point_payload(&Chunk::small(3, "doc", 0, vec![0.0]));
        assert_eq!(small["parent_id"], json!(0));
        assert_eq!(small["tier"], json!("small"));
        assert!(small.get("text").is_none());

        let large = point_payload(&Chunk::large(0, "doc", "Токеон", vec![0.0]));
        assert_eq!(large["parent_id"], json!(0));
        assert_eq!(large["text"], json!("Токеон"));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert!(matches!(QdrantStore::new("not a url"), Err(SearchError::Url(_))));
    }
}
