use crate::traits::VectorIndex;
use crate::{ChunkId, IndexEntry, IndexError, ScoredText};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashSet;
use url::Url;
use uuid::Uuid;

const SCROLL_PAGE_SIZE: usize = 1_000;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, IndexError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{base}/collections/{}{suffix}",
            self.collection
        ))?)
    }

    /// Creates the collection with cosine distance when it does not exist.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url("")?).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url("")?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

/// Qdrant only accepts integers and UUIDs as point ids.
pub fn point_id(id: &ChunkId) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, id.as_str().as_bytes())
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn list_ids(&self) -> Result<HashSet<ChunkId>, IndexError> {
        let mut ids = HashSet::new();
        let mut offset = Value::Null;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": ["chunk_id"],
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.collection_url("/points/scroll")?)
                .json(&body)
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(ids);
            }
            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }

            let parsed: Value = response.json().await?;
            let (page, next) = parse_scroll_page(&parsed);
            ids.extend(page);

            match next {
                Some(next) => offset = next,
                None => return Ok(ids),
            }
        }
    }

    async fn insert(&self, batch: &[IndexEntry]) -> Result<(), IndexError> {
        let points = batch
            .iter()
            .map(|entry| {
                if entry.vector.len() != self.vector_size {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        entry.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&entry.id),
                    "vector": entry.vector,
                    "payload": {
                        "chunk_id": entry.id,
                        "text": entry.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let mut url = self.collection_url("/points")?;
        url.set_query(Some("wait=true"));
        let response = self
            .client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredText>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.collection_url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_search_hits(&parsed))
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url("")?).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        self.ensure_collection().await
    }
}

fn parse_scroll_page(parsed: &Value) -> (Vec<ChunkId>, Option<Value>) {
    let ids = parsed
        .pointer("/result/points")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(|point| point.pointer("/payload/chunk_id").and_then(Value::as_str))
                .map(|id| ChunkId::from(id.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let next = parsed
        .pointer("/result/next_page_offset")
        .filter(|value| !value.is_null())
        .cloned();

    (ids, next)
}

fn parse_search_hits(parsed: &Value) -> Vec<ScoredText> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .filter_map(|hit| {
            let id = hit.pointer("/payload/chunk_id").and_then(Value::as_str)?;
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            Some(ScoredText {
                id: ChunkId::from(id.to_string()),
                text: text.to_string(),
                score: score as f32,
            })
        })
        .collect()
}
