use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::embeddings::EmbeddingClient;
use crate::models::{Chunk, ChunkMetadata, ScoredChunk};
use crate::vector_index::VectorIndex;

const UPSERT_BATCH_SIZE: usize = 64;

#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    embedder: EmbeddingClient,
    known_vector_size: Arc<Mutex<Option<usize>>>,
}

impl QdrantStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        embedder: EmbeddingClient,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            embedder,
            known_vector_size: Arc::new(Mutex::new(None)),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    pub async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        // Held across lookup and creation so concurrent first writes create the collection once.
        let mut known = self.known_vector_size.lock().await;
        if let Some(existing) = *known {
            return check_vector_size(&self.collection, existing, vector_size);
        }

        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .context("failed to contact qdrant while checking collection")?;

        if response.status() == StatusCode::NOT_FOUND {
            self.create_collection(vector_size).await?;
        } else {
            let info = response
                .error_for_status()
                .context("qdrant collection lookup returned non-success status")?
                .json::<Value>()
                .await
                .context("failed to decode qdrant collection info")?;

            if let Some(existing) = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64)
            {
                check_vector_size(&self.collection, existing as usize, vector_size)?;
            }
        }

        *known = Some(vector_size);
        Ok(())
    }

    async fn create_collection(&self, vector_size: usize) -> Result<()> {
        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .client
            .put(self.collection_url())
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?;

        // Another writer created it between our lookup and this request.
        if response.status() == StatusCode::CONFLICT {
            tracing::debug!("qdrant collection {} already exists", self.collection);
            return Ok(());
        }

        response
            .error_for_status()
            .context("qdrant failed to create collection")?;

        tracing::info!(
            "created qdrant collection {} ({} dims)",
            self.collection,
            vector_size
        );
        Ok(())
    }

    pub async fn upsert_points(&self, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let vector_size = points[0].vector.len();
        self.ensure_collection(vector_size).await?;

        let upsert_url = format!("{}/points?wait=true", self.collection_url());
        let body = json!({ "points": points });

        self.client
            .put(upsert_url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during upsert")?
            .error_for_status()
            .context("qdrant upsert returned non-success status")?;

        Ok(())
    }

    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!("{}/points/search", self.collection_url());
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during search")?;

        let Some(response) = missing_collection_as_none(response)? else {
            return Ok(vec![]);
        };

        let response = response
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(ScoredChunk {
                    chunk: payload.into_chunk(),
                    score: point.score,
                })
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_documents(&texts)
            .await
            .context("failed to embed chunks")?;

        let points: Vec<QdrantPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| QdrantPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: QdrantPayload::from_chunk(chunk),
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            self.upsert_points(batch).await?;
        }

        Ok(())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self.embedder.embed_query(query).await?;
        self.search(&embedding, k).await
    }

    async fn count_by_file_id(&self, file_id: &str) -> Result<usize> {
        #[derive(Deserialize)]
        struct CountResponse {
            result: CountResult,
        }

        #[derive(Deserialize)]
        struct CountResult {
            count: usize,
        }

        let url = format!("{}/points/count", self.collection_url());
        let body = json!({
            "filter": file_id_filter(file_id),
            "exact": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during count")?;

        let Some(response) = missing_collection_as_none(response)? else {
            return Ok(0);
        };

        let response = response
            .json::<CountResponse>()
            .await
            .context("failed to decode qdrant count response")?;

        Ok(response.result.count)
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let body = json!({ "filter": file_id_filter(file_id) });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during delete")?;

        missing_collection_as_none(response)?;
        Ok(())
    }
}

fn check_vector_size(collection: &str, existing: usize, requested: usize) -> Result<()> {
    if existing != requested {
        anyhow::bail!(
            "collection {} holds {}-dimensional vectors, got {}",
            collection,
            existing,
            requested
        );
    }
    Ok(())
}

// A collection that was never created has no points.
fn missing_collection_as_none(response: Response) -> Result<Option<Response>> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response
        .error_for_status()
        .context("qdrant returned non-success status")?;
    Ok(Some(response))
}

fn file_id_filter(file_id: &str) -> Value {
    json!({
        "must": [
            { "key": "file_id", "match": { "value": file_id } }
        ]
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub text: String,
    pub file_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub page: Option<i64>,
}

impl QdrantPayload {
    fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            file_id: chunk.metadata.file_id.clone(),
            source: chunk.metadata.source.clone(),
            page: chunk.metadata.page,
        }
    }

    fn into_chunk(self) -> Chunk {
        Chunk {
            text: self.text,
            metadata: ChunkMetadata {
                file_id: self.file_id,
                source: self.source,
                page: self.page,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}
