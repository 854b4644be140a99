//! In-process stand-ins for the vector index and the LLM backends.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;

use crate::config::{AppConfig, ChunkingConfig, ProviderConfig, TracingConfig};
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Chunk, ChunkMetadata, ScoredChunk};
use crate::vector_index::VectorIndex;

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Configuration pointing at unroutable providers, rooted at `data_dir`.
pub fn test_config(data_dir: &Path) -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        openai: ProviderConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: String::new(),
        },
        groq: ProviderConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key: String::new(),
        },
        embedding_model: "text-embedding-ada-002".to_string(),
        qdrant_base_url: "http://127.0.0.1:9".to_string(),
        qdrant_collection: "test_chunks".to_string(),
        chunking: ChunkingConfig {
            chunk_size: 1_000,
            chunk_overlap: 200,
        },
        retrieval_k: 2,
        max_upload_bytes: 1024 * 1024,
        tracing: TracingConfig {
            enabled: true,
            project: "test".to_string(),
        },
    }
}

/// Scores chunks by the number of distinct lowercase words they share with the query.
#[derive(Default)]
pub struct MemoryIndex {
    chunks: Mutex<Vec<Chunk>>,
    queries: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    fail_searches: AtomicBool,
}

impl MemoryIndex {
    pub fn insert(&self, file_id: &str, text: &str) {
        self.chunks.lock().unwrap().push(Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                file_id: file_id.to_string(),
                source: format!("{file_id}.pdf"),
                page: None,
            },
        });
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("vector index unavailable");
        }
        self.chunks.lock().unwrap().extend_from_slice(chunks);
        Ok(())
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.fail_searches.load(Ordering::SeqCst) {
            anyhow::bail!("vector index unavailable");
        }
        self.queries.lock().unwrap().push(query.to_string());

        let query_words = words(query);
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .map(|chunk| ScoredChunk {
                score: words(&chunk.text).intersection(&query_words).count() as f32,
                chunk: chunk.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count_by_file_id(&self, file_id: &str) -> Result<usize> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.metadata.file_id == file_id)
            .count())
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("vector index unavailable");
        }
        self.chunks
            .lock()
            .unwrap()
            .retain(|c| c.metadata.file_id != file_id);
        Ok(())
    }
}

/// Replies with queued answers in order (or a fixed fallback) and records every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    fail: AtomicBool,
}

impl ScriptedModel {
    pub fn with_replies(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let model = Self::default();
        model.fail.store(true, Ordering::SeqCst);
        model
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("llm provider unavailable");
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "scripted answer".to_string()))
    }
}
