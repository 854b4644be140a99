use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;

    async fn count_by_file_id(&self, file_id: &str) -> Result<usize>;

    async fn delete_by_file_id(&self, file_id: &str) -> Result<()>;
}
