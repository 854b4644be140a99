use std::sync::Arc;

use anyhow::Result;

use crate::models::ScoredChunk;
use crate::vector_index::VectorIndex;

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    k: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, k: usize) -> Self {
        Self { index, k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        let mut hits = self.index.similarity_search(query, self.k).await?;
        hits.truncate(self.k);
        tracing::debug!("retrieved {} chunks", hits.len());
        Ok(hits)
    }
}
