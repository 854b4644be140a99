use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;

const EMBED_BATCH_SIZE: usize = 64;

#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(provider: &ProviderConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
            model: model.into(),
        }
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        self.embed_batch(&[input.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedding endpoint returned no vectors"))
    }

    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let mut embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                anyhow::bail!(
                    "embedding endpoint returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.append(&mut embedded);
        }
        Ok(vectors)
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f32>,
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&EmbedReq {
                model: &self.model,
                input: inputs,
            })
            .send()
            .await
            .context("failed to call embeddings endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "embeddings endpoint returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let mut response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode embeddings response")?;

        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}

pub(crate) fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json
            .get("error")
            .and_then(|v| v.get("message").or(Some(v)))
            .and_then(|v| v.as_str())
        {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
