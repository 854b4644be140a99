use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, ProviderConfig};
use crate::embeddings::normalize_err_body;
use crate::models::{ChatMessage, ModelName, Role};

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Clone)]
pub enum LlmBackend {
    OpenAi(ChatCompletionsClient),
    Groq(ChatCompletionsClient),
}

impl LlmBackend {
    pub fn openai(provider: &ProviderConfig, model: ModelName) -> Self {
        LlmBackend::OpenAi(ChatCompletionsClient::new(provider, model.as_str()))
    }

    pub fn groq(provider: &ProviderConfig, model: ModelName) -> Self {
        LlmBackend::Groq(ChatCompletionsClient::new(provider, model.as_str()))
    }

    fn provider_name(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi(_) => "openai",
            LlmBackend::Groq(_) => "groq",
        }
    }
}

#[async_trait]
impl ChatModel for LlmBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = match self {
            LlmBackend::OpenAi(client) | LlmBackend::Groq(client) => client,
        };
        client
            .chat(messages)
            .await
            .with_context(|| format!("{} chat completion failed", self.provider_name()))
    }
}

#[derive(Clone)]
pub struct ModelRegistry {
    llama: Arc<dyn ChatModel>,
    gpt: Arc<dyn ChatModel>,
}

impl ModelRegistry {
    pub fn new(llama: Arc<dyn ChatModel>, gpt: Arc<dyn ChatModel>) -> Self {
        Self { llama, gpt }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(LlmBackend::groq(&config.groq, ModelName::Llama)),
            Arc::new(LlmBackend::openai(&config.openai, ModelName::Gpt)),
        )
    }

    pub fn backend(&self, model: ModelName) -> Arc<dyn ChatModel> {
        match model {
            ModelName::Llama => self.llama.clone(),
            ModelName::Gpt => self.gpt.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(provider: &ProviderConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
            model: model.into(),
        }
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        #[derive(Serialize)]
        struct CompletionReq<'a> {
            model: &'a str,
            messages: Vec<WireMessage<'a>>,
            stream: bool,
        }

        #[derive(Serialize)]
        struct WireMessage<'a> {
            role: &'static str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct CompletionResp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            #[serde(default)]
            content: Option<String>,
        }

        let body = CompletionReq {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: wire_role(m.role),
                    content: &m.content,
                })
                .collect(),
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call chat completions endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "chat completions for {} returned {status}: {}",
                self.model,
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<CompletionResp>()
            .await
            .context("failed to decode chat completions response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completions returned no message content"))?;

        Ok(content.trim().to_string())
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::Human => "user",
        Role::Assistant => "assistant",
    }
}
