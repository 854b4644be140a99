use std::time::Instant;

use anyhow::Result;

use crate::db::Database;
use crate::llm::{ChatModel, ModelRegistry};
use crate::models::{ChatMessage, ModelName, ScoredChunk};
use crate::retrieval::Retriever;

const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can be \
understood without the chat history. Do NOT answer the question, just reformulate it if needed \
and otherwise return it as is.";

const ANSWER_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Use the following context to answer the user's question.";

#[derive(Clone)]
pub struct ChatService {
    db: Database,
    models: ModelRegistry,
    retriever: Retriever,
}

impl ChatService {
    pub fn new(db: Database, models: ModelRegistry, retriever: Retriever) -> Self {
        Self {
            db,
            models,
            retriever,
        }
    }

    /// Errors from the LLM, the index or the chat log are returned as-is; there is no fallback
    /// answer.
    pub async fn answer(&self, question: &str, session_id: &str, model: ModelName) -> Result<String> {
        let started = Instant::now();

        let history = self.db.chat_history(session_id).await?;
        let llm = self.models.backend(model);

        let standalone = standalone_question(llm.as_ref(), question, &history).await?;
        let retrieved = self.retriever.retrieve(&standalone).await?;
        let messages = build_answer_messages(question, &format_context(&retrieved), &history);
        let answer = llm.complete(&messages).await?;

        self.db
            .insert_chat_log(session_id, question, &answer, model)
            .await?;

        tracing::info!(
            session_id,
            model = model.as_str(),
            history_messages = history.len(),
            retrieved = retrieved.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "answered chat question"
        );

        Ok(answer)
    }
}

async fn standalone_question(
    llm: &dyn ChatModel,
    question: &str,
    history: &[ChatMessage],
) -> Result<String> {
    if history.is_empty() {
        return Ok(question.to_string());
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONTEXTUALIZE_SYSTEM_PROMPT));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::human(question));

    let rewritten = llm.complete(&messages).await?;
    if rewritten.trim().is_empty() {
        return Ok(question.to_string());
    }
    Ok(rewritten)
}

fn format_context(retrieved: &[ScoredChunk]) -> String {
    retrieved
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_answer_messages(
    question: &str,
    context: &str,
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(ANSWER_SYSTEM_PROMPT));
    messages.push(ChatMessage::system(format!("Context: {context}")));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::human(question));
    messages
}
