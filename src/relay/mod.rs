//! Telegram front end that forwards user messages to the chat endpoint and remembers one
//! session id per user for as long as the process lives.

pub mod telegram;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::RegexBuilder;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::models::{ModelName, QueryInput};
use telegram::{Message, TelegramClient, Update};

const CONNECT_APOLOGY: &str =
    "Sorry, I couldn't connect to the API service. Please try again later.";
const GENERIC_APOLOGY: &str = "Sorry, an error occurred. Please try again later.";
const UNPROCESSED_REPLY: &str = "Sorry, I couldn't process that";
const CLEARED_REPLY: &str = "Session cleared. Starting a new conversation.";

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bot_token: String,
    pub telegram_api_base: String,
    pub api_url: String,
    pub bot_username: String,
    pub log_dir: PathBuf,
    pub poll_timeout_secs: u64,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?,
            telegram_api_base: env::var("TELEGRAM_API_BASE")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            api_url: env::var("CHATBOT_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000/chatbot/chat".to_string()),
            bot_username: env::var("BOT_USERNAME").unwrap_or_else(|_| "@FakeOrNotBot".to_string()),
            log_dir: env::var("RELAY_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            poll_timeout_secs: env::var("RELAY_POLL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }
}

#[derive(Clone, Default)]
pub struct SessionBook {
    inner: Arc<Mutex<HashMap<i64, String>>>,
}

impl SessionBook {
    pub async fn get(&self, user_id: i64) -> Option<String> {
        self.inner.lock().await.get(&user_id).cloned()
    }

    pub async fn remember(&self, user_id: i64, session_id: String) {
        self.inner.lock().await.insert(user_id, session_id);
    }

    pub async fn reset(&self, user_id: i64) {
        self.inner.lock().await.remove(&user_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReply {
    pub text: String,
    pub session_id: Option<String>,
}

impl RelayReply {
    fn apology(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiRelay {
    client: Client,
    api_url: String,
}

impl ApiRelay {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
        }
    }

    pub async fn ask(&self, question: &str, session_id: Option<String>) -> RelayReply {
        tracing::info!(session_id = ?session_id, "sending request to chat api");

        let request = QueryInput {
            question: question.to_string(),
            session_id,
            model: ModelName::default(),
        };

        let response = match self.client.post(&self.api_url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("http request error: {}", err);
                return RelayReply::apology(CONNECT_APOLOGY);
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::error!("chat api error: status {}", status.as_u16());
            return RelayReply::apology(format!(
                "Error: Received status code {}. Please try again later.",
                status.as_u16()
            ));
        }

        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("unreadable chat api response: {}", err);
                return RelayReply::apology(GENERIC_APOLOGY);
            }
        };

        RelayReply {
            text: payload
                .get("answer")
                .and_then(Value::as_str)
                .unwrap_or(UNPROCESSED_REPLY)
                .to_string(),
            session_id: payload
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Clear,
}

fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = match first.split_once('@') {
        Some((name, target)) => {
            if !target.eq_ignore_ascii_case(bot_username.trim_start_matches('@')) {
                return None;
            }
            name
        }
        None => first,
    };
    match name {
        "/start" => Some(Command::Start),
        "/clear" => Some(Command::Clear),
        _ => None,
    }
}

/// Text to forward, or `None` when the bot should stay silent. Group chats must mention the
/// bot; every mention is removed without changing the case of the rest.
pub fn addressed_text(is_group: bool, text: &str, bot_username: &str) -> Option<String> {
    if !is_group {
        return Some(text.to_string());
    }

    let mention = RegexBuilder::new(&regex::escape(bot_username))
        .case_insensitive(true)
        .build()
        .ok()?;
    if !mention.is_match(text) {
        return None;
    }

    let stripped = mention.replace_all(text, "").trim().to_string();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped)
}

pub struct Relay {
    config: RelayConfig,
    telegram: TelegramClient,
    api: ApiRelay,
    sessions: SessionBook,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let telegram = TelegramClient::new(&config.telegram_api_base, &config.bot_token);
        let api = ApiRelay::new(config.api_url.clone());
        Self {
            config,
            telegram,
            api,
            sessions: SessionBook::default(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!("bot started, polling for messages");
        let mut offset = 0;
        loop {
            let updates = match self
                .telegram
                .get_updates(offset, self.config.poll_timeout_secs)
                .await
            {
                Ok(updates) => updates,
                Err(err) => {
                    tracing::warn!("polling failed: {:#}", err);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Err(err) = self.handle_update(update).await {
                    tracing::error!("error handling update: {:#}", err);
                }
            }
        }
    }

    pub async fn handle_update(&self, update: Update) -> Result<()> {
        let Some(message) = update.message else {
            return Ok(());
        };
        let Some(text) = message.text.clone() else {
            return Ok(());
        };
        let user_id = message.from.as_ref().map_or(message.chat.id, |user| user.id);

        if let Some(command) = parse_command(&text, &self.config.bot_username) {
            return self.handle_command(command, user_id, &message).await;
        }

        tracing::info!(
            user_id,
            chat_type = %message.chat.kind,
            "received message"
        );

        let Some(question) =
            addressed_text(message.chat.is_group(), &text, &self.config.bot_username)
        else {
            return Ok(());
        };

        if let Err(err) = self.telegram.send_chat_action(message.chat.id, "typing").await {
            tracing::debug!("typing indicator failed: {:#}", err);
        }

        let reply = self.api.ask(&question, self.sessions.get(user_id).await).await;
        if let Some(session_id) = reply.session_id {
            self.sessions.remember(user_id, session_id).await;
        }
        self.telegram.send_message(message.chat.id, &reply.text).await
    }

    async fn handle_command(&self, command: Command, user_id: i64, message: &Message) -> Result<()> {
        self.sessions.reset(user_id).await;
        let reply = match command {
            Command::Start => {
                tracing::info!(user_id, "user started a new session");
                let name = message
                    .from
                    .as_ref()
                    .map(|user| user.display_name())
                    .unwrap_or_else(|| "there".to_string());
                format!("Hello {name}, how may I help you?")
            }
            Command::Clear => {
                tracing::info!(user_id, "user cleared session");
                CLEARED_REPLY.to_string()
            }
        };
        self.telegram.send_message(message.chat.id, &reply).await
    }
}
