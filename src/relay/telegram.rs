use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Chat {
    pub fn is_group(&self) -> bool {
        matches!(self.kind.as_str(), "group" | "supergroup")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        if let Some(username) = &self.username {
            return format!("@{username}");
        }
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        #[derive(Serialize)]
        struct Req {
            offset: i64,
            timeout: u64,
            allowed_updates: [&'static str; 1],
        }

        let request = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .timeout(Duration::from_secs(timeout_secs + 10))
            .json(&Req {
                offset,
                timeout: timeout_secs,
                allowed_updates: ["message"],
            });
        self.call(request, "getUpdates").await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Req<'a> {
            chat_id: i64,
            text: &'a str,
        }

        let request = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&Req { chat_id, text });
        let _: serde_json::Value = self.call(request, "sendMessage").await?;
        Ok(())
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        #[derive(Serialize)]
        struct Req<'a> {
            chat_id: i64,
            action: &'a str,
        }

        let request = self
            .client
            .post(format!("{}/sendChatAction", self.base_url))
            .json(&Req { chat_id, action });
        let _: bool = self.call(request, "sendChatAction").await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
    ) -> Result<T> {
        let envelope: Envelope<T> = request
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?
            .json()
            .await
            .with_context(|| format!("invalid telegram {method} response"))?;

        if !envelope.ok {
            anyhow::bail!(
                "telegram {} failed: {}",
                method,
                envelope.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        envelope
            .result
            .with_context(|| format!("telegram {method} returned no result"))
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::testing::spawn_server;

    async fn fake_bot_api() -> TelegramClient {
        let app = Router::new()
            .route(
                "/bottok/getUpdates",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "ok": true,
                        "result": [{
                            "update_id": body["offset"].as_i64().unwrap_or_default(),
                            "message": {
                                "chat": {"id": 5, "type": "private"},
                                "text": "hello"
                            }
                        }]
                    }))
                }),
            )
            .route(
                "/bottok/sendMessage",
                post(|| async {
                    Json(json!({"ok": false, "description": "Bad Request: chat not found"}))
                }),
            )
            .route(
                "/bottok/sendChatAction",
                post(|| async { Json(json!({"ok": true})) }),
            );
        TelegramClient::new(&spawn_server(app).await, "tok")
    }

    #[tokio::test]
    async fn get_updates_unwraps_result_envelope() {
        let client = fake_bot_api().await;
        let updates = client.get_updates(41, 1).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 41);
        assert_eq!(
            updates[0].message.as_ref().and_then(|m| m.text.as_deref()),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn failed_envelope_surfaces_description() {
        let client = fake_bot_api().await;
        let err = client.send_message(5, "hi").await.unwrap_err();
        assert!(format!("{err:#}").contains("chat not found"));
    }

    #[tokio::test]
    async fn ok_envelope_without_result_is_an_error() {
        let client = fake_bot_api().await;
        let err = client.send_chat_action(5, "typing").await.unwrap_err();
        assert!(err.to_string().contains("returned no result"));
    }

    #[test]
    fn parses_group_text_update() {
        let raw = r#"{
            "update_id": 7,
            "message": {
                "message_id": 1,
                "chat": {"id": -100, "type": "supergroup", "title": "team"},
                "from": {"id": 42, "is_bot": false, "first_name": "Sam", "username": "sam"},
                "text": "@FakeOrNotBot hello"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let message = update.message.unwrap();
        assert!(message.chat.is_group());
        assert_eq!(message.from.unwrap().display_name(), "@sam");
        assert_eq!(message.text.as_deref(), Some("@FakeOrNotBot hello"));
    }

    #[test]
    fn updates_without_message_are_tolerated() {
        let update: Update =
            serde_json::from_str(r#"{"update_id": 3, "edited_message": {}}"#).unwrap();
        assert!(update.message.is_none());
    }

    #[test]
    fn display_name_falls_back_to_full_name() {
        let user = User {
            id: 1,
            first_name: "Ada".to_string(),
            last_name: Some("Lovelace".to_string()),
            username: None,
        };
        assert_eq!(user.display_name(), "Ada Lovelace");
    }

    #[test]
    fn private_chats_are_not_groups() {
        let chat = Chat {
            id: 1,
            kind: "private".to_string(),
        };
        assert!(!chat.is_group());
    }
}
