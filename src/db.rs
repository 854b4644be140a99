use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{ChatMessage, ChatTurn, DocumentRecord, ModelName};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn(), 10).await
    }

    // Private in-memory database; a single connection keeps every query on the same memory db.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_store (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                upload_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_query TEXT NOT NULL,
                llm_response TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_logs_session
                ON chat_logs (session_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_chat_log(
        &self,
        session_id: &str,
        user_query: &str,
        llm_response: &str,
        model: ModelName,
    ) -> Result<()> {
        if session_id.trim().is_empty() {
            anyhow::bail!("session id cannot be empty");
        }

        sqlx::query(
            r#"
            INSERT INTO chat_logs (session_id, user_query, llm_response, model, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(user_query)
        .bind(llm_response)
        .bind(model.as_str())
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn chat_turns(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, user_query, llm_response, model, created_at
            FROM chat_logs
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_turn).collect()
    }

    pub async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let turns = self.chat_turns(session_id).await?;
        let mut messages = Vec::with_capacity(turns.len() * 2);
        for turn in turns {
            messages.push(ChatMessage::human(turn.user_query));
            messages.push(ChatMessage::assistant(turn.llm_response));
        }
        Ok(messages)
    }

    pub async fn insert_document_record(&self, filename: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO document_store (id, filename, upload_date) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(filename)
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    pub async fn delete_document_record(&self, file_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_store WHERE id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_document_record(&self, file_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT id, filename, upload_date FROM document_store WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(row_to_document))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, upload_date
            FROM document_store
            ORDER BY upload_date DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Fixed-width so that lexical order in SQLite matches chronological order.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_turn(row: SqliteRow) -> Result<ChatTurn> {
    let model: String = row.get("model");
    let model = model
        .parse::<ModelName>()
        .with_context(|| format!("chat log {} has a corrupt model", row.get::<i64, _>("id")))?;

    Ok(ChatTurn {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_query: row.get("user_query"),
        llm_response: row.get("llm_response"),
        model,
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
    })
}

fn row_to_document(row: SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        upload_date: parse_timestamp(&row.get::<String, _>("upload_date")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn history_replays_turns_in_creation_order() {
        let db = Database::in_memory().await.unwrap();
        db.insert_chat_log("s1", "q1", "a1", ModelName::Llama)
            .await
            .unwrap();
        db.insert_chat_log("other", "x", "y", ModelName::Gpt)
            .await
            .unwrap();
        db.insert_chat_log("s1", "q2", "a2", ModelName::Gpt)
            .await
            .unwrap();

        let history = db.chat_history("s1").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(history[0].role, Role::Human);
        assert_eq!(history[1].role, Role::Assistant);

        let turns = db.chat_turns("s1").await.unwrap();
        assert_eq!(turns[1].model, ModelName::Gpt);
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.chat_history("never-seen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_model_in_log_is_reported() {
        let db = Database::in_memory().await.unwrap();
        db.insert_chat_log("s1", "q1", "a1", ModelName::Llama)
            .await
            .unwrap();
        sqlx::query("UPDATE chat_logs SET model = 'gpt-40'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.chat_history("s1").await.unwrap_err();
        assert!(format!("{err:#}").contains("gpt-40"));
    }

    #[tokio::test]
    async fn blank_session_id_is_not_logged() {
        let db = Database::in_memory().await.unwrap();
        assert!(db
            .insert_chat_log("   ", "q", "a", ModelName::Llama)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn documents_list_newest_first_and_delete() {
        let db = Database::in_memory().await.unwrap();
        let first = db.insert_document_record("a.pdf").await.unwrap();
        let second = db.insert_document_record("b.docx").await.unwrap();
        assert_ne!(first, second);

        let listed = db.list_documents().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].filename, "a.pdf");

        assert!(db.delete_document_record(&first).await.unwrap());
        assert!(!db.delete_document_record(&first).await.unwrap());
        assert!(db.get_document_record(&first).await.unwrap().is_none());
        assert_eq!(db.list_documents().await.unwrap().len(), 1);
    }
}
