use std::env;
use std::path::PathBuf;

use anyhow::Result;

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Clone, Debug)]
pub struct TracingConfig {
    pub enabled: bool,
    pub project: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub openai: ProviderConfig,
    pub groq: ProviderConfig,
    pub embedding_model: String,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub chunking: ChunkingConfig,
    pub retrieval_k: usize,
    pub max_upload_bytes: usize,
    pub tracing: TracingConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("RAG_CHATBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("RAG_CHATBOT_BIND")
                .unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            data_dir,
            openai: ProviderConfig {
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            },
            groq: ProviderConfig {
                base_url: env::var("GROQ_BASE_URL")
                    .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
                api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            },
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "rag_chunks".to_string()),
            chunking: ChunkingConfig {
                chunk_size: parse_env("CHUNK_SIZE").unwrap_or(1_000),
                chunk_overlap: parse_env("CHUNK_OVERLAP").unwrap_or(200),
            },
            retrieval_k: parse_env("RETRIEVAL_K").unwrap_or(2),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES").unwrap_or(50 * 1024 * 1024),
            tracing: TracingConfig {
                enabled: env::var("LANGCHAIN_TRACING_V2")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(true),
                project: env::var("LANGCHAIN_PROJECT").unwrap_or_else(|_| "default".to_string()),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("CHUNK_SIZE must be greater than zero");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.retrieval_k == 0 {
            anyhow::bail!("RETRIEVAL_K must be greater than zero");
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("chatbot.sqlite3").display()
        )
    }
}

fn parse_env(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Mutex, MutexGuard};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 9] = [
        "RAG_CHATBOT_DATA_DIR",
        "RAG_CHATBOT_BIND",
        "CHUNK_SIZE",
        "CHUNK_OVERLAP",
        "RETRIEVAL_K",
        "MAX_UPLOAD_BYTES",
        "LANGCHAIN_TRACING_V2",
        "LANGCHAIN_PROJECT",
        "QDRANT_COLLECTION",
    ];

    fn clean_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for key in KEYS {
            env::remove_var(key);
        }
        guard
    }

    fn sample() -> AppConfig {
        crate::testing::test_config(Path::new("./data"))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = clean_env();
        let config = AppConfig::from_env();

        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.chunking.chunk_size, 1_000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval_k, 2);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert!(config.tracing.enabled);
        assert_eq!(config.tracing.project, "default");
        assert_eq!(config.qdrant_collection, "rag_chunks");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_are_read_from_env() {
        let _guard = clean_env();
        env::set_var("CHUNK_SIZE", "500");
        env::set_var("CHUNK_OVERLAP", "50");
        env::set_var("RETRIEVAL_K", "4");
        env::set_var("LANGCHAIN_TRACING_V2", "FALSE");
        env::set_var("LANGCHAIN_PROJECT", "support-bot");
        env::set_var("RAG_CHATBOT_DATA_DIR", "/var/lib/chatbot");

        let config = AppConfig::from_env();
        for key in KEYS {
            env::remove_var(key);
        }

        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval_k, 4);
        assert!(!config.tracing.enabled);
        assert_eq!(config.tracing.project, "support-bot");
        assert_eq!(config.upload_dir(), PathBuf::from("/var/lib/chatbot/uploads"));
    }

    #[test]
    fn tracing_toggle_is_case_insensitive() {
        let _guard = clean_env();
        env::set_var("LANGCHAIN_TRACING_V2", "True");
        let enabled = AppConfig::from_env().tracing.enabled;
        env::set_var("LANGCHAIN_TRACING_V2", "0");
        let disabled = AppConfig::from_env().tracing.enabled;
        env::remove_var("LANGCHAIN_TRACING_V2");

        assert!(enabled);
        assert!(!disabled);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let _guard = clean_env();
        env::set_var("RETRIEVAL_K", "two");
        env::set_var("CHUNK_SIZE", "-1");
        let config = AppConfig::from_env();
        for key in KEYS {
            env::remove_var(key);
        }

        assert_eq!(config.retrieval_k, 2);
        assert_eq!(config.chunking.chunk_size, 1_000);
    }

    #[test]
    fn fixture_config_passes_validation() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = sample();
        config.chunking.chunk_overlap = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retrieval_k_is_rejected() {
        let mut config = sample();
        config.retrieval_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sqlite_file_lives_under_data_dir() {
        assert!(sample().sqlite_dsn().ends_with("chatbot.sqlite3"));
    }

    #[test]
    fn upload_dir_lives_under_data_dir() {
        assert_eq!(sample().upload_dir(), PathBuf::from("./data/uploads"));
    }
}
