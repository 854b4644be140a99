use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rag_chatbot::chat::ChatService;
use rag_chatbot::db::Database;
use rag_chatbot::documents::DocumentLibrary;
use rag_chatbot::embeddings::EmbeddingClient;
use rag_chatbot::ingest::Ingestor;
use rag_chatbot::llm::ModelRegistry;
use rag_chatbot::qdrant_store::QdrantStore;
use rag_chatbot::retrieval::Retriever;
use rag_chatbot::vector_index::VectorIndex;
use rag_chatbot::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    config.validate()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let db = Database::new(&config).await?;
    let embedder = EmbeddingClient::new(&config.openai, config.embedding_model.clone());
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
        embedder,
    ));

    let ingestor = Ingestor::new(index.clone(), &config.chunking);
    let library = DocumentLibrary::new(db.clone(), ingestor);

    let retriever = Retriever::new(index, config.retrieval_k);
    let chat = ChatService::new(db, ModelRegistry::from_config(&config), retriever);

    run_server(config, chat, library).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
