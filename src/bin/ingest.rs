use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rag_chatbot::config::AppConfig;
use rag_chatbot::db::Database;
use rag_chatbot::documents::{DeleteOutcome, DocumentLibrary};
use rag_chatbot::embeddings::EmbeddingClient;
use rag_chatbot::ingest::{DocumentKind, Ingestor, ALLOWED_EXTENSIONS};
use rag_chatbot::qdrant_store::QdrantStore;
use rag_chatbot::vector_index::VectorIndex;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Index, list or remove chatbot documents without going through the API")]
struct Cli {
    /// Document to register and index (.pdf, .docx or .html)
    #[arg(long, conflicts_with_all = ["list", "delete"])]
    file: Option<PathBuf>,
    /// Print every registered document
    #[arg(long, default_value_t = false)]
    list: bool,
    /// Remove a document's chunks and record by file id
    #[arg(long, value_name = "FILE_ID", conflicts_with = "list")]
    delete: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    config.validate()?;

    let db = Database::new(&config).await?;
    let embedder = EmbeddingClient::new(&config.openai, config.embedding_model.clone());
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
        embedder,
    ));
    let library = DocumentLibrary::new(db, Ingestor::new(index, &config.chunking));

    if let Some(path) = cli.file {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .context("file path has no usable file name")?
            .to_string();
        if DocumentKind::from_filename(&filename).is_none() {
            anyhow::bail!(
                "unsupported file type; allowed types are: {}",
                ALLOWED_EXTENSIONS.join(", ")
            );
        }

        match library.register_and_index(&filename, &path).await {
            Ok(file_id) => println!("Indexed {filename} as {file_id}"),
            Err(err) => anyhow::bail!("failed to index {}: {:?}", filename, err),
        }
    } else if let Some(file_id) = cli.delete {
        match library.delete(&file_id).await {
            DeleteOutcome::Deleted => println!("Deleted {file_id}"),
            DeleteOutcome::IndexDeleteFailed => {
                anyhow::bail!("failed to delete {} from the vector index", file_id)
            }
            DeleteOutcome::RecordDeleteFailed => anyhow::bail!(
                "deleted {} from the vector index but not from the document store",
                file_id
            ),
        }
    } else if cli.list {
        for doc in library.list().await? {
            println!(
                "{}\t{}\t{}",
                doc.id,
                doc.upload_timestamp.to_rfc3339(),
                doc.filename
            );
        }
    } else {
        anyhow::bail!("nothing to do; pass --file, --list or --delete");
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
