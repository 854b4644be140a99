pub mod chat;
pub mod config;
pub mod db;
pub mod documents;
pub mod embeddings;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod qdrant_store;
pub mod relay;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod vector_index;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use server::run_server;
