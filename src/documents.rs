use std::path::Path;

use anyhow::Result;

use crate::db::Database;
use crate::ingest::Ingestor;
use crate::models::DocumentInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    RecordFailed(String),
    IndexingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    IndexDeleteFailed,
    RecordDeleteFailed,
}

#[derive(Clone)]
pub struct DocumentLibrary {
    db: Database,
    ingestor: Ingestor,
}

impl DocumentLibrary {
    pub fn new(db: Database, ingestor: Ingestor) -> Self {
        Self { db, ingestor }
    }

    pub async fn register_and_index(
        &self,
        filename: &str,
        path: &Path,
    ) -> Result<String, UploadError> {
        let file_id = self
            .db
            .insert_document_record(filename)
            .await
            .map_err(|err| {
                tracing::error!("error inserting document record for {}: {:#}", filename, err);
                UploadError::RecordFailed(err.to_string())
            })?;

        if self.ingestor.ingest(path, &file_id).await {
            tracing::info!("uploaded and indexed {} as {}", filename, file_id);
            return Ok(file_id);
        }

        match self.db.delete_document_record(&file_id).await {
            Ok(_) => tracing::warn!("rolled back document record {} for {}", file_id, filename),
            Err(err) => tracing::error!(
                "failed to roll back document record {} for {}: {:#}",
                file_id,
                filename,
                err
            ),
        }
        Err(UploadError::IndexingFailed)
    }

    pub async fn list(&self) -> Result<Vec<DocumentInfo>> {
        let records = self.db.list_documents().await?;
        Ok(records.into_iter().map(DocumentInfo::from).collect())
    }

    /// Index first, then the record; no compensation when only the second step fails.
    pub async fn delete(&self, file_id: &str) -> DeleteOutcome {
        if !self.ingestor.delete_document(file_id).await {
            return DeleteOutcome::IndexDeleteFailed;
        }

        match self.db.delete_document_record(file_id).await {
            Ok(true) => {
                tracing::info!("document {} deleted", file_id);
                DeleteOutcome::Deleted
            }
            Ok(false) => {
                tracing::warn!("no document record with id {}", file_id);
                DeleteOutcome::Deleted
            }
            Err(err) => {
                tracing::error!("error deleting document record {}: {:#}", file_id, err);
                DeleteOutcome::RecordDeleteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ChunkingConfig;
    use crate::testing::MemoryIndex;

    async fn library(index: Arc<MemoryIndex>) -> (DocumentLibrary, Database) {
        let db = Database::in_memory().await.unwrap();
        let chunking = ChunkingConfig {
            chunk_size: 1_000,
            chunk_overlap: 200,
        };
        let ingestor = Ingestor::new(index, &chunking);
        (DocumentLibrary::new(db.clone(), ingestor), db)
    }

    #[tokio::test]
    async fn upload_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.html");
        std::fs::write(&path, "<p>Turn it off and on again.</p>").unwrap();

        let index = Arc::new(MemoryIndex::default());
        let (library, _db) = library(index.clone()).await;

        let file_id = library
            .register_and_index("manual.html", &path)
            .await
            .unwrap();
        let listed = library.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, file_id);
        assert_eq!(listed[0].filename, "manual.html");
        assert_eq!(index.chunks()[0].metadata.file_id, file_id);

        assert_eq!(library.delete(&file_id).await, DeleteOutcome::Deleted);
        assert!(library.list().await.unwrap().is_empty());
        assert!(index.chunks().is_empty());
    }

    #[tokio::test]
    async fn failed_indexing_rolls_back_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.html");
        std::fs::write(&path, "<p>content</p>").unwrap();

        let index = Arc::new(MemoryIndex::default());
        index.fail_writes(true);
        let (library, _db) = library(index).await;

        let result = library.register_and_index("manual.html", &path).await;
        assert_eq!(result, Err(UploadError::IndexingFailed));
        assert!(library.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_delete_failure_keeps_the_record() {
        let index = Arc::new(MemoryIndex::default());
        let (library, db) = library(index.clone()).await;
        let file_id = db.insert_document_record("a.pdf").await.unwrap();

        index.fail_deletes(true);
        assert_eq!(
            library.delete(&file_id).await,
            DeleteOutcome::IndexDeleteFailed
        );
        assert!(db.get_document_record(&file_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn record_delete_failure_is_reported_separately() {
        let index = Arc::new(MemoryIndex::default());
        let (library, db) = library(index.clone()).await;
        index.insert("doc-1", "chunk text");

        sqlx::query("DROP TABLE document_store")
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(
            library.delete("doc-1").await,
            DeleteOutcome::RecordDeleteFailed
        );
        assert!(index.chunks().is_empty());
    }

    #[tokio::test]
    async fn deleting_unindexed_document_still_deletes_record() {
        let index = Arc::new(MemoryIndex::default());
        let (library, db) = library(index).await;
        let file_id = db.insert_document_record("empty.pdf").await.unwrap();

        assert_eq!(library.delete(&file_id).await, DeleteOutcome::Deleted);
        assert!(db.get_document_record(&file_id).await.unwrap().is_none());
    }
}
