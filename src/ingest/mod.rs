pub mod docx;
pub mod html;
pub mod pdf;
pub mod splitter;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata};
use crate::vector_index::VectorIndex;
use splitter::RecursiveCharacterSplitter;

pub const ALLOWED_EXTENSIONS: [&str; 3] = [".pdf", ".docx", ".html"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Html,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();

        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "html" => Some(DocumentKind::Html),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Pdf => ".pdf",
            DocumentKind::Docx => ".docx",
            DocumentKind::Html => ".html",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub text: String,
    pub page: Option<i64>,
}

pub async fn load_document(path: &Path) -> Result<Vec<LoadedPage>> {
    let kind = path
        .to_str()
        .and_then(DocumentKind::from_filename)
        .ok_or_else(|| anyhow::anyhow!("unsupported file type: {}", path.display()))?;

    let owned = path.to_path_buf();
    match kind {
        DocumentKind::Pdf => pdf::load_pdf(path).await,
        DocumentKind::Docx => tokio::task::spawn_blocking(move || docx::load_docx(&owned))
            .await
            .context("DOCX loader task panicked")?,
        DocumentKind::Html => tokio::task::spawn_blocking(move || html::load_html(&owned))
            .await
            .context("HTML loader task panicked")?,
    }
}

#[derive(Clone)]
pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    splitter: RecursiveCharacterSplitter,
}

impl Ingestor {
    pub fn new(index: Arc<dyn VectorIndex>, chunking: &ChunkingConfig) -> Self {
        Self {
            index,
            splitter: RecursiveCharacterSplitter::new(
                chunking.chunk_size,
                chunking.chunk_overlap,
            ),
        }
    }

    /// Never fails: loader, splitter and index errors are logged and reported as `false`.
    pub async fn ingest(&self, path: &Path, file_id: &str) -> bool {
        match self.try_ingest(path, file_id).await {
            Ok(count) => {
                tracing::info!("indexed {} chunks for file_id {}", count, file_id);
                true
            }
            Err(err) => {
                tracing::error!("error indexing {} ({}): {:#}", path.display(), file_id, err);
                false
            }
        }
    }

    async fn try_ingest(&self, path: &Path, file_id: &str) -> Result<usize> {
        let pages = load_document(path).await?;
        let chunks = self.build_chunks(pages, &path.display().to_string(), file_id);
        if chunks.is_empty() {
            anyhow::bail!("no text chunks produced from {}", path.display());
        }

        self.index.add_chunks(&chunks).await?;
        Ok(chunks.len())
    }

    fn build_chunks(&self, pages: Vec<LoadedPage>, source: &str, file_id: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.splitter.split_text(&page.text) {
                chunks.push(Chunk {
                    text,
                    metadata: ChunkMetadata {
                        file_id: file_id.to_string(),
                        source: source.to_string(),
                        page: page.page,
                    },
                });
            }
        }
        chunks
    }

    pub async fn delete_document(&self, file_id: &str) -> bool {
        match self.index.count_by_file_id(file_id).await {
            Ok(count) => tracing::info!("found {} chunks for file_id {}", count, file_id),
            Err(err) => tracing::warn!("could not count chunks for file_id {}: {:#}", file_id, err),
        }

        match self.index.delete_by_file_id(file_id).await {
            Ok(()) => {
                tracing::info!("deleted all chunks with file_id {}", file_id);
                true
            }
            Err(err) => {
                tracing::error!(
                    "error deleting chunks with file_id {} from vector index: {:#}",
                    file_id,
                    err
                );
                false
            }
        }
    }
}

/// Loader-side cleanup shared by the PDF, DOCX and HTML loaders. Line breaks are kept so the
/// splitter can cut on paragraphs and lines.
pub(crate) fn clean_text(input: &str) -> String {
    input
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{00A0}', " ")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
