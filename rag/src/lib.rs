mod build_prompt;
mod chunk_text;
mod config;
mod embed_chunks;
mod error;
mod extract_pdf;
mod generate;
mod http;
mod memory_index;
mod retrieve_chunks;
mod scan_files;
mod source_lock;
mod store_qdrant;
mod stream_answer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use build_prompt::{build_messages, format_context, ChatMessage, Role};
pub use chunk_text::{chunk_text, normalize_whitespace, split_document, DocumentChunk};
pub use config::{Config, VectorBackend};
pub use embed_chunks::{Embedder, OllamaEmbedder};
pub use error::{RagError, Result};
pub use extract_pdf::validate_upload;
pub use generate::{decode_chat_stream, ChatModel, LineDecoder, OllamaChat, TokenStream};
pub use memory_index::MemoryIndex;
pub use retrieve_chunks::{retrieve_top, ChunkMetadata, SearchResult};
pub use scan_files::scan_pdfs;
pub use source_lock::SourceLocks;
pub use store_qdrant::{point_id, CollectionInfo, Distance, Point, PointPayload, QdrantIndex, VectorIndex};
pub use stream_answer::{ChatEvent, ChatStream, DONE_MARKER, UNAVAILABLE_MESSAGE};

use stream_answer::{answer_stream, notice_stream};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub chunks_ingested: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub chat_model: String,
    pub embed_model: String,
    pub collection_name: String,
    pub vectors_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// The ingestion, chat and status entry points over one vector collection.
pub struct Rag {
    cfg: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chat_model: Arc<dyn ChatModel>,
    locks: SourceLocks,
}

impl Rag {
    pub fn new(
        cfg: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg: Arc::new(cfg),
            embedder,
            index,
            chat_model,
            locks: SourceLocks::new(),
        })
    }

    /// Builds the Ollama/Qdrant backed pipeline and prepares the collection.
    ///
    /// An unreachable vector store is only logged here; it will fail the first real call instead.
    pub async fn connect(cfg: Config) -> Result<Self> {
        let index: Arc<dyn VectorIndex> = match cfg.vector_store {
            VectorBackend::Qdrant => Arc::new(QdrantIndex::new(&cfg)?),
            VectorBackend::Memory => Arc::new(MemoryIndex::new()),
        };
        let embedder = Arc::new(OllamaEmbedder::new(&cfg)?);
        let chat_model = Arc::new(OllamaChat::new(&cfg)?);
        let rag = Self::new(cfg, embedder, index, chat_model)?;
        if let Err(err) = rag.ensure_collection().await {
            error!("Failed to prepare collection {}. Is Qdrant running? {err}", rag.cfg.collection);
        }
        Ok(rag)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub async fn ensure_collection(&self) -> Result<()> {
        self.index
            .ensure_collection(self.cfg.vector_size, self.cfg.distance)
            .await
    }

    /// Validates, extracts and indexes an uploaded PDF, replacing any earlier version of `filename`.
    pub async fn ingest_pdf(&self, bytes: Vec<u8>, filename: &str) -> Result<IngestReport> {
        validate_upload(&bytes, filename)?;
        info!("Received file: {filename} ({} bytes)", bytes.len());
        let text = extract_pdf::extract_text(bytes, filename).await?;
        self.ingest_text(&text, filename).await
    }

    /// Chunk, drop stale points, embed, upsert.
    pub async fn ingest_text(&self, text: &str, filename: &str) -> Result<IngestReport> {
        if filename.trim().is_empty() {
            return Err(RagError::invalid("missing file name"));
        }
        let _guard = self.locks.acquire(filename).await;
        info!("Starting ingestion: {filename}");

        let chunks = split_document(text, filename, self.cfg.chunk_size, self.cfg.chunk_overlap)?;
        info!("Text split into {} chunks", chunks.len());

        self.index.delete_by_source(filename).await?;
        if chunks.is_empty() {
            warn!("{filename} has no extractable text, nothing to index");
            return Ok(IngestReport { chunks_ingested: 0 });
        }

        let partial = |reason: RagError| RagError::PartialIngestion {
            document: filename.to_string(),
            reason: Box::new(reason),
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_many(&texts).await.map_err(partial)?;
        if vectors.len() != chunks.len() {
            return Err(partial(RagError::upstream(
                "ollama",
                format!("{} embeddings for {} chunks", vectors.len(), chunks.len()),
            )));
        }

        let points: Vec<Point> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Point {
                id: point_id(&chunk.source, chunk.chunk_index),
                vector,
                payload: PointPayload {
                    content: chunk.content,
                    source: chunk.source,
                    chunk_index: chunk.chunk_index,
                },
            })
            .collect();
        self.index.upsert(&points).await.map_err(partial)?;

        info!("Ingestion complete: {} chunks stored", points.len());
        Ok(IngestReport {
            chunks_ingested: points.len(),
        })
    }

    /// Ingests every PDF under `dir`; one failing file does not stop the others.
    ///
    /// Each file is indexed under its path relative to `dir`, so same-named
    /// files in different folders stay separate documents.
    pub async fn index_directory(&self, dir: &Path) -> Vec<(PathBuf, Result<IngestReport>)> {
        let files = scan_pdfs(dir, self.cfg.max_file_bytes);
        info!("Found {} PDF files under {}", files.len(), dir.display());
        let mut results = Vec::with_capacity(files.len());
        for path in files {
            let source = document_name(dir, &path);
            let outcome = match tokio::fs::read(&path).await {
                Ok(bytes) => self.ingest_pdf(bytes, &source).await,
                Err(e) => Err(RagError::invalid(format!("cannot read {}: {e}", path.display()))),
            };
            if let Err(err) = &outcome {
                warn!("Skipping {}: {err}", path.display());
            }
            results.push((path, outcome));
        }
        results
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatStream> {
        self.answer(&request.question, &request.history).await
    }

    /// Streams a grounded answer to `question`.
    ///
    /// Only an empty question is an error. Upstream failures arrive as a
    /// [`ChatEvent::Notice`]; every stream ends with [`ChatEvent::Done`].
    pub async fn answer(&self, question: &str, history: &[ChatMessage]) -> Result<ChatStream> {
        if question.trim().is_empty() {
            return Err(RagError::invalid("the question must not be empty"));
        }
        info!("Chat question: \"{question}\"");

        let hits = match retrieve_top(
            &*self.embedder,
            &*self.index,
            question,
            self.cfg.top_k,
            self.cfg.score_threshold,
        )
        .await
        {
            Ok(hits) => hits,
            Err(err) => {
                error!("Retrieval failed: {err}");
                return Ok(notice_stream(UNAVAILABLE_MESSAGE));
            }
        };

        if hits.is_empty() {
            return Ok(notice_stream(self.cfg.no_context_message.clone()));
        }

        let context = format_context(&hits);
        let messages = build_messages(&self.cfg.system_prompt, &context, history, question);
        match self.chat_model.chat_stream(&messages).await {
            Ok(tokens) => Ok(answer_stream(tokens)),
            Err(err) => {
                error!("Chat model unavailable: {err}");
                Ok(notice_stream(UNAVAILABLE_MESSAGE))
            }
        }
    }

    pub async fn status(&self) -> Result<Status> {
        let info = self.index.collection_info().await?;
        Ok(Status {
            chat_model: self.cfg.chat_model.clone(),
            embed_model: self.cfg.embed_model.clone(),
            collection_name: self.cfg.collection.clone(),
            vectors_count: info.points_count,
        })
    }
}

/// `/`-separated path of `path` below `dir`.
fn document_name(dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_names_are_relative_to_the_scanned_dir() {
        let dir = Path::new("/srv/docs");
        assert_eq!(document_name(dir, &dir.join("manual.pdf")), "manual.pdf");
        assert_eq!(
            document_name(dir, &dir.join("pumps").join("manual.pdf")),
            "pumps/manual.pdf"
        );
    }
}
