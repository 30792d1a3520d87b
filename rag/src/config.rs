use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{RagError, Result};
use crate::store_qdrant::Distance;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer only from the document context below. \
If the answer is not contained in the context, say plainly that you do not have that information. \
Answer in the language of the user's question.";

const DEFAULT_NO_CONTEXT_MESSAGE: &str = "I could not find relevant information in the documents.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorBackend {
    Qdrant,
    Memory,
}

impl FromStr for VectorBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(VectorBackend::Qdrant),
            "memory" => Ok(VectorBackend::Memory),
            other => Err(RagError::invalid(format!("unknown vector store `{other}`"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub ollama_url: String,
    pub embed_model: String,
    pub chat_model: String,
    pub qdrant_url: String,
    pub collection: String,
    pub distance: Distance,
    pub vector_size: usize,
    pub vector_store: VectorBackend,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub score_threshold: f32,
    pub system_prompt: String,
    pub no_context_message: String,
    pub docs_dir: String,
    pub max_file_bytes: u64,
    pub http_timeout_secs: u64,
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            chat_model: "llama3:8b".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            collection: "rag_documents".to_string(),
            distance: Distance::Cosine,
            // nomic-embed-text produces 768-dim vectors
            vector_size: 768,
            vector_store: VectorBackend::Qdrant,
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            score_threshold: 0.5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            no_context_message: DEFAULT_NO_CONTEXT_MESSAGE.to_string(),
            docs_dir: "./docs".to_string(),
            max_file_bytes: 50_000_000,
            http_timeout_secs: 120,
            log_dir: "./logs".to_string(),
        }
    }
}

impl Config {
    /// Reads the process environment (and `.env`, if present).
    ///
    /// A variable that is set but does not parse is an error naming the key.
    pub fn from_env() -> Result<Self> {
        // Load .env if present so the Ollama and Qdrant addresses work without manual `source .env`.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let url = |v: String| v.trim_end_matches('/').to_string();
        let parsed = |key: &'static str| Setting { key, raw: var(key) };

        Ok(Self {
            ollama_url: var("OLLAMA_BASE_URL")
                .or_else(|| var("OLLAMA_URL"))
                .map(url)
                .unwrap_or(defaults.ollama_url),
            embed_model: var("OLLAMA_EMBED_MODEL").unwrap_or(defaults.embed_model),
            chat_model: var("OLLAMA_CHAT_MODEL").unwrap_or(defaults.chat_model),
            qdrant_url: var("QDRANT_URL").map(url).unwrap_or(defaults.qdrant_url),
            collection: var("QDRANT_COLLECTION").unwrap_or(defaults.collection),
            distance: parsed("QDRANT_DISTANCE").or(defaults.distance)?,
            vector_size: parsed("RAG_VECTOR_SIZE").or(defaults.vector_size)?,
            vector_store: parsed("RAG_VECTOR_STORE").or(defaults.vector_store)?,
            chunk_size: parsed("RAG_CHUNK_SIZE").or(defaults.chunk_size)?,
            chunk_overlap: parsed("RAG_CHUNK_OVERLAP").or(defaults.chunk_overlap)?,
            top_k: parsed("RAG_TOP_K").or(defaults.top_k)?,
            score_threshold: parsed("RAG_SCORE_THRESHOLD").or(defaults.score_threshold)?,
            system_prompt: var("RAG_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            no_context_message: var("RAG_NO_CONTEXT_MESSAGE")
                .unwrap_or(defaults.no_context_message),
            docs_dir: var("RAG_DOCS_DIR").unwrap_or(defaults.docs_dir),
            max_file_bytes: parsed("RAG_MAX_FILE_BYTES").or(defaults.max_file_bytes)?,
            http_timeout_secs: parsed("RAG_HTTP_TIMEOUT_SECS").or(defaults.http_timeout_secs)?,
            log_dir: var("RAG_LOG_DIR").unwrap_or(defaults.log_dir),
        })
    }

    /// Checks the values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::invalid("RAG_CHUNK_SIZE must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::invalid(format!(
                "RAG_CHUNK_OVERLAP ({}) must be smaller than RAG_CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::invalid("RAG_TOP_K must be greater than zero"));
        }
        if self.vector_size == 0 {
            return Err(RagError::invalid("RAG_VECTOR_SIZE must be greater than zero"));
        }
        Ok(())
    }
}

struct Setting {
    key: &'static str,
    raw: Option<String>,
}

impl Setting {
    fn or<T>(self, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| {
                RagError::invalid(format!("{} has an invalid value `{raw}`: {e}", self.key))
            }),
        }
    }
}
