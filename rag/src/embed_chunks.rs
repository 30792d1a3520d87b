use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::http::HttpClient;

const SERVICE: &str = "ollama";
const PROGRESS_EVERY: usize = 10;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// One request per text, in order. The first failure aborts the batch.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        info!("Generating embeddings for {} chunks", texts.len());
        let mut out = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if i % PROGRESS_EVERY == 0 {
                debug!("Embedding progress: {}/{}", i, texts.len());
            }
            out.push(self.embed_one(text).await?);
        }
        info!("Embeddings generated: {}", out.len());
        Ok(out)
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Serialize)]
struct EmbedLegacyRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

pub struct OllamaEmbedder {
    http: HttpClient,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SERVICE, Duration::from_secs(cfg.http_timeout_secs))?,
            base_url: cfg.ollama_url.clone(),
            model: cfg.embed_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let req = EmbedRequest {
            model: &self.model,
            input: text,
        };
        let res = match self.http.post_json::<Value, _>(&url, &req).await {
            Ok(res) => res,
            Err(err) => {
                debug!("/api/embed failed, retrying on /api/embeddings: {err}");
                let url = format!("{}/api/embeddings", self.base_url);
                let req = EmbedLegacyRequest {
                    model: &self.model,
                    prompt: text,
                };
                self.http.post_json::<Value, _>(&url, &req).await?
            }
        };
        first_embedding(res)
    }
}

fn first_embedding(value: Value) -> Result<Vec<f32>> {
    let vectors = parse_embeddings(&value)?;
    match vectors.into_iter().next() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RagError::upstream(SERVICE, "empty embedding in response")),
    }
}

fn parse_embeddings(value: &Value) -> Result<Vec<Vec<f32>>> {
    if let Some(embeddings) = value.get("embeddings") {
        return parse_embeddings_value(embeddings);
    }
    if let Some(embedding) = value.get("embedding") {
        return parse_embeddings_value(embedding);
    }
    Err(RagError::upstream(SERVICE, "no embeddings in response"))
}

fn parse_embeddings_value(value: &Value) -> Result<Vec<Vec<f32>>> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::upstream(SERVICE, "invalid embeddings format"))?;
    match arr.first() {
        None => Ok(vec![]),
        Some(first) if first.is_array() => arr.iter().map(parse_vec).collect(),
        Some(_) => Ok(vec![parse_vec(value)?]),
    }
}

fn parse_vec(value: &Value) -> Result<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::upstream(SERVICE, "embedding is not an array"))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|n| n as f32)
                .ok_or_else(|| RagError::upstream(SERVICE, "embedding value is not a number"))
        })
        .collect()
}
