use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embed_chunks::Embedder;
use crate::error::Result;
use crate::store_qdrant::VectorIndex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// A scored point as returned by the Qdrant search endpoint.
#[derive(Deserialize, Clone)]
pub(crate) struct Hit {
    pub score: f32,
    pub payload: Option<Payload>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Payload {
    pub content: Option<String>,
    pub source: Option<String>,
    pub chunk_index: Option<usize>,
}

impl Hit {
    /// Hits without a usable payload are dropped.
    pub(crate) fn into_result(self) -> Option<SearchResult> {
        let payload = self.payload?;
        Some(SearchResult {
            content: payload.content?,
            score: self.score,
            metadata: ChunkMetadata {
                source: payload.source.unwrap_or_default(),
                chunk_index: payload.chunk_index.unwrap_or_default(),
            },
        })
    }
}

/// Embeds `question` and returns the chunks that clear `score_threshold`, best first.
pub async fn retrieve_top(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    question: &str,
    top_k: usize,
    score_threshold: f32,
) -> Result<Vec<SearchResult>> {
    let query_vec = embedder.embed_one(question).await?;
    let mut hits = index.search(&query_vec, top_k, score_threshold).await?;
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    debug!("Retrieved {} chunks above {score_threshold}", hits.len());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_qdrant_hits() {
        let raw = json!([
            {"id": 1, "version": 3, "score": 0.91,
             "payload": {"content": "Pumps need priming.", "source": "pump.pdf", "chunkIndex": 4}},
            {"id": 2, "version": 3, "score": 0.7, "payload": null},
            {"id": 3, "version": 3, "score": 0.6, "payload": {"source": "x.pdf"}}
        ]);
        let hits: Vec<Hit> = serde_json::from_value(raw).unwrap();
        let results: Vec<SearchResult> = hits.into_iter().filter_map(Hit::into_result).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Pumps need priming.");
        assert_eq!(results[0].metadata.source, "pump.pdf");
        assert_eq!(results[0].metadata.chunk_index, 4);
    }
}
