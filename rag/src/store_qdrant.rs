use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::http::HttpClient;
use crate::retrieve_chunks::{Hit, SearchResult};

const SERVICE: &str = "qdrant";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
}

impl FromStr for Distance {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            other => Err(RagError::invalid(format!("unsupported distance `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointPayload {
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionInfo {
    pub points_count: u64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Creates the collection when it does not exist yet.
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()>;

    async fn upsert(&self, points: &[Point]) -> Result<()>;

    /// At most `top_k` hits with `score >= score_threshold`, best first.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    async fn delete_by_source(&self, source: &str) -> Result<()>;

    async fn collection_info(&self) -> Result<CollectionInfo>;
}

/// Stable id of a chunk: a 32-bit rolling hash over `"{source}_{chunk_index}"`.
///
/// Different chunks may collide; that is accepted.
pub fn point_id(source: &str, chunk_index: usize) -> u64 {
    let key = format!("{source}_{chunk_index}");
    let hash = key.encode_utf16().fold(0i32, |h, c| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(c))
    });
    i64::from(hash).unsigned_abs()
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Serialize)]
struct UpsertPoints<'a> {
    points: &'a [Point],
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: Option<T>,
}

#[derive(Deserialize)]
struct CollectionList {
    collections: Vec<CollectionName>,
}

#[derive(Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Deserialize)]
struct CollectionDetails {
    points_count: Option<u64>,
    indexed_vectors_count: Option<u64>,
}

pub struct QdrantIndex {
    http: HttpClient,
    base_url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(SERVICE, Duration::from_secs(cfg.http_timeout_secs))?,
            base_url: cfg.qdrant_url.clone(),
            collection: cfg.collection.clone(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let list = self
            .http
            .get_json::<QdrantResponse<CollectionList>>(&url)
            .await?;
        let exists = list
            .result
            .map(|r| r.collections.iter().any(|c| c.name == self.collection))
            .unwrap_or(false);
        if exists {
            info!("Collection \"{}\" already exists", self.collection);
            return Ok(());
        }

        info!("Creating Qdrant collection: {}", self.collection);
        let body = CreateCollection {
            vectors: VectorParams {
                size: vector_size,
                distance,
            },
        };
        self.http
            .put_json::<QdrantResponse<Value>, _>(&self.collection_url(), &body)
            .await?;
        info!("Collection created successfully");
        Ok(())
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let url = format!("{}/points?wait=true", self.collection_url());
        self.http
            .put_json::<QdrantResponse<Value>, _>(&url, &UpsertPoints { points })
            .await?;
        info!("Upserted {} vectors to Qdrant", points.len());
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let url = format!("{}/points/search", self.collection_url());
        let req = SearchRequest {
            vector,
            limit: top_k,
            score_threshold,
            with_payload: true,
        };
        let res = self
            .http
            .post_json::<QdrantResponse<Vec<Hit>>, _>(&url, &req)
            .await?;
        let mut results: Vec<SearchResult> = res
            .result
            .unwrap_or_default()
            .into_iter()
            .filter_map(Hit::into_result)
            .filter(|r| r.score >= score_threshold)
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_by_source(&self, source: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let body = json!({
            "filter": {
                "must": [{ "key": "source", "match": { "value": source } }]
            }
        });
        self.http
            .post_json::<QdrantResponse<Value>, _>(&url, &body)
            .await?;
        info!("Deleted vectors for source: {source}");
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let res = self
            .http
            .get_json::<QdrantResponse<CollectionDetails>>(&self.collection_url())
            .await?;
        let points_count = res
            .result
            .and_then(|d| d.points_count.or(d.indexed_vectors_count))
            .unwrap_or(0);
        Ok(CollectionInfo { points_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_stable() {
        assert_eq!(point_id("report.pdf", 3), point_id("report.pdf", 3));
        assert_ne!(point_id("a.pdf", 0), point_id("b.pdf", 0));
        assert_ne!(point_id("a.pdf", 0), point_id("a.pdf", 1));
    }

    #[test]
    fn point_id_matches_known_values() {
        // "a_0": h = 97, 97*31 + 95 = 3102, 3102*31 + 48 = 96210
        assert_eq!(point_id("a", 0), 96210);
        assert_eq!(point_id("", 0), ((95 * 31) + 48) as u64);
    }

    #[test]
    fn distance_parses_from_config_strings() {
        assert_eq!("Cosine".parse::<Distance>().ok(), Some(Distance::Cosine));
        assert_eq!("dot".parse::<Distance>().ok(), Some(Distance::Dot));
        assert!("Euclid".parse::<Distance>().is_err());
    }

    #[test]
    fn payload_uses_camel_case_keys() {
        let point = Point {
            id: 7,
            vector: vec![0.5],
            payload: PointPayload {
                content: "text".to_string(),
                source: "a.pdf".to_string(),
                chunk_index: 2,
            },
        };
        let value = serde_json::to_value(&point).unwrap();
        assert_eq!(value["payload"]["chunkIndex"], 2);
        assert_eq!(value["payload"]["source"], "a.pdf");
    }
}
