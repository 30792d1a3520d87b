use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::error::{RagError, Result};
use crate::retrieve_chunks::{ChunkMetadata, SearchResult};
use crate::store_qdrant::{CollectionInfo, Distance, Point, VectorIndex};

/// Process-local [`VectorIndex`]. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    distance: Option<Distance>,
    vector_size: usize,
    points: HashMap<u64, Point>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.points.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Stored chunk indices for `source`, sorted.
    pub fn chunk_indices(&self, source: &str) -> Result<Vec<usize>> {
        let mut indices: Vec<usize> = self
            .read()?
            .points
            .values()
            .filter(|p| p.payload.source == source)
            .map(|p| p.payload.chunk_index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> RagError {
    RagError::upstream("memory-index", "lock poisoned")
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na * nb)
            }
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self, vector_size: usize, distance: Distance) -> Result<()> {
        let mut state = self.write()?;
        if state.distance.is_none() {
            info!("Creating in-memory collection ({vector_size} dims, {distance:?})");
            state.distance = Some(distance);
            state.vector_size = vector_size;
        }
        Ok(())
    }

    async fn upsert(&self, points: &[Point]) -> Result<()> {
        let mut state = self.write()?;
        let size = state.vector_size;
        if let Some(bad) = points
            .iter()
            .find(|p| size != 0 && p.vector.len() != size)
        {
            return Err(RagError::upstream(
                "memory-index",
                format!("point {} has {} dims, expected {size}", bad.id, bad.vector.len()),
            ));
        }
        for point in points {
            state.points.insert(point.id, point.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let state = self.read()?;
        let distance = state.distance.unwrap_or(Distance::Cosine);
        let mut results: Vec<SearchResult> = state
            .points
            .values()
            .map(|p| SearchResult {
                content: p.payload.content.clone(),
                score: score(distance, vector, &p.vector),
                metadata: ChunkMetadata {
                    source: p.payload.source.clone(),
                    chunk_index: p.payload.chunk_index,
                },
            })
            .filter(|r| r.score >= score_threshold)
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_by_source(&self, source: &str) -> Result<()> {
        self.write()?.points.retain(|_, p| p.payload.source != source);
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        Ok(CollectionInfo {
            points_count: self.read()?.points.len() as u64,
        })
    }
}
