//! ANN index over trace embeddings
//!
//! In-memory HNSW (USearch) holding the store's trace embeddings, rebuilt
//! from the stored blobs at open. The store drives it through exactly two
//! operations: upserting a trace's vector (traces are re-embedded on EMA
//! reinforcement, so inserts must replace) and thresholded nearest-neighbor
//! queries. Any failure here is logged by the store and answered by the
//! exact O(n) scan instead, so errors carry a message and nothing more.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity (higher = better recall, more memory).
const CONNECTIVITY: usize = 16;

/// HNSW expansion factor while building.
const EXPANSION_ADD: usize = 128;

/// HNSW expansion factor while searching.
const EXPANSION_SEARCH: usize = 64;

/// Index failure. The store falls back to the exact scan on any of these.
#[derive(Debug, Clone)]
pub struct VectorIndexError(String);

impl std::fmt::Display for VectorIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vector index: {}", self.0)
    }
}

impl std::error::Error for VectorIndexError {}

/// HNSW index mapping trace IDs to their embedding vectors.
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
    keys: HashMap<String, u64>,
    labels: HashMap<u64, String>,
    next_key: u64,
}

impl VectorIndex {
    /// Create an empty index for the database's embedding dimension.
    pub fn new(dimensions: usize) -> Result<Self, VectorIndexError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index =
            Index::new(&options).map_err(|e| VectorIndexError(format!("create: {}", e)))?;
        Ok(Self {
            index,
            dimensions,
            keys: HashMap::new(),
            labels: HashMap::new(),
            next_key: 0,
        })
    }

    /// Number of indexed traces.
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimension of the index.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    // usearch needs capacity reserved ahead of add
    fn grow_for(&self, additional: usize) -> Result<(), VectorIndexError> {
        let needed = self.index.size() + additional;
        if needed > self.index.capacity() {
            let target = needed.next_power_of_two().max(16);
            self.index
                .reserve(target)
                .map_err(|e| VectorIndexError(format!("reserve: {}", e)))?;
        }
        Ok(())
    }

    /// Insert a trace's vector, replacing any vector already stored under
    /// the same trace ID (reinforcement rewrites embeddings in place).
    pub fn upsert(&mut self, trace_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.check_dimensions(vector)?;

        if let Some(&key) = self.keys.get(trace_id) {
            self.index
                .remove(key)
                .map_err(|e| VectorIndexError(format!("replace {}: {}", trace_id, e)))?;
            self.grow_for(1)?;
            return self
                .index
                .add(key, vector)
                .map_err(|e| VectorIndexError(format!("add {}: {}", trace_id, e)));
        }

        self.grow_for(1)?;
        let key = self.next_key;
        self.index
            .add(key, vector)
            .map_err(|e| VectorIndexError(format!("add {}: {}", trace_id, e)))?;
        self.next_key += 1;
        self.keys.insert(trace_id.to_string(), key);
        self.labels.insert(key, trace_id.to_string());
        Ok(())
    }

    /// Up to `limit` nearest traces at or above `min_similarity` cosine,
    /// best first.
    pub fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        self.check_dimensions(query)?;
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorIndexError(format!("search: {}", e)))?;

        let mut hits = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            // Cosine distance -> similarity
            let similarity = 1.0 - distance;
            if similarity < min_similarity {
                continue;
            }
            if let Some(trace_id) = self.labels.get(key) {
                hits.push((trace_id.clone(), similarity));
            }
        }
        Ok(hits)
    }
}
