//! Embedding vector utilities
//!
//! Vectors are serialized as little-endian f32 BLOBs and L2-normalized before
//! storage, so cosine distance over stored vectors is equivalent to half the
//! squared euclidean distance.

#[cfg(feature = "vector-search")]
mod index;

#[cfg(feature = "vector-search")]
pub use index::{VectorIndex, VectorIndexError};

/// Serialize a vector as a little-endian f32 BLOB.
pub fn to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Deserialize a little-endian f32 BLOB. Returns `None` on a torn blob.
pub fn from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// L2-normalize in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude inputs rather
/// than erroring; callers treat that as "not similar".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Element-wise centroid of a set of vectors. `None` when the set is empty
/// or the dimensions disagree.
pub fn centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if vectors.iter().any(|v| v.len() != dims) {
        return None;
    }
    let mut sum = vec![0.0f32; dims];
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += x;
        }
    }
    let n = vectors.len() as f32;
    for s in sum.iter_mut() {
        *s /= n;
    }
    Some(sum)
}

/// Exponential moving average: `alpha * new + (1 - alpha) * old`.
///
/// Used for embedding reinforcement on re-observation. The result is
/// re-normalized so reinforced vectors stay on the unit sphere.
pub fn ema(old: &[f32], new: &[f32], alpha: f32) -> Vec<f32> {
    let mut out: Vec<f32> = old
        .iter()
        .zip(new.iter())
        .map(|(o, n)| alpha * n + (1.0 - alpha) * o)
        .collect();
    l2_normalize(&mut out);
    out
}
