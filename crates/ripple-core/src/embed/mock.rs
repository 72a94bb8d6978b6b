//! Deterministic mock embedder.
//!
//! Produces hash-seeded, L2-normalized vectors so tests and offline runs can
//! exercise the semantic index without a real model.

use std::hash::{DefaultHasher, Hash, Hasher};

use super::{EmbedError, Embedder};

/// A mock embedder that derives vectors from the text's hash.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 64 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        let mut vector = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            // Mix the position back in so the vector is not 8-periodic.
            vector.push((bytes[i % 8] as f32 + (i as f32 * 0.37)) % 17.0 - 8.0);
        }

        let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut vector {
                *v *= inv;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_is_deterministic() {
        let embedder = MockEmbedder::new(32);
        assert_eq!(embedder.embed("hello").unwrap(), embedder.embed("hello").unwrap());
    }

    #[test]
    fn different_texts_differ() {
        let embedder = MockEmbedder::new(32);
        assert_ne!(embedder.embed("hello").unwrap(), embedder.embed("world").unwrap());
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = MockEmbedder::new(64);
        let vector = embedder.embed("normalize me").unwrap();
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "expected unit norm, got {norm}");
    }
}
