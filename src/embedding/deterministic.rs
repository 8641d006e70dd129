use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use super::{l2_normalize, EmbeddingProvider, EmbeddingVector};
use crate::error::EmbeddingError;

/// Model identifier recorded for deterministic vectors.
pub const DETERMINISTIC_MODEL: &str = "deterministic-sha256";

/// Offline stand-in for a real embedding model.
///
/// The same text always maps to the same unit vector, in this process and in
/// any other, because the RNG seed is the SHA-256 of the text.
pub struct DeterministicProvider {
    dims: usize,
}

impl DeterministicProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicProvider {
    fn model_name(&self) -> &str {
        DETERMINISTIC_MODEL
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        Ok(EmbeddingVector {
            vector: deterministic_vector(text, self.dims),
            model: DETERMINISTIC_MODEL.to_string(),
        })
    }
}

/// Uniform values in `[-1, 1)` drawn from an RNG seeded by `text`, then
/// L2-normalized.
pub fn deterministic_vector(text: &str, dims: usize) -> Vec<f32> {
    let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
    let mut rng = StdRng::from_seed(seed);
    let mut v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    l2_normalize(&mut v);
    v
}
