//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two interchangeable strategies:
//! - **[`DeterministicProvider`]**: reproducible pseudo-random unit vectors
//!   seeded by the text itself; pure, no network.
//! - **[`OpenAiProvider`]**: calls the OpenAI embeddings API and falls back
//!   to the deterministic vector on any transport or service error.
//!
//! [`Embedder`] wraps a provider with the input rules every strategy shares:
//! blank input yields `None`, input is truncated to `max_input_chars`
//! characters, and the output is checked for dimensionality and L2-normalized.
//!
//! Also provides [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage.
//!
//! # Strategy Selection
//!
//! The strategy is resolved once at startup with [`resolve_strategy`] and
//! passed explicitly to [`create_provider`]:
//!
//! ```rust
//! # use docvault::config::EmbeddingConfig;
//! # use docvault::embedding::{create_provider, EmbeddingStrategy};
//! let config = EmbeddingConfig::default();
//! let provider = create_provider(&config, &EmbeddingStrategy::Deterministic).unwrap();
//! assert_eq!(provider.dims(), 1536);
//! ```

mod deterministic;
mod openai;

pub use deterministic::{deterministic_vector, DeterministicProvider, DETERMINISTIC_MODEL};
pub use openai::OpenAiProvider;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// A computed vector together with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub vector: Vec<f32>,
    pub model: String,
}

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embeds one non-empty, already truncated text.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;
}

/// Which provider to build, decided once from configuration and credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum EmbeddingStrategy {
    Live { api_key: String },
    Deterministic,
}

impl fmt::Debug for EmbeddingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingStrategy::Live { .. } => f.write_str("Live { api_key: <redacted> }"),
            EmbeddingStrategy::Deterministic => f.write_str("Deterministic"),
        }
    }
}

/// Resolves the strategy from `embedding.provider` and credential presence.
///
/// | provider | credential set | strategy |
/// |----------|----------------|----------|
/// | `auto`   | yes            | live     |
/// | `auto`   | no             | deterministic |
/// | `openai` | yes            | live     |
/// | `openai` | no             | error    |
/// | `mock`   | –              | deterministic |
pub fn resolve_strategy(config: &EmbeddingConfig) -> Result<EmbeddingStrategy> {
    resolve_strategy_with_key(config, config.api_key())
}

fn resolve_strategy_with_key(
    config: &EmbeddingConfig,
    api_key: Option<String>,
) -> Result<EmbeddingStrategy> {
    match (config.provider.as_str(), api_key) {
        ("mock", _) => Ok(EmbeddingStrategy::Deterministic),
        ("auto" | "openai", Some(api_key)) => Ok(EmbeddingStrategy::Live { api_key }),
        ("auto", None) => {
            tracing::warn!(
                env = %config.api_key_env,
                "no embedding API key configured; using deterministic embeddings"
            );
            Ok(EmbeddingStrategy::Deterministic)
        }
        ("openai", None) => bail!(
            "{} environment variable not set (required by embedding.provider = \"openai\")",
            config.api_key_env
        ),
        (other, _) => bail!("Unknown embedding provider: {}", other),
    }
}

/// Builds the provider for a resolved strategy.
pub fn create_provider(
    config: &EmbeddingConfig,
    strategy: &EmbeddingStrategy,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match strategy {
        EmbeddingStrategy::Deterministic => Ok(Arc::new(DeterministicProvider::new(config.dims))),
        EmbeddingStrategy::Live { api_key } => {
            Ok(Arc::new(OpenAiProvider::new(config, api_key.clone())?))
        }
    }
}

/// Shared front door for all providers.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    max_input_chars: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, max_input_chars: usize) -> Self {
        Self {
            provider,
            max_input_chars,
        }
    }

    pub fn from_config(config: &EmbeddingConfig, strategy: &EmbeddingStrategy) -> Result<Self> {
        let provider = create_provider(config, strategy)?;
        Ok(Self::new(provider, config.max_input_chars))
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Embeds `text`, or returns `Ok(None)` when it is empty or whitespace.
    pub async fn embed(&self, text: &str) -> Result<Option<EmbeddingVector>, EmbeddingError> {
        if text.trim().is_empty() {
            tracing::warn!("empty text provided for embedding");
            return Ok(None);
        }

        let input = truncate_chars(text, self.max_input_chars);
        if input.len() < text.len() {
            tracing::debug!(
                chars = self.max_input_chars,
                "text too long for embedding, truncated"
            );
        }

        let mut out = self.provider.embed(input).await?;
        let expected = self.provider.dims();
        if out.vector.len() != expected {
            return Err(EmbeddingError::Dimensions {
                expected,
                actual: out.vector.len(),
            });
        }
        l2_normalize(&mut out.vector);
        Ok(Some(out))
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = ((*x as f64) / norm) as f32;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docvault::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
