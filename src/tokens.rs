//! Token counting with the embedding model's own tokenizer.
//!
//! `text-embedding-ada-002` uses the `cl100k_base` byte-pair encoding, so chunk
//! sizes measured here match what the embedding API will count.

use std::sync::Arc;

use anyhow::Result;
use tiktoken_rs::CoreBPE;

/// Name of the tokenization scheme.
pub const ENCODING_NAME: &str = "cl100k_base";

/// Counts `cl100k_base` tokens. Cheap to clone; the BPE tables are shared.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &ENCODING_NAME)
            .finish()
    }
}
