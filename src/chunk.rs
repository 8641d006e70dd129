//! Recursive, token-bounded text chunker.
//!
//! Splits text into overlapping segments whose `cl100k_base` token count never
//! exceeds `max_tokens`. Splitting tries structural boundaries in order
//! (paragraph, line, sentence, word) and only falls back to cutting between
//! characters when a single word is still too long.
//!
//! Separators stay attached to the piece they end, so the chunks are plain
//! slices of the input (modulo edge whitespace) and no words are lost.
//! Consecutive chunks repeat roughly `overlap_tokens` tokens of context.

use std::collections::VecDeque;

use anyhow::{bail, Result};

use crate::config::ChunkingConfig;
use crate::tokens::TokenCounter;

/// Boundaries tried from coarsest to finest. `""` means "between characters".
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone)]
pub struct Chunker {
    counter: TokenCounter,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Chunker {
    pub fn new(counter: TokenCounter, max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if max_tokens == 0 {
            bail!("max_tokens must be > 0");
        }
        if overlap_tokens >= max_tokens {
            bail!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                overlap_tokens,
                max_tokens
            );
        }
        Ok(Self {
            counter,
            max_tokens,
            overlap_tokens,
        })
    }

    pub fn from_config(counter: TokenCounter, config: &ChunkingConfig) -> Result<Self> {
        Self::new(counter, config.max_tokens, config.overlap_tokens)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Splits `text` into ordered chunks. Empty or whitespace-only input
    /// yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let idx = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len() - 1);
        let separator = separators[idx];
        let finer = &separators[idx + 1..];

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split_inclusive(separator).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if self.counter.count(piece) <= self.max_tokens {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }

            if finer.is_empty() {
                // A single character above the budget; nothing smaller exists.
                push_trimmed(&mut chunks, piece);
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }

        chunks
    }

    /// Greedily packs pieces into chunks, carrying trailing pieces worth up
    /// to `overlap_tokens` into the next chunk.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = self.counter.count(piece);

            if total + len > self.max_tokens && !window.is_empty() {
                push_trimmed(&mut out, &join(&window));

                while total > self.overlap_tokens || (total > 0 && total + len > self.max_tokens)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut out, &join(&window));
        }

        out
    }
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(out: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, overlap: usize) -> Chunker {
        Chunker::new(TokenCounter::new().unwrap(), max, overlap).unwrap()
    }

    /// Rebuilds a word sequence by dropping, for each chunk, the longest
    /// prefix that repeats the tail of what has been rebuilt so far.
    fn reconstruct(chunks: &[String]) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for chunk in chunks {
            let next: Vec<String> = chunk.split_whitespace().map(str::to_string).collect();
            let max_k = next.len().min(words.len());
            let k = (0..=max_k)
                .rev()
                .find(|&k| words[words.len() - k..] == next[..k])
                .unwrap_or(0);
            words.extend(next.into_iter().skip(k));
        }
        words
    }

    fn numbered_text(paragraphs: usize, sentences: usize, words: usize) -> String {
        let mut n = 0;
        (0..paragraphs)
            .map(|_| {
                (0..sentences)
                    .map(|_| {
                        (0..words)
                            .map(|_| {
                                n += 1;
                                format!("w{}", n)
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                            + "."
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let c = chunker(512, 50);
        assert!(c.split("").is_empty());
        assert!(c.split("  \n\n \t ").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunker(512, 50).split("hello world");
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunker(512, 50).split(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_chunks_respect_token_budget() {
        let c = chunker(40, 8);
        let text = numbered_text(6, 5, 12);
        let chunks = c.split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let tokens = c.counter().count(chunk);
            assert!(tokens <= 40, "chunk has {} tokens: {:?}", tokens, chunk);
        }
    }

    #[test]
    fn test_reconstruct_recovers_words() {
        let c = chunker(40, 8);
        let text = numbered_text(5, 4, 15);
        let chunks = c.split(&text);
        let original: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        assert_eq!(reconstruct(&chunks), original);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let c = chunker(30, 10);
        let text = (1..=200)
            .map(|i| format!("t{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = c.split(&text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].split_whitespace().any(|w| w == last_word),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_zero_overlap_has_no_repeats() {
        let c = chunker(20, 0);
        let text = (1..=120)
            .map(|i| format!("z{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = c.split(&text);
        let total_words: usize = chunks.iter().map(|c| c.split_whitespace().count()).sum();
        assert_eq!(total_words, 120);
    }

    #[test]
    fn test_long_word_is_hard_cut() {
        let c = chunker(16, 0);
        let word: String = "abcdefghij".repeat(40);
        let chunks = c.split(&word);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), word);
        for chunk in &chunks {
            assert!(c.counter().count(chunk) <= 16);
        }
    }

    #[test]
    fn test_deterministic() {
        let c = chunker(25, 5);
        let text = numbered_text(3, 3, 10);
        assert_eq!(c.split(&text), c.split(&text));
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        let counter = TokenCounter::new().unwrap();
        assert!(Chunker::new(counter.clone(), 10, 10).is_err());
        assert!(Chunker::new(counter, 0, 0).is_err());
    }
}
