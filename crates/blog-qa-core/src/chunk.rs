//! Sentence-aware, token-bounded text chunker with overlap.
//!
//! Splits post body text into chunks whose token count stays within
//! `max_tokens`. Splitting happens only at sentence boundaries (`.`, `?`,
//! or `!` followed by whitespace); a sentence is never cut in half, so a
//! single sentence longer than `max_tokens` becomes its own oversized chunk.
//!
//! When a chunk closes, the next one is seeded with the last
//! `overlap_tokens` tokens of the closed chunk so context carries across
//! the boundary. The carried overlap shrinks when keeping all of it would
//! push the new chunk past `max_tokens`, and never starts inside a
//! multi-byte character.
//!
//! Token counting is delegated to a [`Tokenizer`]. [`BpeTokenizer`] wraps
//! the byte-pair encodings used by OpenAI embedding models, so the budget
//! is measured in the same tokens the provider bills and truncates by.

use anyhow::{bail, Result};
use tiktoken_rs::{CoreBPE, Rank};

/// Default maximum tokens per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Default number of tokens carried from one chunk into the next.
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;

/// Encoding used by `text-embedding-3-small` and `text-embedding-3-large`.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Text tokenizer used to measure and cut chunks.
///
/// Decoding a contiguous run of tokens that starts on a character
/// boundary must yield the matching stretch of text.
pub trait Tokenizer: Send + Sync {
    type Token: Clone;

    fn encode(&self, text: &str) -> Vec<Self::Token>;

    fn decode(&self, tokens: &[Self::Token]) -> String;

    /// Whether `token` begins a character rather than continuing one.
    fn starts_char(&self, _token: &Self::Token) -> bool {
        true
    }

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Byte-pair tokenizer backed by `tiktoken-rs`.
#[derive(Clone)]
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    /// Load a named encoding (`cl100k_base` or `o200k_base`).
    pub fn for_encoding(name: &str) -> Result<Self> {
        let bpe = match name {
            "cl100k_base" => tiktoken_rs::cl100k_base()?,
            "o200k_base" => tiktoken_rs::o200k_base()?,
            other => bail!("Unknown tokenizer encoding: {}", other),
        };
        Ok(Self { bpe })
    }

    pub fn cl100k() -> Result<Self> {
        Self::for_encoding(DEFAULT_ENCODING)
    }
}

impl Tokenizer for BpeTokenizer {
    type Token = Rank;

    fn encode(&self, text: &str) -> Vec<Rank> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[Rank]) -> String {
        let bytes: Vec<u8> = self
            .bpe
            ._decode_native_and_split(tokens.to_vec())
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn starts_char(&self, token: &Rank) -> bool {
        self.bpe
            ._decode_native_and_split(vec![*token])
            .next()
            .and_then(|bytes| bytes.first().copied())
            .map_or(true, |b| b & 0xC0 != 0x80)
    }
}

/// Split text into sentences at `.`, `?`, or `!` followed by whitespace.
///
/// The boundary whitespace is dropped and each sentence is trimmed.
/// Blank sentences are skipped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if ch.is_whitespace() && matches!(prev, Some('.' | '?' | '!')) {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            let mut end = i + ch.len_utf8();
            while let Some(&(j, next)) = iter.peek() {
                if !next.is_whitespace() {
                    break;
                }
                end = j + next.len_utf8();
                iter.next();
            }
            start = end;
            prev = None;
            continue;
        }
        prev = Some(ch);
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split text into overlapping, token-bounded chunks.
///
/// Returns chunk texts in order; the chunk's position is its
/// `chunk_index`. Empty or whitespace-only input yields no chunks.
pub fn chunk_text<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<T::Token> = Vec::new();

    for sentence in split_sentences(text) {
        let sentence_tokens = if current.is_empty() {
            tokenizer.encode(sentence)
        } else {
            tokenizer.encode(&format!(" {}", sentence))
        };

        if current.len() + sentence_tokens.len() <= max_tokens {
            current.extend(sentence_tokens);
            continue;
        }

        if !current.is_empty() {
            chunks.push(decode_chunk(tokenizer, &current));
        }

        let mut carry = overlap_len(
            current.len(),
            overlap_tokens,
            sentence_tokens.len(),
            max_tokens,
        );
        while carry > 0 && !tokenizer.starts_char(&current[current.len() - carry]) {
            carry -= 1;
        }
        let mut next = current.split_off(current.len() - carry);
        if next.is_empty() {
            next = tokenizer.encode(sentence);
        } else {
            next.extend(sentence_tokens);
        }
        current = next;
    }

    if !current.is_empty() {
        chunks.push(decode_chunk(tokenizer, &current));
    }

    chunks
}

/// Number of tail tokens to carry into the next chunk.
fn overlap_len(closed_len: usize, overlap: usize, incoming: usize, max_tokens: usize) -> usize {
    overlap
        .min(closed_len)
        .min(max_tokens.saturating_sub(incoming))
}

/// Decode without trimming: dropping the space that leads a carried
/// overlap can re-tokenize the chunk past its budget.
fn decode_chunk<T: Tokenizer + ?Sized>(tokenizer: &T, tokens: &[T::Token]) -> String {
    tokenizer.decode(tokens)
}
