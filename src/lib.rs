//! Unigram and byte-level BPE tokenizers.
//!
//! Both engines are built once from a [`TokenizerDefinition`] and are
//! read-only afterwards, so a single instance can be shared across threads.
//! Encoding and decoding are total: unknown ids decode as `[id]` and
//! unsegmentable text falls back to the unknown token.
//!
//! ```rust,ignore
//! let tokenizer = lattok::Tokenizer::from_path("t5.json")?;
//! let ids = tokenizer.encode("Hello world");
//! let text = tokenizer.decode(&ids);
//! ```

pub mod bpe;
pub mod byte_level;
pub mod config;
pub mod error;
pub mod lattice;
pub mod normalizer;
pub mod tokenizer;
pub mod trie;
pub mod unigram;

pub use bpe::BpeTokenizer;
pub use config::{BpeDefinition, NormalizerConfig, TokenizerDefinition, UnigramDefinition};
pub use error::{Error, Result};
pub use lattice::Lattice;
pub use normalizer::Normalizer;
pub use tokenizer::{Registry, TokenObject, Tokenizer};
pub use trie::Trie;
pub use unigram::UnigramTokenizer;
