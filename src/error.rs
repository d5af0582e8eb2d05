use thiserror::Error;

/// Errors raised while building tokenizers or looking them up.
///
/// Encoding and decoding never fail; everything here happens at
/// construction time or at the facade boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Definition is structurally invalid (bad ids, empty vocab, malformed merges).
    #[error("invalid tokenizer definition: {0}")]
    Config(String),

    /// Definition JSON could not be parsed, including unknown `type`/`model` tags.
    #[error("cannot parse tokenizer definition: {0}")]
    Json(#[from] serde_json::Error),

    /// Split pattern failed to compile.
    #[error("invalid split pattern: {0}")]
    Regex(String),

    /// Lattice candidate that is empty or runs past the end of the text.
    #[error("invalid lattice span at {pos} with length {length} (text length {len})")]
    InvalidSpan { pos: usize, length: usize, len: usize },

    /// No tokenizer registered under this key.
    #[error("unknown tokenizer '{0}'")]
    UnknownTokenizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
