//! Serde shapes for tokenizer definitions.
//!
//! A definition is produced by an external loader (downloaded, decompressed,
//! whatever) and handed over as JSON. Nothing here touches the filesystem
//! except [`TokenizerDefinition::from_path`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// GPT-2 pre-tokenization pattern, used when a BPE definition has none.
pub const DEFAULT_SPLIT_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// SentencePiece word-boundary glyph.
pub const METASPACE: char = '\u{2581}';

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum TokenizerDefinition {
    Unigram(UnigramDefinition),
    Bpe(BpeDefinition),
}

impl TokenizerDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnigramDefinition {
    /// `(surface, log score)` pairs; the index is the token id.
    pub vocab: Vec<(String, f64)>,
    pub unk_id: u32,
    pub eos_id: u32,
    #[serde(default)]
    pub special_tokens: Vec<SpecialToken>,
    #[serde(default)]
    pub normalizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub pre_tokenizer: Option<NormalizerConfig>,
    #[serde(default)]
    pub decoder: Option<NormalizerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpecialToken {
    pub id: u32,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BpeDefinition {
    pub vocab: HashMap<String, u32>,
    /// Merge rules in priority order; the position is the rank.
    #[serde(default)]
    pub merges: Vec<MergeEntry>,
    #[serde(default)]
    pub special_tokens: HashMap<String, u32>,
    #[serde(default)]
    pub split_pattern: Option<String>,
    #[serde(default)]
    pub max_encode_chars: Option<usize>,
    #[serde(default)]
    pub unk_id: Option<u32>,
}

/// A merge rule, either `"a b"` or `["a", "b"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    Pair(String, String),
    Joined(String),
}

impl MergeEntry {
    /// Split into the left and right symbols, `None` if a joined line is malformed.
    pub fn symbols(&self) -> Option<(&str, &str)> {
        match self {
            MergeEntry::Pair(a, b) => Some((a.as_str(), b.as_str())),
            MergeEntry::Joined(line) => {
                let (a, b) = line.split_once(' ')?;
                if a.is_empty() || b.is_empty() || b.contains(' ') {
                    return None;
                }
                Some((a, b))
            }
        }
    }
}

/// One step of a normalization pipeline, selected by its `type` tag.
///
/// The same shape fills the normalizer, pre-tokenizer and decoder slots of a
/// Unigram definition. Unknown tags are rejected by serde.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizerConfig {
    Metaspace {
        #[serde(default = "default_replacement")]
        replacement: char,
        #[serde(default = "default_true")]
        add_prefix_space: bool,
    },
    Precompiled {
        #[serde(default)]
        charsmap: HashMap<String, String>,
    },
    Sequence {
        #[serde(alias = "normalizers", alias = "pretokenizers", alias = "decoders")]
        steps: Vec<NormalizerConfig>,
    },
    WhitespaceSplit,
    Replace {
        pattern: String,
        content: String,
    },
    Prepend {
        prepend: String,
    },
    #[serde(rename = "NFC")]
    Nfc,
    #[serde(rename = "NFKC")]
    Nfkc,
    Lowercase,
}

fn default_replacement() -> char {
    METASPACE
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unigram_definition() {
        let json = r#"{
            "model": "unigram",
            "vocab": [["<unk>", 0.0], ["</s>", 0.0], ["▁a", -1.5]],
            "unk_id": 0,
            "eos_id": 1,
            "special_tokens": [{"id": 1, "content": "</s>"}],
            "normalizer": {"type": "Metaspace", "replacement": "▁", "add_prefix_space": true}
        }"#;
        let def = TokenizerDefinition::from_json(json).unwrap();
        let TokenizerDefinition::Unigram(u) = def else {
            panic!("expected unigram");
        };
        assert_eq!(u.vocab.len(), 3);
        assert_eq!(u.eos_id, 1);
        assert_eq!(
            u.normalizer,
            Some(NormalizerConfig::Metaspace { replacement: METASPACE, add_prefix_space: true })
        );
    }

    #[test]
    fn parses_bpe_definition_with_both_merge_shapes() {
        let json = r#"{
            "model": "bpe",
            "vocab": {"a": 0, "b": 1, "ab": 2},
            "merges": ["a b", ["ab", "b"]],
            "special_tokens": {"<SEP>": 3},
            "max_encode_chars": 64
        }"#;
        let TokenizerDefinition::Bpe(b) = TokenizerDefinition::from_json(json).unwrap() else {
            panic!("expected bpe");
        };
        assert_eq!(b.merges[0].symbols(), Some(("a", "b")));
        assert_eq!(b.merges[1].symbols(), Some(("ab", "b")));
        assert_eq!(b.max_encode_chars, Some(64));
        assert_eq!(b.special_tokens["<SEP>"], 3);
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let json = r#"{"type": "Bogus"}"#;
        assert!(serde_json::from_str::<NormalizerConfig>(json).is_err());
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(TokenizerDefinition::from_json(r#"{"model": "wordpiece"}"#).is_err());
    }

    #[test]
    fn sequence_accepts_hf_field_names() {
        let json = r#"{"type": "Sequence", "pretokenizers": [{"type": "WhitespaceSplit"}, {"type": "NFKC"}]}"#;
        let cfg: NormalizerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            cfg,
            NormalizerConfig::Sequence {
                steps: vec![NormalizerConfig::WhitespaceSplit, NormalizerConfig::Nfkc]
            }
        );
    }

    #[test]
    fn malformed_merge_line() {
        assert_eq!(MergeEntry::Joined("abc".into()).symbols(), None);
        assert_eq!(MergeEntry::Joined("a b c".into()).symbols(), None);
    }
}
