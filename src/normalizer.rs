use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::config::NormalizerConfig;
use crate::error::{Error, Result};

/// A text transform applied before segmentation and undone after decoding.
///
/// Every step answers three questions: how to rewrite a string
/// ([`normalize`](Self::normalize)), how to cut it into pieces
/// ([`pre_tokenize`](Self::pre_tokenize)) and how to turn decoded surface
/// tokens back into text ([`decode_chain`](Self::decode_chain)).
#[derive(Debug, Clone, PartialEq)]
pub enum Normalizer {
    Metaspace { replacement: char, add_prefix_space: bool },
    Precompiled(HashMap<char, String>),
    Sequence(Vec<Normalizer>),
    WhitespaceSplit,
    Replace { pattern: String, content: String },
    Prepend(String),
    Nfc,
    Nfkc,
    Lowercase,
}

impl Normalizer {
    pub fn from_config(config: &NormalizerConfig) -> Result<Self> {
        Ok(match config {
            NormalizerConfig::Metaspace { replacement, add_prefix_space } => Normalizer::Metaspace {
                replacement: *replacement,
                add_prefix_space: *add_prefix_space,
            },
            NormalizerConfig::Precompiled { charsmap } => {
                let mut map = HashMap::with_capacity(charsmap.len());
                for (from, to) in charsmap {
                    let mut chars = from.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => {
                            map.insert(c, to.clone());
                        }
                        _ => {
                            return Err(Error::Config(format!(
                                "precompiled charsmap key {from:?} is not a single character"
                            )))
                        }
                    }
                }
                Normalizer::Precompiled(map)
            }
            NormalizerConfig::Sequence { steps } => Normalizer::Sequence(
                steps.iter().map(Normalizer::from_config).collect::<Result<_>>()?,
            ),
            NormalizerConfig::WhitespaceSplit => Normalizer::WhitespaceSplit,
            NormalizerConfig::Replace { pattern, content } => {
                if pattern.is_empty() {
                    return Err(Error::Config("Replace pattern must not be empty".into()));
                }
                Normalizer::Replace { pattern: pattern.clone(), content: content.clone() }
            }
            NormalizerConfig::Prepend { prepend } => Normalizer::Prepend(prepend.clone()),
            NormalizerConfig::Nfc => Normalizer::Nfc,
            NormalizerConfig::Nfkc => Normalizer::Nfkc,
            NormalizerConfig::Lowercase => Normalizer::Lowercase,
        })
    }

    pub fn normalize(&self, text: &str) -> String {
        match self {
            Normalizer::Metaspace { replacement, add_prefix_space } => {
                let mut out = String::with_capacity(text.len() + 3);
                if *add_prefix_space && !text.is_empty() && !text.starts_with(*replacement) && !text.starts_with(' ') {
                    out.push(*replacement);
                }
                for c in text.chars() {
                    out.push(if c == ' ' { *replacement } else { c });
                }
                out
            }
            Normalizer::Precompiled(map) => {
                let mut out = String::with_capacity(text.len());
                for c in text.chars() {
                    match map.get(&c) {
                        Some(s) => out.push_str(s),
                        None => out.push(c),
                    }
                }
                out
            }
            Normalizer::Sequence(_) | Normalizer::WhitespaceSplit => text.to_string(),
            Normalizer::Replace { pattern, content } => text.replace(pattern.as_str(), content.as_str()),
            Normalizer::Prepend(prefix) => format!("{}{}", prefix, text),
            Normalizer::Nfc => text.nfc().collect(),
            Normalizer::Nfkc => text.nfkc().collect(),
            Normalizer::Lowercase => text.to_lowercase(),
        }
    }

    /// Splits `text` into the pieces segmented independently.
    ///
    /// Non-splitting steps yield their normalized text as a single piece.
    pub fn pre_tokenize(&self, text: &str) -> Vec<String> {
        match self {
            Normalizer::WhitespaceSplit => text.split_whitespace().map(str::to_string).collect(),
            Normalizer::Sequence(steps) => {
                let mut pieces = vec![text.to_string()];
                for step in steps {
                    let mut next = Vec::with_capacity(pieces.len());
                    for piece in &pieces {
                        next.extend(step.pre_tokenize(piece));
                    }
                    pieces = next;
                }
                pieces
            }
            _ => vec![self.normalize(text)],
        }
    }

    pub fn decode_chain(&self, tokens: Vec<String>) -> Vec<String> {
        match self {
            Normalizer::Metaspace { replacement, add_prefix_space } => tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| {
                    let restored: String =
                        token.chars().map(|c| if c == *replacement { ' ' } else { c }).collect();
                    match restored.strip_prefix(' ') {
                        Some(rest) if i == 0 && *add_prefix_space => rest.to_string(),
                        _ => restored,
                    }
                })
                .collect(),
            _ => tokens,
        }
    }
}
