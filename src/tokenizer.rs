use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::bpe::BpeTokenizer;
use crate::config::TokenizerDefinition;
use crate::error::{Error, Result};
use crate::unigram::UnigramTokenizer;

/// Either engine behind one interface.
#[derive(Debug)]
pub enum Tokenizer {
    Unigram(UnigramTokenizer),
    Bpe(BpeTokenizer),
}

/// An emitted id paired with the decode of that id alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenObject {
    pub id: u32,
    pub text: String,
}

impl Tokenizer {
    pub fn from_definition(def: &TokenizerDefinition) -> Result<Self> {
        Ok(match def {
            TokenizerDefinition::Unigram(u) => Tokenizer::Unigram(UnigramTokenizer::new(u)?),
            TokenizerDefinition::Bpe(b) => Tokenizer::Bpe(BpeTokenizer::new(b)?),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_definition(&TokenizerDefinition::from_json(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_definition(&TokenizerDefinition::from_path(path)?)
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        match self {
            Tokenizer::Unigram(t) => t.encode(text),
            Tokenizer::Bpe(t) => t.encode(text),
        }
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        match self {
            Tokenizer::Unigram(t) => t.decode(ids),
            Tokenizer::Bpe(t) => t.decode(ids),
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match self {
            Tokenizer::Unigram(t) => t.count_tokens(text),
            Tokenizer::Bpe(t) => t.count_tokens(text),
        }
    }

    pub fn token_objects(&self, text: &str) -> Vec<TokenObject> {
        self.encode(text)
            .into_iter()
            .map(|id| TokenObject { id, text: self.decode(&[id]) })
            .collect()
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Tokenizer::Unigram(t) => t.vocab_size(),
            Tokenizer::Bpe(t) => t.vocab_size(),
        }
    }
}

/// Tokenizers addressed by key, e.g. `"t5"` or `"clip"`.
#[derive(Debug, Default)]
pub struct Registry {
    tokenizers: BTreeMap<String, Tokenizer>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the tokenizer under `key`.
    pub fn insert(&mut self, key: impl Into<String>, tokenizer: Tokenizer) {
        self.tokenizers.insert(key.into(), tokenizer);
    }

    pub fn get(&self, key: &str) -> Result<&Tokenizer> {
        self.tokenizers.get(key).ok_or_else(|| Error::UnknownTokenizer(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tokenizers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokenizers.is_empty()
    }

    pub fn encode(&self, key: &str, text: &str) -> Result<Vec<u32>> {
        Ok(self.get(key)?.encode(text))
    }

    pub fn decode(&self, key: &str, ids: &[u32]) -> Result<String> {
        Ok(self.get(key)?.decode(ids))
    }

    pub fn count_tokens(&self, key: &str, text: &str) -> Result<usize> {
        Ok(self.get(key)?.count_tokens(text))
    }

    pub fn token_objects(&self, key: &str, text: &str) -> Result<Vec<TokenObject>> {
        Ok(self.get(key)?.token_objects(text))
    }
}
