//! SentencePiece-style Unigram tokenizer.
//!
//! Encoding: sanitize → normalize → pre-tokenize → one lattice per piece,
//! candidates from the vocabulary trie, best path by Viterbi. The EOS id is
//! always appended.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::config::{NormalizerConfig, UnigramDefinition};
use crate::error::{Error, Result};
use crate::lattice::Lattice;
use crate::normalizer::Normalizer;
use crate::trie::Trie;

/// Penalty applied below the lowest vocabulary score for the unknown token.
const UNK_PENALTY: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct UnigramTokenizer {
    pieces: Vec<String>,
    scores: Vec<f64>,
    token_to_id: HashMap<String, u32>,
    trie: Trie,
    unk_id: u32,
    eos_id: u32,
    special_ids: HashSet<u32>,
    normalizer: Option<Normalizer>,
    pre_tokenizer: Option<Normalizer>,
    decoder: Option<Normalizer>,
}

impl UnigramTokenizer {
    pub fn new(def: &UnigramDefinition) -> Result<Self> {
        if def.vocab.is_empty() {
            return Err(Error::Config("unigram vocabulary is empty".into()));
        }
        let vocab_size = def.vocab.len();
        let check_id = |name: &str, id: u32| {
            if (id as usize) < vocab_size {
                Ok(())
            } else {
                Err(Error::Config(format!("{name} {id} is outside the vocabulary (size {vocab_size})")))
            }
        };
        check_id("unk_id", def.unk_id)?;
        check_id("eos_id", def.eos_id)?;
        let vocab_size_u32 = u32::try_from(vocab_size)
            .map_err(|_| Error::Config(format!("vocabulary size {vocab_size} exceeds u32")))?;

        let special_ids: HashSet<u32> = def.special_tokens.iter().map(|t| t.id).collect();

        let mut pieces = Vec::with_capacity(vocab_size);
        let mut scores = Vec::with_capacity(vocab_size);
        let mut token_to_id = HashMap::with_capacity(vocab_size);
        let mut trie = Trie::new();
        for (id, (piece, score)) in (0..vocab_size_u32).zip(&def.vocab) {
            pieces.push(piece.clone());
            scores.push(*score);
            if id == def.unk_id || special_ids.contains(&id) || piece.is_empty() {
                continue;
            }
            token_to_id.entry(piece.clone()).or_insert(id);
            trie.insert(piece);
        }

        let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
        scores[def.unk_id as usize] = min_score - UNK_PENALTY;

        let build = |slot: &Option<NormalizerConfig>| slot.as_ref().map(Normalizer::from_config).transpose();
        let normalizer = build(&def.normalizer)?;
        let pre_tokenizer = build(&def.pre_tokenizer)?;
        let decoder = build(&def.decoder)?;

        debug!(
            vocab_size,
            special_tokens = special_ids.len(),
            unk_score = scores[def.unk_id as usize],
            "unigram tokenizer initialized"
        );

        Ok(Self {
            pieces,
            scores,
            token_to_id,
            trie,
            unk_id: def.unk_id,
            eos_id: def.eos_id,
            special_ids,
            normalizer,
            pre_tokenizer,
            decoder,
        })
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        if text.is_empty() {
            return vec![self.eos_id];
        }
        let clean = sanitize(text);
        let normalized = match &self.normalizer {
            Some(n) => n.normalize(&clean),
            None => clean,
        };
        let pieces = match &self.pre_tokenizer {
            Some(p) => p.pre_tokenize(&normalized),
            None => vec![normalized],
        };

        let mut ids = Vec::new();
        for piece in pieces.iter().filter(|p| !p.is_empty()) {
            ids.extend(self.segment(piece));
        }
        ids.push(self.eos_id);
        ids
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let tokens: Vec<String> = ids.iter().map(|&id| self.surface(id)).collect();
        let chain = self.decoder.as_ref().or(self.pre_tokenizer.as_ref()).or(self.normalizer.as_ref());
        match chain {
            Some(d) => d.decode_chain(tokens).concat(),
            None => tokens.concat(),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.pieces.get(id as usize).map(String::as_str)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Score used during segmentation; the unknown token's is the biased one.
    pub fn score(&self, id: u32) -> Option<f64> {
        self.scores.get(id as usize).copied()
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    fn segment(&self, piece: &str) -> Vec<u32> {
        let offsets: Vec<usize> = piece.char_indices().map(|(i, _)| i).collect();
        let mut lattice = Lattice::new(offsets.len());
        let unk_score = self.scores[self.unk_id as usize];

        for (pos, &byte) in offsets.iter().enumerate() {
            let mut has_single = false;
            for m in self.trie.common_prefix_search(&piece[byte..]) {
                let Some(&id) = self.token_to_id.get(&m.text) else {
                    continue;
                };
                lattice.push_node(pos, m.char_len, id, self.scores[id as usize]);
                has_single |= m.char_len == 1;
            }
            if !has_single {
                trace!(pos, "no single-character piece, inserting unknown");
                lattice.push_node(pos, 1, self.unk_id, unk_score);
            }
        }
        lattice.viterbi()
    }

    fn surface(&self, id: u32) -> String {
        if id == self.unk_id {
            return format!("{} ", self.pieces[id as usize]);
        }
        if self.special_ids.contains(&id) {
            return String::new();
        }
        match self.pieces.get(id as usize) {
            Some(p) => p.clone(),
            None => format!("[{id}]"),
        }
    }
}

/// Drops `[]{}`, collapses whitespace runs, trims and lowercases.
fn sanitize(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '[' | ']' | '{' | '}')).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
