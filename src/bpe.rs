//! Byte-level BPE tokenizer.
//!
//! Encoding: optional fixed-size chunking → special tokens cut out with a
//! trie → regex pre-tokenization → byte-level mapping → rank-ordered merges.
//! Merges use a priority queue + linked-list skip structure, O(n log n) per word.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::{debug, trace};

use crate::byte_level;
use crate::config::{BpeDefinition, DEFAULT_SPLIT_PATTERN};
use crate::error::{Error, Result};
use crate::trie::Trie;

#[derive(Debug)]
pub struct BpeTokenizer {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<Option<String>>,
    /// distinct ids, special tokens included
    vocab_size: usize,
    /// left symbol → right symbol → rank
    merge_ranks: HashMap<String, HashMap<String, u32>>,
    special_tokens: HashMap<String, u32>,
    special_ids: HashSet<u32>,
    special_trie: Trie,
    split: fancy_regex::Regex,
    max_encode_chars: Option<usize>,
    unk_id: Option<u32>,
    byte_table: Box<[char; 256]>,
    char_to_byte: HashMap<char, u8>,
}

enum Segment<'a> {
    Special(u32),
    Text(&'a str),
}

impl BpeTokenizer {
    pub fn new(def: &BpeDefinition) -> Result<Self> {
        let pattern = def.split_pattern.as_deref().unwrap_or(DEFAULT_SPLIT_PATTERN);
        let split = fancy_regex::Regex::new(pattern).map_err(|e| Error::Regex(e.to_string()))?;

        if def.max_encode_chars == Some(0) {
            return Err(Error::Config("max_encode_chars must be positive".into()));
        }

        let mut merge_ranks: HashMap<String, HashMap<String, u32>> = HashMap::new();
        for (rank, entry) in def.merges.iter().enumerate() {
            let (left, right) = entry
                .symbols()
                .ok_or_else(|| Error::Config(format!("malformed merge rule #{rank}: {entry:?}")))?;
            let rank = u32::try_from(rank).map_err(|_| Error::Config("too many merge rules".into()))?;
            // first occurrence of a pair keeps its rank
            merge_ranks
                .entry(left.to_string())
                .or_default()
                .entry(right.to_string())
                .or_insert(rank);
        }

        let id_to_token = reverse_vocab(def)?;
        let vocab_size = id_to_token.iter().filter(|t| t.is_some()).count();

        if let Some(unk) = def.unk_id {
            if id_to_token.get(unk as usize).map_or(true, Option::is_none) {
                return Err(Error::Config(format!("unk_id {unk} is not in the vocabulary")));
            }
        }

        let mut special_trie = Trie::new();
        for token in def.special_tokens.keys() {
            if token.is_empty() {
                return Err(Error::Config("special token must not be empty".into()));
            }
            special_trie.insert(token);
        }

        let byte_table = Box::new(byte_level::byte_to_char_table());
        let char_to_byte = byte_level::char_to_byte_map(&byte_table);

        debug!(
            vocab_size,
            merges = def.merges.len(),
            special_tokens = def.special_tokens.len(),
            max_encode_chars = def.max_encode_chars,
            "bpe tokenizer initialized"
        );

        Ok(BpeTokenizer {
            token_to_id: def.vocab.clone(),
            id_to_token,
            vocab_size,
            merge_ranks,
            special_tokens: def.special_tokens.clone(),
            special_ids: def.special_tokens.values().copied().collect(),
            special_trie,
            split,
            max_encode_chars: def.max_encode_chars,
            unk_id: def.unk_id,
            byte_table,
            char_to_byte,
        })
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        for chunk in split_chunks(text, self.max_encode_chars) {
            for segment in self.split_special(chunk) {
                match segment {
                    Segment::Special(id) => ids.push(id),
                    Segment::Text(t) => {
                        for word in split_isolated(&self.split, t) {
                            self.encode_word(word, &mut ids);
                        }
                    }
                }
            }
        }
        ids
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        let mut buf: Vec<u8> = Vec::new();
        for &id in ids {
            let Some(token) = self.id_to_token(id) else {
                flush(&mut buf, &mut out);
                out.push_str(&format!("[{id}]"));
                continue;
            };
            if let Some(b) = byte_level::parse_byte_token(token) {
                buf.push(b);
                continue;
            }
            if !self.special_ids.contains(&id) {
                if let Some(bytes) = byte_level::decode_symbols(token, &self.char_to_byte) {
                    buf.extend_from_slice(&bytes);
                    continue;
                }
            }
            flush(&mut buf, &mut out);
            out.push_str(token);
        }
        flush(&mut buf, &mut out);
        out
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).and_then(Option::as_deref)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.special_tokens.get(token).or_else(|| self.token_to_id.get(token)).copied()
    }

    /// Cuts special tokens out of `chunk`, longest match first at each position.
    fn split_special<'a>(&self, chunk: &'a str) -> Vec<Segment<'a>> {
        if self.special_tokens.is_empty() {
            return vec![Segment::Text(chunk)];
        }
        let mut segments = Vec::new();
        let mut last = 0;
        let mut i = 0;
        while i < chunk.len() {
            if let Some(len) = self.special_trie.longest_prefix(&chunk[i..]) {
                if i > last {
                    segments.push(Segment::Text(&chunk[last..i]));
                }
                let token = &chunk[i..i + len];
                if let Some(&id) = self.special_tokens.get(token) {
                    segments.push(Segment::Special(id));
                }
                i += len;
                last = i;
            } else {
                i += chunk[i..].chars().next().map_or(1, char::len_utf8);
            }
        }
        if last < chunk.len() {
            segments.push(Segment::Text(&chunk[last..]));
        }
        segments
    }

    fn encode_word(&self, word: &str, ids: &mut Vec<u32>) {
        if word.is_empty() {
            return;
        }
        let symbols = byte_level::encode_bytes(word.as_bytes(), &self.byte_table);
        for (start, end) in self.merge(&symbols) {
            let symbol = &symbols[start..end];
            match self.token_to_id.get(symbol) {
                Some(&id) => ids.push(id),
                None => self.fallback(symbol, ids),
            }
        }
    }

    /// Per-character fallback for a merged symbol missing from the vocabulary:
    /// the single symbol, then its `<0xHH>` byte token, then the unknown id.
    fn fallback(&self, symbol: &str, ids: &mut Vec<u32>) {
        let mut buf = [0u8; 4];
        for c in symbol.chars() {
            if let Some(&id) = self.token_to_id.get(&*c.encode_utf8(&mut buf)) {
                ids.push(id);
                continue;
            }
            let byte_id = self
                .char_to_byte
                .get(&c)
                .and_then(|&b| self.token_to_id.get(&byte_level::byte_token(b)));
            match byte_id.copied().or(self.unk_id) {
                Some(id) => ids.push(id),
                None => trace!(symbol = %c, "dropping symbol with no vocabulary entry"),
            }
        }
    }

    fn rank(&self, left: &str, right: &str) -> Option<u32> {
        self.merge_ranks.get(left).and_then(|m| m.get(right)).copied()
    }

    /// Applies merges to a byte-level word and returns the final symbols as
    /// byte ranges into `word`, in order.
    fn merge(&self, word: &str) -> Vec<(usize, usize)> {
        // Each part starts as one byte-level character.
        let mut parts: Vec<(usize, usize)> =
            word.char_indices().map(|(i, c)| (i, i + c.len_utf8())).collect();
        let n = parts.len();
        if n <= 1 {
            return parts;
        }

        let mut next: Vec<usize> = (1..=n).collect();
        let mut prev: Vec<usize> = (0..n).map(|i| if i == 0 { usize::MAX } else { i - 1 }).collect();
        let mut alive = vec![true; n];
        // Generation counters to cheaply invalidate stale heap entries.
        let mut gen: Vec<u32> = vec![0; n];
        let mut heap: BinaryHeap<Reverse<(u32, usize, u32)>> = BinaryHeap::with_capacity(n);

        let pair_rank = |i: usize, parts: &[(usize, usize)], next: &[usize]| -> Option<u32> {
            let j = next[i];
            if j >= n {
                return None;
            }
            self.rank(&word[parts[i].0..parts[i].1], &word[parts[j].0..parts[j].1])
        };

        for i in 0..n - 1 {
            if let Some(rank) = pair_rank(i, &parts, &next) {
                heap.push(Reverse((rank, i, 0)));
            }
        }

        while let Some(Reverse((rank, i, g))) = heap.pop() {
            if !alive[i] || gen[i] != g {
                continue;
            }
            let j = next[i];
            if j >= n || !alive[j] {
                continue;
            }
            // parts[i] or parts[j] may have grown since the push
            if pair_rank(i, &parts, &next) != Some(rank) {
                continue;
            }

            parts[i].1 = parts[j].1;
            gen[i] += 1;
            alive[j] = false;
            let k = next[j];
            next[i] = k;
            if k < n {
                prev[k] = i;
            }

            if prev[i] != usize::MAX && alive[prev[i]] {
                let p = prev[i];
                if let Some(r) = pair_rank(p, &parts, &next) {
                    heap.push(Reverse((r, p, gen[p])));
                }
            }
            if next[i] < n {
                if let Some(r) = pair_rank(i, &parts, &next) {
                    heap.push(Reverse((r, i, gen[i])));
                }
            }
        }

        let mut out = Vec::new();
        let mut i = 0;
        while i < n {
            out.push(parts[i]);
            i = next[i];
        }
        out
    }
}

/// Dense id → token table over vocab and special tokens.
///
/// Ids must stay below the number of entries, and an id shared by two
/// entries must name the same string.
fn reverse_vocab(def: &BpeDefinition) -> Result<Vec<Option<String>>> {
    let bound = def.vocab.len() + def.special_tokens.len();
    let mut id_to_token: Vec<Option<String>> = vec![None; bound];
    for (token, &id) in def.vocab.iter().chain(def.special_tokens.iter()) {
        let slot = id_to_token.get_mut(id as usize).ok_or_else(|| {
            Error::Config(format!("token {token:?} has id {id}, beyond the {bound} defined entries"))
        })?;
        match slot {
            Some(existing) if existing != token => {
                return Err(Error::Config(format!(
                    "id {id} is assigned to both {existing:?} and {token:?}"
                )));
            }
            _ => *slot = Some(token.clone()),
        }
    }
    Ok(id_to_token)
}

fn flush(buf: &mut Vec<u8>, out: &mut String) {
    if !buf.is_empty() {
        out.push_str(&String::from_utf8_lossy(buf));
        buf.clear();
    }
}

/// Sequential chunks of at most `max_chars` code points.
fn split_chunks(text: &str, max_chars: Option<usize>) -> Vec<&str> {
    let Some(max) = max_chars.filter(|&m| m > 0) else {
        return vec![text];
    };
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (i, _)) in text.char_indices().enumerate() {
        if count > 0 && count % max == 0 {
            chunks.push(&text[start..i]);
            start = i;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Regex matches plus the unmatched gaps between them, in order.
fn split_isolated<'a>(regex: &fancy_regex::Regex, text: &'a str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut last_end = 0;

    for m in regex.find_iter(text) {
        let m = match m {
            Ok(m) => m,
            Err(e) => {
                trace!(error = %e, "split pattern gave up, keeping remainder whole");
                break;
            }
        };
        if m.start() > last_end {
            result.push(&text[last_end..m.start()]);
        }
        result.push(m.as_str());
        last_end = m.end();
    }
    if last_end < text.len() {
        result.push(&text[last_end..]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeEntry;

    /// All 256 byte symbols plus a few merged tokens.
    fn definition() -> BpeDefinition {
        let table = byte_level::byte_to_char_table();
        let mut vocab: HashMap<String, u32> =
            table.iter().enumerate().map(|(i, c)| (c.to_string(), i as u32)).collect();
        let merges = ["h e", "l l", "he ll", "hell o", "Ġ w", "Ġw o"];
        for (k, merge) in merges.iter().enumerate() {
            vocab.insert(merge.replace(' ', ""), 256 + k as u32);
        }
        BpeDefinition {
            vocab,
            merges: merges.iter().map(|m| MergeEntry::Joined(m.to_string())).collect(),
            special_tokens: HashMap::from([("<SEP>".to_string(), 262)]),
            split_pattern: None,
            max_encode_chars: None,
            unk_id: None,
        }
    }

    fn tokenizer() -> BpeTokenizer {
        BpeTokenizer::new(&definition()).unwrap()
    }

    #[test]
    fn merges_by_rank() {
        let t = tokenizer();
        assert_eq!(t.encode("hello"), vec![259]);
        // "Ġwo" + 'r' + 'l' + 'd'
        assert_eq!(t.encode(" world"), vec![261, b'r' as u32, b'l' as u32, b'd' as u32]);
    }

    #[test]
    fn lowest_rank_wins_over_position() {
        let mut def = definition();
        def.merges = vec![MergeEntry::Joined("b c".into()), MergeEntry::Joined("a b".into())];
        def.vocab.insert("bc".into(), 263);
        def.vocab.insert("ab".into(), 264);
        let t = BpeTokenizer::new(&def).unwrap();
        assert_eq!(t.encode("abc"), vec![b'a' as u32, 263]);
    }

    #[test]
    fn special_tokens_bypass_merging() {
        let t = tokenizer();
        assert_eq!(t.encode("<SEP>"), vec![262]);
        assert_eq!(t.encode("hello<SEP>hello"), vec![259, 262, 259]);
        assert_eq!(t.decode(&[259, 262, 259]), "hello<SEP>hello");
    }

    #[test]
    fn round_trips_ascii_and_unicode() {
        let t = tokenizer();
        for text in ["hello world", "  tabs\tand\nnewlines ", "naïve café ✓", ""] {
            assert_eq!(t.decode(&t.encode(text)), text);
        }
    }

    #[test]
    fn decode_buffers_split_utf8() {
        let mut def = definition();
        def.vocab.insert("<0xE2>".into(), 263);
        def.vocab.insert("<0x9C>".into(), 264);
        def.vocab.insert("<0x93>".into(), 265);
        let t = BpeTokenizer::new(&def).unwrap();
        // ✓ = E2 9C 93, interrupted by a literal special token
        assert_eq!(t.decode(&[263, 264, 265, 262, 259]), "✓<SEP>hello");
    }

    #[test]
    fn decode_unknown_id_uses_brackets() {
        let t = tokenizer();
        assert_eq!(t.decode(&[259, 9999]), "hello[9999]");
    }

    #[test]
    fn chunking_is_sequential() {
        assert_eq!(split_chunks("abcdefg", Some(3)), vec!["abc", "def", "g"]);
        assert_eq!(split_chunks("abc", Some(3)), vec!["abc"]);
        assert_eq!(split_chunks("ééé", Some(2)), vec!["éé", "é"]);
        assert_eq!(split_chunks("abc", None), vec!["abc"]);
        assert!(split_chunks("", Some(2)).is_empty());
    }

    #[test]
    fn chunked_encoding_splits_words_at_boundaries() {
        let mut def = definition();
        def.max_encode_chars = Some(3);
        let t = BpeTokenizer::new(&def).unwrap();
        // "hel" | "lo": no cross-chunk merge
        assert_eq!(t.encode("hello"), vec![256, b'l' as u32, b'l' as u32, b'o' as u32]);
        assert_eq!(t.decode(&t.encode("hello")), "hello");
    }

    #[test]
    fn missing_symbol_falls_back_to_bytes_then_unk() {
        let mut def = definition();
        def.vocab.remove("é");
        def.vocab.remove("Ã");
        def.vocab.insert("<0xC3>".into(), 0xC3);
        def.vocab.insert("<unk>".into(), 0xE9);
        def.unk_id = Some(0xE9);
        let t = BpeTokenizer::new(&def).unwrap();
        // é = C3 A9 -> 'Ã' + '©'
        assert_eq!(t.encode("é"), vec![0xC3, 0xA9]);
    }

    #[test]
    fn invalid_configuration_fails_fast() {
        let mut def = definition();
        def.split_pattern = Some("(unclosed".into());
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Regex(_))));

        let mut def = definition();
        def.merges.push(MergeEntry::Joined("nospace".into()));
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));

        let mut def = definition();
        def.unk_id = Some(12345);
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_ids_beyond_the_entry_count() {
        let mut def = definition();
        def.vocab.insert("zz".into(), 4_000_000_000);
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));

        let mut def = definition();
        def.special_tokens.insert("<CLS>".into(), 9999);
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_one_id_for_two_tokens() {
        let def = BpeDefinition {
            vocab: HashMap::from([("a".to_string(), 0), ("b".to_string(), 0), ("c".to_string(), 1)]),
            merges: Vec::new(),
            special_tokens: HashMap::new(),
            split_pattern: None,
            max_encode_chars: None,
            unk_id: None,
        };
        // every build sees the clash, whatever the map iteration order
        for _ in 0..16 {
            assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));
        }

        let mut def = definition();
        def.special_tokens.insert("hello".into(), 5);
        assert!(matches!(BpeTokenizer::new(&def), Err(Error::Config(_))));
    }

    #[test]
    fn special_token_may_repeat_a_vocab_entry() {
        let mut def = definition();
        def.vocab.insert("<SEP>".into(), 262);
        let t = BpeTokenizer::new(&def).unwrap();
        assert_eq!(t.encode("<SEP>"), vec![262]);
        assert_eq!(t.decode(&[262]), "<SEP>");
    }

    #[test]
    fn vocab_size_counts_special_tokens() {
        let t = tokenizer();
        assert_eq!(t.vocab_size(), 263);
        assert_eq!(t.token_to_id("<SEP>"), Some(262));
        assert_eq!(t.id_to_token(262), Some("<SEP>"));
    }

    #[test]
    fn count_matches_encode() {
        let t = tokenizer();
        let text = "hello <SEP> world";
        assert_eq!(t.count_tokens(text), t.encode(text).len());
    }
}
