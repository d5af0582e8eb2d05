use std::collections::HashMap;
use std::str::Chars;

/// Prefix tree over vocabulary surface forms, one edge per code point.
#[derive(Debug, Default, Clone)]
pub struct Trie {
    root: TrieNode,
}

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    is_leaf: bool,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: &str) {
        let mut node = &mut self.root;
        for c in token.chars() {
            node = node.children.entry(c).or_default();
        }
        node.is_leaf = true;
    }

    /// Every inserted token that is a prefix of `text`, shortest first.
    pub fn common_prefix_search<'a>(&'a self, text: &'a str) -> CommonPrefixSearch<'a> {
        CommonPrefixSearch {
            node: Some(&self.root),
            chars: text.chars(),
            prefix: String::new(),
            char_len: 0,
        }
    }

    /// Longest inserted token that is a prefix of `text`, with its byte length.
    pub fn longest_prefix(&self, text: &str) -> Option<usize> {
        self.common_prefix_search(text).last().map(|m| m.text.len())
    }
}

/// A match yielded by [`CommonPrefixSearch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMatch {
    pub text: String,
    /// Length in code points.
    pub char_len: usize,
}

/// Lazy walk down the trie along `text`; stops at the first missing edge.
pub struct CommonPrefixSearch<'a> {
    node: Option<&'a TrieNode>,
    chars: Chars<'a>,
    prefix: String,
    char_len: usize,
}

impl Iterator for CommonPrefixSearch<'_> {
    type Item = PrefixMatch;

    fn next(&mut self) -> Option<PrefixMatch> {
        loop {
            let node = self.node?;
            let Some(c) = self.chars.next() else {
                self.node = None;
                return None;
            };
            let Some(child) = node.children.get(&c) else {
                self.node = None;
                return None;
            };
            self.node = Some(child);
            self.prefix.push(c);
            self.char_len += 1;
            if child.is_leaf {
                return Some(PrefixMatch { text: self.prefix.clone(), char_len: self.char_len });
            }
        }
    }
}
