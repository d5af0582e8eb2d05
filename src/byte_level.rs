//! GPT-2 byte-level alphabet: every byte 0x00..0xFF gets a unique printable
//! character so that BPE merges operate on displayable strings and any input
//! survives the trip through the vocabulary.
//!
//! Printable ASCII and most of Latin-1 map to themselves; control
//! characters, space and the few gaps (0x00-0x20, 0x7F-0xA0, 0xAD) map to
//! U+0100..U+0143 in byte order.

use std::collections::HashMap;

pub fn byte_to_char_table() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut n: u32 = 0;
    for b in 0u16..256 {
        let cp = match b as u8 {
            0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF => b as u32,
            _ => {
                let c = 0x100 + n;
                n += 1;
                c
            }
        };
        // every code point produced above is a valid scalar value
        table[b as usize] = char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER);
    }
    table
}

/// Inverse of [`byte_to_char_table`].
pub fn char_to_byte_map(table: &[char; 256]) -> HashMap<char, u8> {
    (0u8..=255).map(|b| (table[b as usize], b)).collect()
}

pub fn encode_bytes(input: &[u8], table: &[char; 256]) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    for &b in input {
        out.push(table[b as usize]);
    }
    out
}

/// Maps a byte-level string back to raw bytes, `None` if any character is
/// outside the alphabet.
pub fn decode_symbols(symbols: &str, inverse: &HashMap<char, u8>) -> Option<Vec<u8>> {
    symbols.chars().map(|c| inverse.get(&c).copied()).collect()
}

/// Parses a `<0xHH>` byte-fallback token.
pub fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

pub fn byte_token(b: u8) -> String {
    format!("<0x{:02X}>", b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_bijection() {
        let table = byte_to_char_table();
        let inverse = char_to_byte_map(&table);
        assert_eq!(inverse.len(), 256);
        assert!(table.iter().all(|c| !c.is_control() && !c.is_whitespace()));
    }

    #[test]
    fn known_gpt2_mappings() {
        let table = byte_to_char_table();
        assert_eq!(table[b' ' as usize], 'Ġ');
        assert_eq!(table[b'\n' as usize], 'Ċ');
        assert_eq!(table[b'a' as usize], 'a');
        assert_eq!(table[0], '\u{100}');
    }

    #[test]
    fn symbols_round_trip() {
        let table = byte_to_char_table();
        let inverse = char_to_byte_map(&table);
        let text = "héllo, wörld\t✓";
        let encoded = encode_bytes(text.as_bytes(), &table);
        assert_eq!(decode_symbols(&encoded, &inverse).unwrap(), text.as_bytes());
        assert_eq!(decode_symbols("日", &inverse), None);
    }

    #[test]
    fn byte_tokens() {
        assert_eq!(parse_byte_token("<0xE2>"), Some(0xE2));
        assert_eq!(parse_byte_token(&byte_token(0x0A)), Some(0x0A));
        assert_eq!(parse_byte_token("<0xE>"), None);
        assert_eq!(parse_byte_token("0xE2"), None);
        assert_eq!(parse_byte_token("<0xZZ>"), None);
    }
}
