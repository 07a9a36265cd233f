// src/trace/latin9.rs
//! ISO-8859-15 (Latin-9) topic encoding
//!
//! Latin-9 is Latin-1 with eight code points replaced. Everything else in
//! 0x00..=0xFF maps byte-for-byte onto the same Unicode scalar.

/// (byte, char) pairs where Latin-9 differs from Latin-1
const REPLACED: [(u8, char); 8] = [
    (0xA4, '\u{20AC}'), // €
    (0xA6, '\u{0160}'), // Š
    (0xA8, '\u{0161}'), // š
    (0xB4, '\u{017D}'), // Ž
    (0xB8, '\u{017E}'), // ž
    (0xBC, '\u{0152}'), // Œ
    (0xBD, '\u{0153}'), // œ
    (0xBE, '\u{0178}'), // Ÿ
];

/// Encode a string, or `None` if it has characters outside the charset
pub fn encode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        out.push(encode_char(c)?);
    }
    Some(out)
}

/// Decode bytes; every byte value is valid
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| decode_byte(b)).collect()
}

fn encode_char(c: char) -> Option<u8> {
    if let Some(&(byte, _)) = REPLACED.iter().find(|(_, ch)| *ch == c) {
        return Some(byte);
    }
    let code = u32::from(c);
    if code > 0xFF {
        return None;
    }
    let byte = code as u8;
    // The Latin-1 characters displaced by Latin-9 are not representable
    if REPLACED.iter().any(|(b, _)| *b == byte) {
        return None;
    }
    Some(byte)
}

fn decode_byte(byte: u8) -> char {
    REPLACED
        .iter()
        .find(|(b, _)| *b == byte)
        .map(|(_, c)| *c)
        .unwrap_or(char::from(byte))
}
