//! Hex codec for raw device frames
//!
//! Serial instruments are addressed with frames written as hex text:
//! ```text
//! "AA 01 00 FF"   "0xAA-0x01"   "aa0100ff"   "A01"  (left-padded to "0A01")
//! ```
//!
//! Replies are rendered back as upper-case byte tokens joined by single spaces.

use thiserror::Error;

/// Errors that can occur while parsing hex text
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty hex string")]
    Empty,

    #[error("Invalid hex digit in {0:?}")]
    InvalidDigit(String),
}

/// Strip separators and `0x` prefixes, leaving only the digits
fn clean(text: &str) -> String {
    text.replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect()
}

/// Parse hex text into bytes
pub fn parse_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let mut digits = clean(text);
    if digits.is_empty() {
        return Err(CodecError::Empty);
    }

    if digits.len() % 2 == 1 {
        digits.insert(0, '0');
    }

    hex::decode(&digits).map_err(|_| CodecError::InvalidDigit(text.to_string()))
}

/// Render bytes as `"AA 01 00 FF"`
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spaced_tokens() {
        let bytes = parse_hex("AA 01 00 FF").expect("parse failed");
        assert_eq!(bytes, vec![0xAA, 0x01, 0x00, 0xFF]);
    }

    #[test]
    fn test_parse_prefixed_and_separated() {
        assert_eq!(parse_hex("0xAA-0x01_0x02").unwrap(), vec![0xAA, 0x01, 0x02]);
        assert_eq!(parse_hex("aa\t01\n02").unwrap(), vec![0xAA, 0x01, 0x02]);
    }

    #[test]
    fn test_odd_digit_count_is_left_padded() {
        assert_eq!(parse_hex("A01").unwrap(), vec![0x0A, 0x01]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(parse_hex("   "), Err(CodecError::Empty));
        assert!(matches!(parse_hex("ZZ 01"), Err(CodecError::InvalidDigit(_))));
    }

    #[test]
    fn test_format_upper_case_tokens() {
        assert_eq!(format_hex(&[0xAA, 0x01, 0x00, 0xFF]), "AA 01 00 FF");
        assert_eq!(format_hex(&[]), "");
    }
}
