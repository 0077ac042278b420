//! Fixed-width data records.
//!
//! A record is exactly `RECORD_SIZE` ASCII bytes. Its key is the leading
//! comma-delimited field, parsed as a signed integer.

use crate::storage::block::FILL_BYTE;
use crate::storage::pointer::{CodecError, MAX_KEY, MIN_KEY};

/// Record size in bytes.
pub const RECORD_SIZE: usize = 40;

/// A single fixed-width record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Vec<u8>,
    key: i32,
}

impl Record {
    /// Wrap exactly `RECORD_SIZE` bytes as a record.
    pub fn new(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != RECORD_SIZE {
            return Err(CodecError::WrongWidth {
                kind: "record",
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }
        let key = parse_record_key(bytes)?;
        Ok(Self {
            bytes: bytes.to_vec(),
            key,
        })
    }

    /// Build a record from a line of text, right-padding with spaces or
    /// truncating to `RECORD_SIZE` bytes.
    pub fn padded(line: &str) -> Result<Self, CodecError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.resize(RECORD_SIZE, FILL_BYTE);
        Self::new(&bytes)
    }

    /// The record's key.
    #[must_use]
    pub const fn key(&self) -> i32 {
        self.key
    }

    /// The raw record bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The record as text, with trailing padding removed.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim_end().to_string()
    }
}

/// Parse the leading comma-delimited field of a record as its key.
fn parse_record_key(bytes: &[u8]) -> Result<i32, CodecError> {
    let field = bytes.split(|&b| b == b',').next().unwrap_or_default();
    let invalid = || CodecError::InvalidCharacter {
        kind: "record key",
        value: String::from_utf8_lossy(field).into_owned(),
    };
    let text = std::str::from_utf8(field).map_err(|_| invalid())?.trim();
    let key = text.parse::<i32>().map_err(|_| invalid())?;
    if !(MIN_KEY..=MAX_KEY).contains(&key) {
        return Err(CodecError::OutOfRange {
            kind: "record key",
            value: i64::from(key),
        });
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key() {
        let record = Record::padded("29,Casablanca,1942").expect("record");
        assert_eq!(record.key(), 29);
        assert_eq!(record.as_bytes().len(), RECORD_SIZE);
        assert_eq!(record.text(), "29,Casablanca,1942");
    }

    #[test]
    fn test_record_negative_key() {
        let record = Record::padded("-5,cold").expect("record");
        assert_eq!(record.key(), -5);
    }

    #[test]
    fn test_record_wrong_width() {
        assert_eq!(
            Record::new(b"1,short"),
            Err(CodecError::WrongWidth {
                kind: "record",
                expected: 40,
                actual: 7
            })
        );
    }

    #[test]
    fn test_record_padded_truncates() {
        let line = format!("7,{}", "x".repeat(60));
        let record = Record::padded(&line).expect("record");
        assert_eq!(record.as_bytes(), &line.as_bytes()[..RECORD_SIZE]);
    }

    #[test]
    fn test_record_bad_key() {
        assert!(matches!(
            Record::padded("abc,def"),
            Err(CodecError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            Record::padded("12345678,too big"),
            Err(CodecError::OutOfRange { .. })
        ));
        assert!(Record::padded(",empty").is_err());
    }
}
