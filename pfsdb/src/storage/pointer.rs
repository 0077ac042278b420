//! Fixed-width decimal pointer encodings.
//!
//! Every cross-reference stored on disk is a string of ASCII digits with no
//! delimiters:
//!
//! | Type               | Width | Layout                                        |
//! |--------------------|-------|-----------------------------------------------|
//! | `BlockPointer`     | 7     | 3-digit file id + 4-digit block id            |
//! | `DataBlockPointer` | 8     | `BlockPointer` + 1-digit record slot          |
//! | `KeyPointer`       | 15    | 7-char signed key + `DataBlockPointer`        |
//!
//! All nines (`"9999999"` at block pointer width) means "absent" or "end of
//! chain". In memory, absence is always an `Option`.
//!
//! Decoding never truncates or pads: a string of the wrong width, or one with
//! a non-digit where a digit is expected, is a `CodecError`.

use std::fmt;
use std::str::FromStr;

/// Identifier of a paged file within a database (`<db>.db<file>`).
pub type FileId = u16;

/// Identifier of a block within a paged file.
pub type BlockId = u16;

/// Sentinel value meaning "absent / end of chain" at block pointer width.
pub const SENTINEL: &str = "9999999";

/// Sentinel at data block pointer width.
pub const DATA_SENTINEL: &str = "99999999";

/// Width of an encoded `BlockPointer`.
pub const BLOCK_POINTER_WIDTH: usize = 7;

/// Width of an encoded `DataBlockPointer`.
pub const DATA_POINTER_WIDTH: usize = 8;

/// Width of the key field of an encoded `KeyPointer`.
pub const KEY_WIDTH: usize = 7;

/// Width of an encoded `KeyPointer`.
pub const KEY_POINTER_WIDTH: usize = KEY_WIDTH + DATA_POINTER_WIDTH;

/// Largest encodable file id.
pub const MAX_FILE_ID: FileId = 999;

/// Largest encodable block id.
pub const MAX_BLOCK_ID: BlockId = 9999;

/// Largest record slot inside a data block.
pub const MAX_RECORD_SLOT: u8 = 5;

/// Smallest key that fits the 7-char key field (`-999999`).
pub const MIN_KEY: i32 = -999_999;

/// Largest key that fits the 7-char key field (`9999999`).
pub const MAX_KEY: i32 = 9_999_999;

/// Key stored in empty on-disk key slots.
pub const EMPTY_SLOT_KEY: i32 = -1;

/// Error returned when encoding or decoding a fixed-width value fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded string has the wrong length.
    WrongWidth {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The encoded string contains a character that is not allowed.
    InvalidCharacter { kind: &'static str, value: String },
    /// A value does not fit its fixed-width field.
    OutOfRange { kind: &'static str, value: i64 },
    /// The sentinel appeared where a real pointer was required.
    UnexpectedSentinel { kind: &'static str },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongWidth {
                kind,
                expected,
                actual,
            } => write!(f, "{kind} must be {expected} characters, got {actual}"),
            Self::InvalidCharacter { kind, value } => {
                write!(f, "{kind} contains invalid characters: '{value}'")
            }
            Self::OutOfRange { kind, value } => {
                write!(f, "{kind} value {value} does not fit its field")
            }
            Self::UnexpectedSentinel { kind } => {
                write!(f, "{kind} is the end-of-chain sentinel")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Check the width of an encoded value. Only ASCII is accepted, so the
/// fields can be sliced by byte offset afterwards.
fn check_width(kind: &'static str, s: &str, expected: usize) -> Result<(), CodecError> {
    if s.len() != expected {
        return Err(CodecError::WrongWidth {
            kind,
            expected,
            actual: s.len(),
        });
    }
    if !s.is_ascii() {
        return Err(CodecError::InvalidCharacter {
            kind,
            value: s.to_string(),
        });
    }
    Ok(())
}

/// Parse an all-digit field.
fn parse_digits(kind: &'static str, s: &str) -> Result<u32, CodecError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::InvalidCharacter {
            kind,
            value: s.to_string(),
        });
    }
    s.parse::<u32>().map_err(|_| CodecError::InvalidCharacter {
        kind,
        value: s.to_string(),
    })
}

/// Address of a block: which paged file, and which block inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPointer {
    file: FileId,
    block: BlockId,
}

impl BlockPointer {
    /// Create a block pointer.
    ///
    /// Fails if either id does not fit its field, or if the pair would encode
    /// as the sentinel.
    pub const fn new(file: FileId, block: BlockId) -> Result<Self, CodecError> {
        if file > MAX_FILE_ID {
            return Err(CodecError::OutOfRange {
                kind: "file id",
                value: file as i64,
            });
        }
        if block > MAX_BLOCK_ID {
            return Err(CodecError::OutOfRange {
                kind: "block id",
                value: block as i64,
            });
        }
        if file == MAX_FILE_ID && block == MAX_BLOCK_ID {
            return Err(CodecError::UnexpectedSentinel {
                kind: "block pointer",
            });
        }
        Ok(Self { file, block })
    }

    #[must_use]
    pub const fn file(&self) -> FileId {
        self.file
    }

    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Encode an optional pointer, writing the sentinel for `None`.
    #[must_use]
    pub fn encode_optional(pointer: Option<Self>) -> String {
        pointer.map_or_else(|| SENTINEL.to_string(), |p| p.to_string())
    }

    /// Decode a pointer that may be the sentinel.
    pub fn decode_optional(s: &str) -> Result<Option<Self>, CodecError> {
        check_width("block pointer", s, BLOCK_POINTER_WIDTH)?;
        if s == SENTINEL {
            return Ok(None);
        }
        s.parse().map(Some)
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}{:04}", self.file, self.block)
    }
}

impl FromStr for BlockPointer {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_width("block pointer", s, BLOCK_POINTER_WIDTH)?;
        if s == SENTINEL {
            return Err(CodecError::UnexpectedSentinel {
                kind: "block pointer",
            });
        }
        let file = parse_digits("block pointer", &s[..3])?;
        let block = parse_digits("block pointer", &s[3..])?;
        // Three and four digits always fit u16.
        #[allow(clippy::cast_possible_truncation)]
        Self::new(file as FileId, block as BlockId)
    }
}

/// Address of a single record: a block plus the record's slot in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataBlockPointer {
    block: BlockPointer,
    slot: u8,
}

impl DataBlockPointer {
    /// Create a data block pointer. The slot must be at most `MAX_RECORD_SLOT`.
    pub const fn new(block: BlockPointer, slot: u8) -> Result<Self, CodecError> {
        if slot > MAX_RECORD_SLOT {
            return Err(CodecError::OutOfRange {
                kind: "record slot",
                value: slot as i64,
            });
        }
        Ok(Self { block, slot })
    }

    #[must_use]
    pub const fn block(&self) -> BlockPointer {
        self.block
    }

    #[must_use]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// Decode a pointer that may be the sentinel.
    pub fn decode_optional(s: &str) -> Result<Option<Self>, CodecError> {
        check_width("data block pointer", s, DATA_POINTER_WIDTH)?;
        if s == DATA_SENTINEL {
            return Ok(None);
        }
        s.parse().map(Some)
    }
}

impl fmt::Display for DataBlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.block, self.slot)
    }
}

impl FromStr for DataBlockPointer {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_width("data block pointer", s, DATA_POINTER_WIDTH)?;
        if s == DATA_SENTINEL {
            return Err(CodecError::UnexpectedSentinel {
                kind: "data block pointer",
            });
        }
        let block = s[..BLOCK_POINTER_WIDTH].parse::<BlockPointer>()?;
        let slot = parse_digits("data block pointer", &s[BLOCK_POINTER_WIDTH..])?;
        // A single digit always fits u8.
        #[allow(clippy::cast_possible_truncation)]
        Self::new(block, slot as u8)
    }
}

/// A key paired with the address of the record that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPointer {
    key: i32,
    pointer: DataBlockPointer,
}

impl KeyPointer {
    /// Create a key pointer. The key must fit the 7-char key field.
    pub const fn new(key: i32, pointer: DataBlockPointer) -> Result<Self, CodecError> {
        if key < MIN_KEY || key > MAX_KEY {
            return Err(CodecError::OutOfRange {
                kind: "key",
                value: key as i64,
            });
        }
        Ok(Self { key, pointer })
    }

    #[must_use]
    pub const fn key(&self) -> i32 {
        self.key
    }

    #[must_use]
    pub const fn pointer(&self) -> DataBlockPointer {
        self.pointer
    }

    /// Encoding of an empty slot: key `-1` and an all-nines pointer.
    #[must_use]
    pub fn empty_slot() -> String {
        format!("{EMPTY_SLOT_KEY:07}{DATA_SENTINEL}")
    }

    /// Decode a key pointer that may be an empty slot.
    pub fn decode_optional(s: &str) -> Result<Option<Self>, CodecError> {
        check_width("key pointer", s, KEY_POINTER_WIDTH)?;
        let key = parse_key(&s[..KEY_WIDTH])?;
        match DataBlockPointer::decode_optional(&s[KEY_WIDTH..])? {
            Some(pointer) => Self::new(key, pointer).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Display for KeyPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:07}{}", self.key, self.pointer)
    }
}

impl FromStr for KeyPointer {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode_optional(s)?.ok_or(CodecError::UnexpectedSentinel {
            kind: "key pointer",
        })
    }
}

/// Parse the signed, zero-padded key field.
fn parse_key(s: &str) -> Result<i32, CodecError> {
    let (negative, digits) = s
        .strip_prefix('-')
        .map_or((false, s), |rest| (true, rest));
    let magnitude = parse_digits("key", digits)?;
    let magnitude = i32::try_from(magnitude).map_err(|_| CodecError::InvalidCharacter {
        kind: "key",
        value: s.to_string(),
    })?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn bp(file: FileId, block: BlockId) -> BlockPointer {
        BlockPointer::new(file, block).expect("valid block pointer")
    }

    fn dp(file: FileId, block: BlockId, slot: u8) -> DataBlockPointer {
        DataBlockPointer::new(bp(file, block), slot).expect("valid data pointer")
    }

    #[test]
    fn test_block_pointer_encoding() {
        assert_eq!(bp(0, 5).to_string(), "0000005");
        assert_eq!(bp(12, 345).to_string(), "0120345");
        assert_eq!(bp(999, 4095).to_string(), "9994095");
    }

    #[test]
    fn test_block_pointer_roundtrip() {
        for pointer in [bp(0, 0), bp(1, 6), bp(42, 3999), bp(998, 9999)] {
            let decoded: BlockPointer = pointer.to_string().parse().expect("decode");
            assert_eq!(decoded, pointer);
        }
    }

    #[test]
    fn test_block_pointer_rejects_wrong_width() {
        assert_eq!(
            "000005".parse::<BlockPointer>(),
            Err(CodecError::WrongWidth {
                kind: "block pointer",
                expected: 7,
                actual: 6
            })
        );
        assert!("00000050".parse::<BlockPointer>().is_err());
    }

    #[test]
    fn test_block_pointer_rejects_non_digits() {
        assert!(matches!(
            "00a0005".parse::<BlockPointer>(),
            Err(CodecError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            "+000005".parse::<BlockPointer>(),
            Err(CodecError::InvalidCharacter { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_multibyte_characters() {
        // Right byte width, but a field boundary falls inside the character.
        assert!(matches!(
            "00\u{e9}000".parse::<BlockPointer>(),
            Err(CodecError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            BlockPointer::decode_optional("00\u{e9}000"),
            Err(CodecError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            "000000\u{e9}0".parse::<DataBlockPointer>(),
            Err(CodecError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            KeyPointer::decode_optional("000000\u{e9}0000006"),
            Err(CodecError::InvalidCharacter { .. })
        ));
    }

    #[test]
    fn test_block_pointer_sentinel() {
        assert_eq!(BlockPointer::decode_optional(SENTINEL), Ok(None));
        assert_eq!(BlockPointer::encode_optional(None), SENTINEL);
        assert_eq!(
            BlockPointer::decode_optional("0010002"),
            Ok(Some(bp(1, 2)))
        );
        assert!(SENTINEL.parse::<BlockPointer>().is_err());
        assert!(BlockPointer::new(MAX_FILE_ID, MAX_BLOCK_ID).is_err());
    }

    #[test]
    fn test_block_pointer_rejects_out_of_range() {
        assert!(BlockPointer::new(1000, 0).is_err());
        assert!(BlockPointer::new(0, 10_000).is_err());
    }

    #[test]
    fn test_data_block_pointer_roundtrip() {
        let pointer = dp(3, 17, 5);
        assert_eq!(pointer.to_string(), "00300175");
        let decoded: DataBlockPointer = "00300175".parse().expect("decode");
        assert_eq!(decoded, pointer);
        assert_eq!(DataBlockPointer::decode_optional(DATA_SENTINEL), Ok(None));
    }

    #[test]
    fn test_data_block_pointer_rejects_slot_out_of_range() {
        assert!(DataBlockPointer::new(bp(0, 6), 6).is_err());
        assert!("00000066".parse::<DataBlockPointer>().is_err());
    }

    #[test]
    fn test_key_pointer_roundtrip() {
        let kp = KeyPointer::new(29, dp(0, 6, 0)).expect("key pointer");
        assert_eq!(kp.to_string(), "000002900000060");
        assert_eq!(kp.to_string().len(), KEY_POINTER_WIDTH);
        let decoded: KeyPointer = kp.to_string().parse().expect("decode");
        assert_eq!(decoded, kp);
    }

    #[test]
    fn test_key_pointer_negative_key() {
        let kp = KeyPointer::new(-42, dp(1, 7, 3)).expect("key pointer");
        assert_eq!(kp.to_string(), "-00004200100073");
        let decoded: KeyPointer = kp.to_string().parse().expect("decode");
        assert_eq!(decoded.key(), -42);
    }

    #[test]
    fn test_key_pointer_empty_slot() {
        let empty = KeyPointer::empty_slot();
        assert_eq!(empty, "-00000199999999");
        assert_eq!(KeyPointer::decode_optional(&empty), Ok(None));
        assert!(empty.parse::<KeyPointer>().is_err());
    }

    #[test]
    fn test_key_pointer_rejects_bad_input() {
        assert!("12345".parse::<KeyPointer>().is_err());
        assert!("00000x900000060".parse::<KeyPointer>().is_err());
        assert!("--0002900000060".parse::<KeyPointer>().is_err());
        assert!(KeyPointer::new(10_000_000, dp(0, 6, 0)).is_err());
        assert!(KeyPointer::new(-1_000_000, dp(0, 6, 0)).is_err());
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = StdRng::seed_from_u64(4213);

        for _ in 0..2000 {
            let file: FileId = rng.random_range(0..MAX_FILE_ID);
            let block: BlockId = rng.random_range(0..=MAX_BLOCK_ID);
            let slot: u8 = rng.random_range(0..=MAX_RECORD_SLOT);
            let key: i32 = rng.random_range(MIN_KEY..=MAX_KEY);

            let block_pointer = bp(file, block);
            let encoded = block_pointer.to_string();
            assert_eq!(encoded.len(), BLOCK_POINTER_WIDTH);
            assert_eq!(encoded.parse::<BlockPointer>(), Ok(block_pointer));

            let data_pointer = dp(file, block, slot);
            let encoded = data_pointer.to_string();
            assert_eq!(encoded.len(), DATA_POINTER_WIDTH);
            assert_eq!(encoded.parse::<DataBlockPointer>(), Ok(data_pointer));

            let key_pointer = KeyPointer::new(key, data_pointer).expect("key pointer");
            let encoded = key_pointer.to_string();
            assert_eq!(encoded.len(), KEY_POINTER_WIDTH, "{encoded}");
            assert_eq!(encoded.parse::<KeyPointer>(), Ok(key_pointer));
        }
    }
}
