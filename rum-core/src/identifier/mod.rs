//! 128-bit identifiers for sessions, views, actions, traces and spans
//!
//! An [`Identifier`] is two 64-bit words, `high` and `low`. The all-zero value
//! is reserved as the "unset" sentinel ([`Identifier::INVALID`]) and is never
//! produced by a generator.
//!
//! ## Textual encodings
//!
//! | Encoding              | Width    | Words encoded |
//! |-----------------------|----------|---------------|
//! | `Decimal`             | variable | `low` only    |
//! | `Hexadecimal16Chars`  | 16       | `low` only    |
//! | `Hexadecimal32Chars`  | 32       | `high`, `low` |
//!
//! `Decimal` and `Hexadecimal16Chars` are lossy for identifiers whose `high`
//! word is non-zero: they exist for legacy 64-bit tracing backends and drop the
//! high word on output. Parsing them always yields `high == 0`.
//! `Hexadecimal32Chars` is lossless.
//!
//! Parsing never fails loudly. A malformed token, an out-of-range offset or a
//! parsed all-zero value all come back as `None`.
//!
//! ```rust
//! use rum_core::identifier::{Identifier, IdEncoding};
//!
//! let id = Identifier::new(0x1, 0x2a);
//! let text = id.format(IdEncoding::Hexadecimal32Chars);
//! assert_eq!(text, "0000000000000001000000000000002a");
//! assert_eq!(Identifier::parse(&text, IdEncoding::Hexadecimal32Chars), Some(id));
//! assert_eq!(id.format(IdEncoding::Decimal), "42");
//! ```

pub mod generator;

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::RumError;

pub use generator::{HighWordMode, IdGenerator, RandomIdGenerator, SeededIdGenerator};

/// Textual encodings supported by [`Identifier::format`] and [`Identifier::parse`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdEncoding {
    /// Unsigned decimal of the low word
    Decimal,
    /// Zero-padded lowercase hex of the low word
    Hexadecimal16Chars,
    /// Zero-padded lowercase hex of both words, high first
    Hexadecimal32Chars,
}

impl IdEncoding {
    /// Fixed width of the encoding, if any
    pub fn width(&self) -> Option<usize> {
        match self {
            IdEncoding::Decimal => None,
            IdEncoding::Hexadecimal16Chars => Some(16),
            IdEncoding::Hexadecimal32Chars => Some(32),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdEncoding::Decimal => "decimal",
            IdEncoding::Hexadecimal16Chars => "hex16",
            IdEncoding::Hexadecimal32Chars => "hex32",
        }
    }
}

impl fmt::Display for IdEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 128-bit identifier made of two 64-bit words
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identifier {
    high: u64,
    low: u64,
}

impl Identifier {
    /// The reserved "unset" value
    pub const INVALID: Identifier = Identifier { high: 0, low: 0 };

    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Identifier with a zero high word (64-bit trace and span ids)
    pub const fn from_low(low: u64) -> Self {
        Self { high: 0, low }
    }

    pub const fn high(&self) -> u64 {
        self.high
    }

    pub const fn low(&self) -> u64 {
        self.low
    }

    /// False only for the all-zero sentinel
    pub const fn is_valid(&self) -> bool {
        self.high != 0 || self.low != 0
    }

    /// The same identifier with its high word cleared
    pub const fn low_only(&self) -> Self {
        Self::from_low(self.low)
    }

    /// Render in the given encoding
    ///
    /// `Decimal` and `Hexadecimal16Chars` encode only the low word.
    pub fn format(&self, encoding: IdEncoding) -> String {
        match encoding {
            IdEncoding::Decimal => self.low.to_string(),
            IdEncoding::Hexadecimal16Chars => format!("{:016x}", self.low),
            IdEncoding::Hexadecimal32Chars => format!("{:016x}{:016x}", self.high, self.low),
        }
    }

    /// Parse a whole token starting at offset 0
    pub fn parse(input: &str, encoding: IdEncoding) -> Option<Self> {
        Self::parse_at(input, encoding, 0)
    }

    /// Parse an identifier embedded in a longer token
    ///
    /// Fixed-width encodings read exactly their width starting at `offset`;
    /// `Decimal` reads the run of ASCII digits starting at `offset`. Returns
    /// `None` for malformed input, for an offset past the end or inside a
    /// multi-byte character, and for the all-zero sentinel.
    pub fn parse_at(input: &str, encoding: IdEncoding, offset: usize) -> Option<Self> {
        Self::parse_raw(input, encoding, offset).filter(Identifier::is_valid)
    }

    /// Same as [`Identifier::parse_at`] but lets the zero sentinel through
    pub(crate) fn parse_raw(input: &str, encoding: IdEncoding, offset: usize) -> Option<Self> {
        let rest = input.get(offset..)?;
        match encoding {
            IdEncoding::Decimal => {
                let len = rest.bytes().take_while(u8::is_ascii_digit).count();
                if len == 0 {
                    return None;
                }
                rest[..len].parse::<u64>().ok().map(Self::from_low)
            }
            IdEncoding::Hexadecimal16Chars => {
                let low = parse_hex_word(rest.get(..16)?)?;
                Some(Self::from_low(low))
            }
            IdEncoding::Hexadecimal32Chars => {
                let token = rest.get(..32)?;
                let high = parse_hex_word(&token[..16])?;
                let low = parse_hex_word(&token[16..])?;
                Some(Self::new(high, low))
            }
        }
    }

    /// UUID view of the full 128 bits (high word first)
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_u64_pair(self.high, self.low)
    }

    pub fn from_uuid(uuid: &Uuid) -> Self {
        let (high, low) = uuid.as_u64_pair();
        Self { high, low }
    }
}

/// Parse exactly 16 hex digits, either case
fn parse_hex_word(token: &str) -> Option<u64> {
    if token.len() != 16 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(token, 16).ok()
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self)
    }
}

impl FromStr for Identifier {
    type Err = RumError;

    /// Strict hex-32 parse: the whole string must be the token
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RumError::InvalidIdentifier {
            input: s.to_string(),
            encoding: IdEncoding::Hexadecimal32Chars.to_string(),
        };
        if s.len() != 32 {
            return Err(invalid());
        }
        Self::parse(s, IdEncoding::Hexadecimal32Chars).ok_or_else(invalid)
    }
}

impl From<Uuid> for Identifier {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(&uuid)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdentifierVisitor;

        impl Visitor<'_> for IdentifierVisitor {
            type Value = Identifier;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-character hexadecimal identifier")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v.len() != 32 {
                    return Err(E::invalid_length(v.len(), &self));
                }
                // The sentinel is a legal serialized value ("no session yet").
                Identifier::parse_raw(v, IdEncoding::Hexadecimal32Chars, 0)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(IdentifierVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_encodings() {
        let id = Identifier::new(0xdead_beef, 0x0123_4567_89ab_cdef);
        assert_eq!(id.format(IdEncoding::Decimal), "81985529216486895");
        assert_eq!(id.format(IdEncoding::Hexadecimal16Chars), "0123456789abcdef");
        assert_eq!(
            id.format(IdEncoding::Hexadecimal32Chars),
            "00000000deadbeef0123456789abcdef"
        );
    }

    #[test]
    fn test_lossy_encodings_drop_high_word() {
        let id = Identifier::new(7, 99);
        let dec = id.format(IdEncoding::Decimal);
        assert_eq!(Identifier::parse(&dec, IdEncoding::Decimal), Some(Identifier::from_low(99)));

        let hex = id.format(IdEncoding::Hexadecimal16Chars);
        assert_eq!(
            Identifier::parse(&hex, IdEncoding::Hexadecimal16Chars),
            Some(id.low_only())
        );
    }

    #[test]
    fn test_parse_at_offset() {
        // traceparent layout: version-traceid-spanid-flags
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let trace = Identifier::parse_at(header, IdEncoding::Hexadecimal32Chars, 3).unwrap();
        let span = Identifier::parse_at(header, IdEncoding::Hexadecimal16Chars, 36).unwrap();
        assert_eq!(trace.high(), 0x4bf9_2f35_77b3_4da6);
        assert_eq!(trace.low(), 0xa3ce_929d_0e0e_4736);
        assert_eq!(span.low(), 0x00f0_67aa_0ba9_02b7);

        let mixed = "id=12345;rest";
        assert_eq!(
            Identifier::parse_at(mixed, IdEncoding::Decimal, 3),
            Some(Identifier::from_low(12345))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(Identifier::parse("", IdEncoding::Decimal), None);
        assert_eq!(Identifier::parse("+12", IdEncoding::Decimal), None);
        assert_eq!(Identifier::parse("18446744073709551616", IdEncoding::Decimal), None);
        assert_eq!(Identifier::parse("0123456789abcde", IdEncoding::Hexadecimal16Chars), None);
        assert_eq!(Identifier::parse("0123456789abcdeg", IdEncoding::Hexadecimal16Chars), None);
        assert_eq!(Identifier::parse("+123456789abcdef", IdEncoding::Hexadecimal16Chars), None);
        assert_eq!(Identifier::parse_at("abc", IdEncoding::Decimal, 10), None);
        assert_eq!(Identifier::parse_at("é123", IdEncoding::Decimal, 1), None);
    }

    #[test]
    fn test_parse_treats_zero_as_unset() {
        assert_eq!(Identifier::parse("0", IdEncoding::Decimal), None);
        assert_eq!(Identifier::parse(&"0".repeat(32), IdEncoding::Hexadecimal32Chars), None);
        assert!(!Identifier::INVALID.is_valid());
        assert!(Identifier::new(1, 0).is_valid());
    }

    #[test]
    fn test_parse_accepts_uppercase_hex() {
        assert_eq!(
            Identifier::parse("00000000000000FF", IdEncoding::Hexadecimal16Chars),
            Some(Identifier::from_low(255))
        );
    }

    #[test]
    fn test_from_str_is_strict() {
        let id: Identifier = "0000000000000001000000000000002a".parse().unwrap();
        assert_eq!(id, Identifier::new(1, 42));

        let err = "0000000000000001000000000000002a0".parse::<Identifier>().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_IDENTIFIER");
    }

    #[test]
    fn test_uuid_bridge() {
        let id = Identifier::new(0x0011_2233_4455_6677, 0x8899_aabb_ccdd_eeff);
        let uuid = id.to_uuid();
        assert_eq!(uuid.to_string(), "00112233-4455-6677-8899-aabbccddeeff");
        assert_eq!(Identifier::from(uuid), id);
    }

    #[test]
    fn test_serde_uses_hex32_and_accepts_sentinel() {
        let id = Identifier::new(2, 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000000000020000000000000003\"");
        assert_eq!(serde_json::from_str::<Identifier>(&json).unwrap(), id);

        let zero = serde_json::to_string(&Identifier::INVALID).unwrap();
        assert_eq!(serde_json::from_str::<Identifier>(&zero).unwrap(), Identifier::INVALID);
        assert!(serde_json::from_str::<Identifier>("\"xyz\"").is_err());
    }
}
