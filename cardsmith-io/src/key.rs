//! Keys, key slots and sector trailers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BLOCK_SIZE, Block};

pub const KEY_SIZE: usize = 6;

/// Default transport key shipped on blank cards.
pub const DEFAULT_KEY: MifareKey = MifareKey([0xFF; KEY_SIZE]);

/// Factory access bits (key A reads/writes data, key B readable).
pub const DEFAULT_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// A 6-byte MIFARE Classic sector key.
///
/// Serialized and displayed as 12 upper-case hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MifareKey(pub [u8; KEY_SIZE]);

impl MifareKey {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Short form for logs: first and last byte only.
    pub fn redacted(&self) -> String {
        format!("{:02X}********{:02X}", self.0[0], self.0[KEY_SIZE - 1])
    }
}

impl fmt::Debug for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MifareKey({})", self.to_hex())
    }
}

impl fmt::Display for MifareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyParseError {
    #[error("key must be {expected} hex digits, got {got}")]
    Length { expected: usize, got: usize },
    #[error("invalid hex in key: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for MifareKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != KEY_SIZE * 2 {
            return Err(KeyParseError::Length {
                expected: KEY_SIZE * 2,
                got: trimmed.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(trimmed, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MifareKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MifareKey> for String {
    fn from(key: MifareKey) -> Self {
        key.to_hex()
    }
}

impl From<[u8; KEY_SIZE]> for MifareKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Which key role a key is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySlot {
    A,
    B,
}

impl KeySlot {
    pub fn opposite(self) -> Self {
        match self {
            KeySlot::A => KeySlot::B,
            KeySlot::B => KeySlot::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeySlot::A => "A",
            KeySlot::B => "B",
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded sector trailer: key A | access bits | key B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorTrailer {
    pub key_a: MifareKey,
    pub access_bits: [u8; 4],
    pub key_b: MifareKey,
}

impl SectorTrailer {
    pub fn new(key_a: MifareKey, key_b: MifareKey) -> Self {
        Self {
            key_a,
            access_bits: DEFAULT_ACCESS_BITS,
            key_b,
        }
    }

    pub fn parse(block: &Block) -> Self {
        let mut key_a = [0u8; KEY_SIZE];
        let mut access_bits = [0u8; 4];
        let mut key_b = [0u8; KEY_SIZE];
        key_a.copy_from_slice(&block[0..6]);
        access_bits.copy_from_slice(&block[6..10]);
        key_b.copy_from_slice(&block[10..16]);
        Self {
            key_a: MifareKey(key_a),
            access_bits,
            key_b: MifareKey(key_b),
        }
    }

    pub fn to_block(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[0..6].copy_from_slice(&self.key_a.0);
        block[6..10].copy_from_slice(&self.access_bits);
        block[10..16].copy_from_slice(&self.key_b.0);
        block
    }

    pub fn key(&self, slot: KeySlot) -> MifareKey {
        match slot {
            KeySlot::A => self.key_a,
            KeySlot::B => self.key_b,
        }
    }
}

impl Default for SectorTrailer {
    fn default() -> Self {
        Self::new(DEFAULT_KEY, DEFAULT_KEY)
    }
}
