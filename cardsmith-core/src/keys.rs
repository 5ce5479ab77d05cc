//! The key dictionary.
//!
//! An ordered, immutable list of candidate keys. Order matters: the
//! authenticator tries keys front to back, so the most likely keys come first.

use anyhow::{Context, Result};
use cardsmith_io::MifareKey;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const fn k(bytes: [u8; 6]) -> MifareKey {
    MifareKey::new(bytes)
}

/// Manufacturer defaults and transport keys.
const DEFAULT_KEYS: &[MifareKey] = &[
    k([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
    k([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]),
    k([0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7]),
    k([0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
    k([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]),
    k([0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD]),
    k([0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A]),
    k([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
    k([0x71, 0x4C, 0x5C, 0x88, 0x6E, 0x97]),
    k([0x58, 0x7E, 0xE5, 0xF9, 0x35, 0x0F]),
    k([0xA0, 0x47, 0x8C, 0xC3, 0x90, 0x91]),
    k([0x53, 0x3C, 0xB6, 0xC7, 0x23, 0xF6]),
    k([0x8F, 0xD0, 0xA4, 0xF2, 0x56, 0xE9]),
];

/// Keys seen in public transport and access-control deployments.
const TRANSPORT_KEYS: &[MifareKey] = &[
    k([0xA6, 0x45, 0x98, 0xA7, 0x74, 0x78]),
    k([0x26, 0x94, 0x0B, 0x21, 0xFF, 0x5D]),
    k([0xFC, 0x00, 0x01, 0x87, 0x78, 0xF7]),
    k([0x00, 0x00, 0x0F, 0xFE, 0x24, 0x88]),
    k([0x5C, 0x59, 0x8C, 0x9C, 0x58, 0xB5]),
    k([0xE4, 0xD2, 0x77, 0x0A, 0x89, 0xBE]),
    k([0x43, 0x4F, 0x4D, 0x4D, 0x4F, 0x41]),
    k([0x43, 0x4F, 0x4D, 0x4D, 0x4F, 0x42]),
    k([0x47, 0x52, 0x4F, 0x55, 0x50, 0x41]),
    k([0x47, 0x52, 0x4F, 0x55, 0x50, 0x42]),
    k([0x50, 0x52, 0x49, 0x56, 0x41, 0x41]),
    k([0x50, 0x52, 0x49, 0x56, 0x41, 0x42]),
    k([0x02, 0x97, 0x92, 0x7C, 0x0F, 0x77]),
    k([0xEE, 0x00, 0x42, 0xF8, 0x88, 0x40]),
    k([0x72, 0x2B, 0xFC, 0xC5, 0x37, 0x5F]),
    k([0xF1, 0xD8, 0x3F, 0x96, 0x43, 0x14]),
];

/// Weak, patterned keys people type by hand.
const WEAK_KEYS: &[MifareKey] = &[
    k([0x11, 0x11, 0x11, 0x11, 0x11, 0x11]),
    k([0x22, 0x22, 0x22, 0x22, 0x22, 0x22]),
    k([0x33, 0x33, 0x33, 0x33, 0x33, 0x33]),
    k([0x44, 0x44, 0x44, 0x44, 0x44, 0x44]),
    k([0x55, 0x55, 0x55, 0x55, 0x55, 0x55]),
    k([0x66, 0x66, 0x66, 0x66, 0x66, 0x66]),
    k([0x77, 0x77, 0x77, 0x77, 0x77, 0x77]),
    k([0x88, 0x88, 0x88, 0x88, 0x88, 0x88]),
    k([0x99, 0x99, 0x99, 0x99, 0x99, 0x99]),
    k([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]),
    k([0xBB, 0xBB, 0xBB, 0xBB, 0xBB, 0xBB]),
    k([0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]),
    k([0xDD, 0xDD, 0xDD, 0xDD, 0xDD, 0xDD]),
    k([0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE]),
    k([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]),
    k([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]),
    k([0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56]),
    k([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]),
    k([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
];

/// Ordered, immutable candidate key list. Cheap to clone and share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDictionary {
    keys: Arc<[MifareKey]>,
}

impl KeyDictionary {
    /// Built-in dictionary: defaults, then transport keys, then weak keys.
    pub fn builtin() -> Self {
        Self::from_keys(
            DEFAULT_KEYS
                .iter()
                .chain(TRANSPORT_KEYS)
                .chain(WEAK_KEYS)
                .copied(),
        )
    }

    /// Build from any key sequence, dropping later duplicates.
    pub fn from_keys<I: IntoIterator<Item = MifareKey>>(keys: I) -> Self {
        let mut seen = HashSet::new();
        let keys: Vec<MifareKey> = keys.into_iter().filter(|key| seen.insert(*key)).collect();
        Self { keys: keys.into() }
    }

    /// Parse one 12-hex-digit key per line. `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let mut keys = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let key: MifareKey = content
                .parse()
                .with_context(|| format!("line {}: '{}'", number + 1, content))?;
            keys.push(key);
        }
        Ok(Self::from_keys(keys))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid key file {}", path.display()))
    }

    /// `extra` keys first, then this dictionary, deduplicated.
    pub fn with_extra(&self, extra: &KeyDictionary) -> Self {
        Self::from_keys(extra.iter().chain(self.iter()))
    }

    pub fn iter(&self) -> impl Iterator<Item = MifareKey> + '_ {
        self.keys.iter().copied()
    }

    pub fn keys(&self) -> &[MifareKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &MifareKey) -> bool {
        self.keys.contains(key)
    }

    pub fn position(&self, key: &MifareKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

impl Default for KeyDictionary {
    fn default() -> Self {
        Self::builtin()
    }
}
