//! Card data model.
//!
//! Records are built once and never mutated in place; a newer view of the
//! card supersedes an older one by re-emission.

use cardsmith_io::{BlockAddress, KeySlot, MifareKey};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::attack::AttackMethod;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A working key and the slot it opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorKey {
    pub key: MifareKey,
    pub slot: KeySlot,
}

impl SectorKey {
    pub fn new(key: MifareKey, slot: KeySlot) -> Self {
        Self { key, slot }
    }
}

/// Keys recovered for one sector. At least one side is set after a crack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub key_a: Option<MifareKey>,
    pub key_b: Option<MifareKey>,
}

impl KeyPair {
    pub fn from_sector_key(found: SectorKey) -> Self {
        let mut pair = Self::default();
        pair.set(found.slot, found.key);
        pair
    }

    pub fn get(&self, slot: KeySlot) -> Option<MifareKey> {
        match slot {
            KeySlot::A => self.key_a,
            KeySlot::B => self.key_b,
        }
    }

    pub fn set(&mut self, slot: KeySlot, key: MifareKey) {
        match slot {
            KeySlot::A => self.key_a = Some(key),
            KeySlot::B => self.key_b = Some(key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_a.is_none() && self.key_b.is_none()
    }

    /// Preferred key for authenticating, A before B.
    pub fn best(&self) -> Option<SectorKey> {
        self.key_a
            .map(|key| SectorKey::new(key, KeySlot::A))
            .or_else(|| self.key_b.map(|key| SectorKey::new(key, KeySlot::B)))
    }
}

/// One block as seen by one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub address: BlockAddress,
    /// 16 bytes when read, empty otherwise.
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
    pub is_trailer: bool,
    pub cracked: bool,
    pub key: Option<MifareKey>,
    pub slot: Option<KeySlot>,
    pub error: Option<String>,
}

impl BlockRecord {
    pub fn read(address: BlockAddress, is_trailer: bool, data: &[u8], used: SectorKey) -> Self {
        Self {
            address,
            data: data.to_vec(),
            is_trailer,
            cracked: true,
            key: Some(used.key),
            slot: Some(used.slot),
            error: None,
        }
    }

    /// Block that could not be read. The key is kept when the sector was
    /// unlocked so a later write can still reuse it.
    pub fn failed(
        address: BlockAddress,
        is_trailer: bool,
        used: Option<SectorKey>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            address,
            data: Vec::new(),
            is_trailer,
            cracked: false,
            key: used.map(|u| u.key),
            slot: used.map(|u| u.slot),
            error: Some(reason.into()),
        }
    }

    pub fn block(&self) -> usize {
        self.address.block
    }

    pub fn sector(&self) -> usize {
        self.address.sector
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sector_key(&self) -> Option<SectorKey> {
        match (self.key, self.slot) {
            (Some(key), Some(slot)) => Some(SectorKey::new(key, slot)),
            _ => None,
        }
    }

    /// Data blocks holding a full payload; the only blocks ever written back.
    pub fn is_writable(&self) -> bool {
        !self.is_trailer && self.data.len() == cardsmith_io::BLOCK_SIZE
    }
}

/// Number of distinct sectors with at least one cracked block.
pub fn cracked_sector_count(blocks: &[BlockRecord]) -> usize {
    let mut sectors: Vec<usize> = blocks
        .iter()
        .filter(|b| b.cracked)
        .map(|b| b.sector())
        .collect();
    sectors.sort_unstable();
    sectors.dedup();
    sectors.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Read,
    Write,
    Crack,
    Clone,
    Format,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Crack => "crack",
            OperationKind::Clone => "clone",
            OperationKind::Format => "format",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(OperationKind::Read),
            "write" => Ok(OperationKind::Write),
            "crack" => Ok(OperationKind::Crack),
            "clone" => Ok(OperationKind::Clone),
            "format" => Ok(OperationKind::Format),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// One operation against one card, as handed to the session recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub operation: OperationKind,
    pub card_uid: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub sector_count: usize,
    pub block_count: usize,
    pub cracked_sectors: usize,
    /// JSON snapshot of the block records.
    pub snapshot: String,
    pub attack_method: String,
    pub success: bool,
    pub notes: String,
}

impl SessionSummary {
    pub fn start(
        operation: OperationKind,
        uid: &[u8],
        sector_count: usize,
        block_count: usize,
        method: AttackMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            card_uid: hex::encode_upper(uid),
            started_at: now_millis(),
            ended_at: None,
            sector_count,
            block_count,
            cracked_sectors: 0,
            snapshot: String::new(),
            attack_method: method.label().to_string(),
            success: false,
            notes: String::new(),
        }
    }

    /// The one end-of-operation update.
    pub fn finish(
        mut self,
        cracked_sectors: usize,
        snapshot: String,
        success: bool,
        notes: impl Into<String>,
    ) -> Self {
        self.ended_at = Some(now_millis().max(self.started_at));
        self.cracked_sectors = cracked_sectors;
        self.snapshot = snapshot;
        self.success = success;
        self.notes = notes.into();
        self
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn duration_ms(&self) -> i64 {
        self.ended_at.map(|end| end - self.started_at).unwrap_or(0)
    }
}

/// Append-only summary of a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Option<i64>,
    pub session_id: String,
    pub operation: OperationKind,
    pub card_uid: String,
    pub total_sectors: usize,
    pub cracked_sectors: usize,
    pub success_rate: f64,
    pub duration_ms: i64,
    pub payload: String,
    pub created_at: i64,
}

impl HistoryRecord {
    pub fn from_session(session: &SessionSummary, payload: String) -> Self {
        Self {
            id: None,
            session_id: session.id.clone(),
            operation: session.operation,
            card_uid: session.card_uid.clone(),
            total_sectors: session.sector_count,
            cracked_sectors: session.cracked_sectors,
            success_rate: success_rate(session.cracked_sectors, session.sector_count),
            duration_ms: session.duration_ms(),
            payload,
            created_at: now_millis(),
        }
    }
}

/// cracked / total as a percentage; 0 for an empty card.
pub fn success_rate(cracked: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        cracked as f64 / total as f64 * 100.0
    }
}
