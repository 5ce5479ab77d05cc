//! In-memory MIFARE Classic card.
//!
//! Behaves like a real card as far as the engine can observe: keys live in
//! the sector trailers, only one sector is authenticated at a time, key A
//! reads back as zeros, and the manufacturer block is read-only unless the
//! card is a "magic" card. Faults can be injected per block or per sector.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use crate::addressing::{self, CardType};
use crate::error::HwError;
use crate::handle::CardHandle;
use crate::key::{KeySlot, MifareKey, SectorTrailer, KEY_SIZE};
use crate::{BLOCK_SIZE, Block};

const DEFAULT_UID: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

#[derive(Debug, Default, Clone)]
struct FaultPlan {
    connect: bool,
    close: bool,
    auth_transport: HashSet<usize>,
    layout: HashSet<usize>,
    reads: HashSet<usize>,
    writes: HashSet<usize>,
    corrupt_writes: HashSet<usize>,
}

/// Call counters, for asserting on engine behaviour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CardStats {
    pub connects: usize,
    pub closes: usize,
    pub auth_attempts: usize,
    pub reads: usize,
    pub writes: usize,
}

#[derive(Debug, Clone)]
pub struct SimulatedCard {
    card_type: CardType,
    uid: Vec<u8>,
    memory: Vec<Block>,
    connected: bool,
    authenticated: Option<usize>,
    magic: bool,
    faults: FaultPlan,
    stats: CardStats,
}

impl SimulatedCard {
    /// A factory-fresh card: zeroed data, transport keys everywhere.
    pub fn new(card_type: CardType) -> Self {
        let mut memory = vec![[0u8; BLOCK_SIZE]; card_type.block_count()];
        for sector in 0..card_type.sector_count() {
            memory[addressing::trailer_of(sector)] = SectorTrailer::default().to_block();
        }
        let mut card = Self {
            card_type,
            uid: DEFAULT_UID.to_vec(),
            memory,
            connected: false,
            authenticated: None,
            magic: false,
            faults: FaultPlan::default(),
            stats: CardStats::default(),
        };
        card.write_manufacturer_block();
        card
    }

    pub fn with_uid(mut self, uid: &[u8]) -> Self {
        self.uid = uid.to_vec();
        self.write_manufacturer_block();
        self
    }

    /// Replace both keys of a sector, keeping factory access bits.
    pub fn with_sector_keys(mut self, sector: usize, key_a: MifareKey, key_b: MifareKey) -> Self {
        self.memory[addressing::trailer_of(sector)] = SectorTrailer::new(key_a, key_b).to_block();
        self
    }

    pub fn with_block(mut self, index: usize, data: Block) -> Self {
        self.memory[index] = data;
        self
    }

    /// Gen1a-style card: UID and block 0 are writable.
    pub fn magic(mut self) -> Self {
        self.magic = true;
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.faults.connect = true;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.faults.close = true;
        self
    }

    /// Every authenticate call on `sector` fails at the transport level.
    pub fn fail_auth_transport(mut self, sector: usize) -> Self {
        self.faults.auth_transport.insert(sector);
        self
    }

    /// Layout queries for `sector` fail.
    pub fn fail_layout(mut self, sector: usize) -> Self {
        self.faults.layout.insert(sector);
        self
    }

    pub fn fail_read(mut self, block: usize) -> Self {
        self.faults.reads.insert(block);
        self
    }

    pub fn fail_write(mut self, block: usize) -> Self {
        self.faults.writes.insert(block);
        self
    }

    /// Writes to `block` are accepted but stored with a flipped last byte.
    pub fn corrupt_write(mut self, block: usize) -> Self {
        self.faults.corrupt_writes.insert(block);
        self
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Raw memory, bypassing authentication.
    pub fn block(&self, index: usize) -> Block {
        self.memory[index]
    }

    pub fn trailer(&self, sector: usize) -> SectorTrailer {
        SectorTrailer::parse(&self.memory[addressing::trailer_of(sector)])
    }

    pub fn stats(&self) -> CardStats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn write_manufacturer_block(&mut self) {
        let mut block = [0u8; BLOCK_SIZE];
        let len = self.uid.len().min(10);
        block[..len].copy_from_slice(&self.uid[..len]);
        if len == 4 {
            block[4] = self.uid.iter().fold(0, |acc, b| acc ^ b);
            block[5] = 0x08; // SAK
            block[6] = 0x04; // ATQA
            block[7] = 0x00;
        }
        self.memory[0] = block;
    }

    fn ensure_connected(&self) -> Result<(), HwError> {
        if self.connected {
            Ok(())
        } else {
            Err(HwError::NotConnected)
        }
    }

    fn ensure_in_range(&self, index: usize) -> Result<(), HwError> {
        if index < self.memory.len() {
            Ok(())
        } else {
            Err(HwError::OutOfRange { block: index })
        }
    }

    fn is_authenticated_for(&self, index: usize) -> bool {
        self.authenticated == Some(addressing::sector_of(index))
    }
}

#[async_trait]
impl CardHandle for SimulatedCard {
    async fn connect(&mut self) -> Result<(), HwError> {
        self.stats.connects += 1;
        if self.faults.connect {
            return Err(HwError::TagLost);
        }
        self.connected = true;
        self.authenticated = None;
        debug!(uid = %hex::encode_upper(&self.uid), "simulated card connected");
        Ok(())
    }

    fn close(&mut self) -> Result<(), HwError> {
        self.stats.closes += 1;
        self.connected = false;
        self.authenticated = None;
        if self.faults.close {
            return Err(HwError::Transceive("close failed".to_string()));
        }
        Ok(())
    }

    fn sector_count(&self) -> usize {
        self.card_type.sector_count()
    }

    fn block_count(&self) -> usize {
        self.card_type.block_count()
    }

    fn blocks_in_sector(&self, sector: usize) -> Result<usize, HwError> {
        if self.faults.layout.contains(&sector) {
            return Err(HwError::Transceive("layout query failed".to_string()));
        }
        if sector >= self.sector_count() {
            return Err(HwError::NoSuchSector { sector });
        }
        Ok(addressing::blocks_in_sector(sector))
    }

    fn first_block_of(&self, sector: usize) -> Result<usize, HwError> {
        if self.faults.layout.contains(&sector) {
            return Err(HwError::Transceive("layout query failed".to_string()));
        }
        if sector >= self.sector_count() {
            return Err(HwError::NoSuchSector { sector });
        }
        Ok(addressing::first_block_of(sector))
    }

    async fn authenticate(
        &mut self,
        sector: usize,
        key: &MifareKey,
        slot: KeySlot,
    ) -> Result<bool, HwError> {
        self.ensure_connected()?;
        if sector >= self.sector_count() {
            return Err(HwError::NoSuchSector { sector });
        }
        self.stats.auth_attempts += 1;
        if self.faults.auth_transport.contains(&sector) {
            self.authenticated = None;
            return Err(HwError::Transceive("no answer to AUTH".to_string()));
        }

        if self.trailer(sector).key(slot) == *key {
            self.authenticated = Some(sector);
            Ok(true)
        } else {
            // A failed AUTH drops the card back to the halted state.
            self.authenticated = None;
            Ok(false)
        }
    }

    async fn read_block(&mut self, index: usize) -> Result<Block, HwError> {
        self.ensure_connected()?;
        self.ensure_in_range(index)?;
        self.stats.reads += 1;
        if !self.is_authenticated_for(index) {
            return Err(HwError::ReadDenied { block: index });
        }
        if self.faults.reads.contains(&index) {
            return Err(HwError::Transceive(format!("read timeout on block {}", index)));
        }

        let mut data = self.memory[index];
        if addressing::is_trailer(index) {
            data[..KEY_SIZE].fill(0);
        }
        Ok(data)
    }

    async fn write_block(&mut self, index: usize, data: &Block) -> Result<(), HwError> {
        self.ensure_connected()?;
        self.ensure_in_range(index)?;
        self.stats.writes += 1;
        if !self.is_authenticated_for(index) || (index == 0 && !self.magic) {
            return Err(HwError::WriteRejected { block: index });
        }
        if self.faults.writes.contains(&index) {
            return Err(HwError::Transceive(format!("write NAK on block {}", index)));
        }

        let mut stored = *data;
        if self.faults.corrupt_writes.contains(&index) {
            stored[BLOCK_SIZE - 1] ^= 0xFF;
        }
        self.memory[index] = stored;
        Ok(())
    }

    fn uid(&self) -> Vec<u8> {
        self.uid.clone()
    }

    async fn write_uid(&mut self, uid: &[u8]) -> Result<(), HwError> {
        self.ensure_connected()?;
        if !self.magic {
            return Err(HwError::Unsupported("UID rewrite"));
        }
        self.uid = uid.to_vec();
        self.write_manufacturer_block();
        Ok(())
    }
}
