//! The card capability consumed by the engine.

use async_trait::async_trait;

use crate::addressing;
use crate::error::HwError;
use crate::key::{KeySlot, MifareKey};
use crate::Block;

/// An already-discovered MIFARE Classic card behind some reader.
///
/// Every async method is a hardware round trip and may suspend the caller.
/// `close` is synchronous so it can run from a drop guard when an operation
/// is cancelled mid-flight.
#[async_trait]
pub trait CardHandle: Send {
    async fn connect(&mut self) -> Result<(), HwError>;

    fn close(&mut self) -> Result<(), HwError>;

    fn sector_count(&self) -> usize;

    fn block_count(&self) -> usize;

    /// Block count of one sector. The default follows the two-zone rule.
    fn blocks_in_sector(&self, sector: usize) -> Result<usize, HwError> {
        if sector >= self.sector_count() {
            return Err(HwError::NoSuchSector { sector });
        }
        Ok(addressing::blocks_in_sector(sector))
    }

    fn first_block_of(&self, sector: usize) -> Result<usize, HwError> {
        if sector >= self.sector_count() {
            return Err(HwError::NoSuchSector { sector });
        }
        Ok(addressing::first_block_of(sector))
    }

    /// `Ok(false)` means the card refused the key.
    async fn authenticate(
        &mut self,
        sector: usize,
        key: &MifareKey,
        slot: KeySlot,
    ) -> Result<bool, HwError>;

    async fn read_block(&mut self, index: usize) -> Result<Block, HwError>;

    async fn write_block(&mut self, index: usize, data: &Block) -> Result<(), HwError>;

    fn uid(&self) -> Vec<u8>;

    /// Rewrite the card UID. Only "magic" cards accept this.
    async fn write_uid(&mut self, _uid: &[u8]) -> Result<(), HwError> {
        Err(HwError::Unsupported("UID rewrite"))
    }
}
