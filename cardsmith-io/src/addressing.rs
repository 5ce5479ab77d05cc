//! Two-zone MIFARE Classic block addressing.
//!
//! Blocks below 128 belong to 4-block sectors (sectors 0..32).
//! Blocks at or above 128 belong to 16-block sectors (sectors 32..40).
//! The last block of every sector is its trailer.

use serde::{Deserialize, Serialize};

/// First absolute block of the 16-block zone.
pub const ZONE_BOUNDARY_BLOCK: usize = 128;
/// Number of 4-block sectors before the boundary.
pub const SMALL_SECTOR_COUNT: usize = 32;
pub const SMALL_SECTOR_BLOCKS: usize = 4;
pub const LARGE_SECTOR_BLOCKS: usize = 16;

/// Sector that owns an absolute block index.
pub fn sector_of(block: usize) -> usize {
    if block < ZONE_BOUNDARY_BLOCK {
        block / SMALL_SECTOR_BLOCKS
    } else {
        SMALL_SECTOR_COUNT + (block - ZONE_BOUNDARY_BLOCK) / LARGE_SECTOR_BLOCKS
    }
}

/// Absolute index of a sector's first block.
pub fn first_block_of(sector: usize) -> usize {
    if sector < SMALL_SECTOR_COUNT {
        sector * SMALL_SECTOR_BLOCKS
    } else {
        ZONE_BOUNDARY_BLOCK + (sector - SMALL_SECTOR_COUNT) * LARGE_SECTOR_BLOCKS
    }
}

pub fn blocks_in_sector(sector: usize) -> usize {
    if sector < SMALL_SECTOR_COUNT {
        SMALL_SECTOR_BLOCKS
    } else {
        LARGE_SECTOR_BLOCKS
    }
}

/// Absolute index of a sector's trailer block.
pub fn trailer_of(sector: usize) -> usize {
    first_block_of(sector) + blocks_in_sector(sector) - 1
}

pub fn is_trailer(block: usize) -> bool {
    trailer_of(sector_of(block)) == block
}

/// Position of a block on the card.
///
/// `block` is the absolute index; `sector` is always derivable from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockAddress {
    pub sector: usize,
    pub block: usize,
}

impl BlockAddress {
    pub fn from_block(block: usize) -> Self {
        Self {
            sector: sector_of(block),
            block,
        }
    }

    pub fn is_trailer(&self) -> bool {
        is_trailer(self.block)
    }

    /// Offset of the block within its sector.
    pub fn offset(&self) -> usize {
        self.block - first_block_of(self.sector)
    }
}

/// Physical MIFARE Classic variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardType {
    Mini,
    Classic1K,
    Classic2K,
    Classic4K,
}

impl CardType {
    pub fn sector_count(self) -> usize {
        match self {
            CardType::Mini => 5,
            CardType::Classic1K => 16,
            CardType::Classic2K => 32,
            CardType::Classic4K => 40,
        }
    }

    pub fn block_count(self) -> usize {
        let sectors = self.sector_count();
        first_block_of(sectors - 1) + blocks_in_sector(sectors - 1)
    }

    /// Memory size in bytes.
    pub fn size(self) -> usize {
        self.block_count() * crate::BLOCK_SIZE
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CardType::Mini => "MIFARE Classic Mini",
            CardType::Classic1K => "MIFARE Classic 1K",
            CardType::Classic2K => "MIFARE Classic 2K",
            CardType::Classic4K => "MIFARE Classic 4K",
        };
        f.write_str(name)
    }
}
