//! Block I/O engine: sector reads and verified block writes.
//!
//! Failures are recorded per block and never abort the surrounding sector or
//! write run.

use cardsmith_io::{BLOCK_SIZE, Block, BlockAddress, CardHandle, KeySlot, SectorTrailer};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::auth::{AuthSearch, SectorAuthenticator, authenticate_known};
use crate::error::EngineError;
use crate::events::{CardEvent, ProgressEvent, WriteResult};
use crate::model::{BlockRecord, SectorKey};
use crate::stream::Emitter;

pub const NOT_AUTHENTICATED: &str = "sector not authenticated";

/// Block layout used when the card cannot describe a sector.
pub const FALLBACK_SECTOR_BLOCKS: usize = 4;

/// All records of one sector plus the search that unlocked it.
#[derive(Debug, Clone)]
pub struct SectorRead {
    pub records: Vec<BlockRecord>,
    pub search: AuthSearch,
}

/// First block and block count of a sector as the card reports them.
pub fn sector_layout<C: CardHandle + ?Sized>(card: &C, sector: usize) -> (usize, usize) {
    match (card.first_block_of(sector), card.blocks_in_sector(sector)) {
        (Ok(first), Ok(count)) => (first, count),
        (first, _) => {
            warn!(sector, "sector layout unavailable, assuming 4 blocks");
            (
                first.unwrap_or(sector * FALLBACK_SECTOR_BLOCKS),
                FALLBACK_SECTOR_BLOCKS,
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockIo {
    auth: SectorAuthenticator,
    verify_writes: bool,
}

impl BlockIo {
    pub fn new(auth: SectorAuthenticator, verify_writes: bool) -> Self {
        Self {
            auth,
            verify_writes,
        }
    }

    pub fn authenticator(&self) -> &SectorAuthenticator {
        &self.auth
    }

    /// Authenticate and read every block of `sector`.
    ///
    /// Always returns one record per block of the sector's layout.
    pub async fn read_sector<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        sector: usize,
    ) -> SectorRead {
        let (first, count) = sector_layout(card, sector);
        let search = self.auth.authenticate(card, sector).await;
        let mut records = Vec::with_capacity(count);

        for offset in 0..count {
            let block = first + offset;
            let address = BlockAddress { sector, block };
            let is_trailer = offset == count - 1;

            let Some(used) = search.found else {
                records.push(BlockRecord::failed(address, is_trailer, None, NOT_AUTHENTICATED));
                continue;
            };

            match card.read_block(block).await {
                Ok(mut data) => {
                    if is_trailer {
                        fill_trailer_key(&mut data, used);
                    }
                    records.push(BlockRecord::read(address, is_trailer, &data, used));
                }
                Err(e) => {
                    debug!(sector, block, "read failed: {}", e);
                    records.push(BlockRecord::failed(address, is_trailer, Some(used), e.to_string()));
                }
            }
        }

        SectorRead { records, search }
    }

    /// Write every writable record, verifying each one by read-back.
    ///
    /// Trailers and empty records are skipped. Blocks are written in ascending
    /// order and one `Write` event is emitted after every attempted block.
    pub async fn write_blocks<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        records: &[BlockRecord],
        emitter: &Emitter,
    ) -> Result<WriteResult, EngineError> {
        // Ascending block order; the first record for a repeated block wins.
        let mut targets: Vec<&BlockRecord> = records.iter().filter(|r| r.is_writable()).collect();
        targets.sort_by_key(|r| r.block());
        targets.dedup_by_key(|r| r.block());
        let total = targets.len();
        let mut result = WriteResult {
            block: None,
            written_blocks: 0,
            total_blocks: total,
            errors: Vec::new(),
            success: true,
            confirmation_required: false,
        };

        for (index, record) in targets.into_iter().enumerate() {
            let block = record.block();
            match self.write_one(card, record).await {
                Ok(()) => result.written_blocks += 1,
                Err((written, e)) => {
                    if written {
                        result.written_blocks += 1;
                    }
                    warn!(block, "write error: {}", e);
                    result.errors.push(format!("block {}: {}", block, e));
                }
            }
            result.block = Some(block);
            result.success = result.errors.is_empty();

            emitter
                .emit(CardEvent::Progress(ProgressEvent::Writing {
                    current: index + 1,
                    total,
                    message: format!("Writing block {} ({}/{})", block, index + 1, total),
                }))
                .await?;
            emitter.emit(CardEvent::Write(result.clone())).await?;
        }

        Ok(result)
    }

    /// On error, the flag says whether the write itself reached the card.
    async fn write_one<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        record: &BlockRecord,
    ) -> Result<(), (bool, EngineError)> {
        let block = record.block();
        let sector = record.sector();
        let known = record
            .sector_key()
            .ok_or((false, EngineError::NoKeyRecorded { block }))?;
        let data = to_block(&record.data).ok_or_else(|| (false, bad_payload(block)))?;

        if authenticate_known(card, sector, known).await.is_none() {
            return Err((false, EngineError::KeyRejected { sector }));
        }

        card.write_block(block, &data)
            .await
            .map_err(|e| (false, EngineError::Hardware(e)))?;

        if self.verify_writes {
            let back = card
                .read_block(block)
                .await
                .map_err(|e| (true, EngineError::Hardware(e)))?;
            if back != data {
                return Err((true, EngineError::VerificationMismatch { block }));
            }
        }
        Ok(())
    }

    /// Authenticate-then-write without read-back, used by clone.
    ///
    /// Falls back to a dictionary search on the target sector when the
    /// recorded key does not open it; the found key is cached per sector.
    pub async fn write_single<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        record: &BlockRecord,
        target_keys: &mut HashMap<usize, Option<SectorKey>>,
    ) -> Result<(), EngineError> {
        let block = record.block();
        let sector = record.sector();
        let data = to_block(&record.data).ok_or_else(|| bad_payload(block))?;

        let unlocked = match target_keys.get(&sector).copied() {
            Some(Some(cached)) => authenticate_known(card, sector, cached).await,
            // The dictionary already failed on this sector.
            Some(None) => None,
            None => {
                let recorded = match record.sector_key() {
                    Some(known) => authenticate_known(card, sector, known).await,
                    None => None,
                };
                match recorded {
                    Some(found) => Some(found),
                    None => self.auth.authenticate(card, sector).await.found,
                }
            }
        };
        target_keys.insert(sector, unlocked);

        if unlocked.is_none() {
            return Err(EngineError::AuthFailed { sector });
        }

        card.write_block(block, &data).await?;
        Ok(())
    }
}

fn bad_payload(block: usize) -> EngineError {
    EngineError::Unsupported(format!("payload of block {} is not 16 bytes", block))
}

fn to_block(data: &[u8]) -> Option<Block> {
    <[u8; BLOCK_SIZE]>::try_from(data).ok()
}

/// Cards never return key A, and may hide key B. Put back the one we know.
fn fill_trailer_key(data: &mut Block, used: SectorKey) {
    let mut trailer = SectorTrailer::parse(data);
    match used.slot {
        KeySlot::A => trailer.key_a = used.key,
        KeySlot::B => trailer.key_b = used.key,
    }
    *data = trailer.to_block();
}
