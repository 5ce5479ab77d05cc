//! Sector authenticator: dictionary search against one sector.

use cardsmith_io::{CardHandle, KeySlot, MifareKey};
use tracing::debug;

use crate::error::EngineError;
use crate::keys::KeyDictionary;
use crate::model::SectorKey;

/// Outcome of a dictionary search. A miss is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSearch {
    pub sector: usize,
    pub found: Option<SectorKey>,
    /// Authenticate calls issued, failed transports included.
    pub attempts: u32,
}

impl AuthSearch {
    pub fn is_found(&self) -> bool {
        self.found.is_some()
    }

    pub fn into_result(self) -> Result<SectorKey, EngineError> {
        self.found.ok_or(EngineError::AuthFailed {
            sector: self.sector,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SectorAuthenticator {
    dictionary: KeyDictionary,
}

impl SectorAuthenticator {
    pub fn new(dictionary: KeyDictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &KeyDictionary {
        &self.dictionary
    }

    /// Try every key, A then B per key; stop at the first slot that opens.
    ///
    /// A sector with distinct valid A and B keys yields only whichever is
    /// found first. Use `search_slot` for the other one.
    pub async fn authenticate<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        sector: usize,
    ) -> AuthSearch {
        let mut attempts = 0;
        for key in self.dictionary.iter() {
            for slot in [KeySlot::A, KeySlot::B] {
                attempts += 1;
                if try_key(card, sector, &key, slot).await {
                    debug!(sector, %slot, key = %key.redacted(), attempts, "sector unlocked");
                    return AuthSearch {
                        sector,
                        found: Some(SectorKey::new(key, slot)),
                        attempts,
                    };
                }
            }
        }
        debug!(sector, attempts, "dictionary exhausted");
        AuthSearch {
            sector,
            found: None,
            attempts,
        }
    }

    /// Dictionary search restricted to one slot.
    pub async fn search_slot<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        sector: usize,
        slot: KeySlot,
    ) -> AuthSearch {
        let mut attempts = 0;
        for key in self.dictionary.iter() {
            attempts += 1;
            if try_key(card, sector, &key, slot).await {
                return AuthSearch {
                    sector,
                    found: Some(SectorKey::new(key, slot)),
                    attempts,
                };
            }
        }
        AuthSearch {
            sector,
            found: None,
            attempts,
        }
    }
}

/// One authenticate call. Transport errors count as "key does not work".
pub async fn try_key<C: CardHandle + ?Sized>(
    card: &mut C,
    sector: usize,
    key: &MifareKey,
    slot: KeySlot,
) -> bool {
    match card.authenticate(sector, key, slot).await {
        Ok(accepted) => accepted,
        Err(e) => {
            debug!(sector, %slot, "auth attempt failed: {}", e);
            false
        }
    }
}

/// Authenticate with a known key, retrying once with the opposite slot.
///
/// Returns the slot that actually worked.
pub async fn authenticate_known<C: CardHandle + ?Sized>(
    card: &mut C,
    sector: usize,
    known: SectorKey,
) -> Option<SectorKey> {
    if try_key(card, sector, &known.key, known.slot).await {
        return Some(known);
    }
    let flipped = SectorKey::new(known.key, known.slot.opposite());
    if try_key(card, sector, &flipped.key, flipped.slot).await {
        debug!(sector, "recorded slot {} was wrong, {} works", known.slot, flipped.slot);
        return Some(flipped);
    }
    None
}
