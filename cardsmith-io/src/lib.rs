//! # Cardsmith IO
//!
//! The Card Bridge.
//! Everything the engine knows about a physical MIFARE Classic card goes
//! through the `CardHandle` capability defined here. The radio layer lives
//! behind implementations of that trait; `SimulatedCard` is the in-memory one.

pub mod addressing;
pub mod error;
pub mod handle;
pub mod key;
pub mod simulated;

pub use addressing::{BlockAddress, CardType};
pub use error::HwError;
pub use handle::CardHandle;
pub use key::{DEFAULT_KEY, KEY_SIZE, KeySlot, MifareKey, SectorTrailer};
pub use simulated::{CardStats, SimulatedCard};

pub const BLOCK_SIZE: usize = 16;

/// One 16-byte block of card memory.
pub type Block = [u8; BLOCK_SIZE];
