//! Key recovery strategies.
//!
//! Only the dictionary search is implemented. The nonce-based attacks are
//! named so that configuration and history can refer to them, and the
//! dispatcher refuses them explicitly.

use cardsmith_io::CardHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::auth::SectorAuthenticator;
use crate::error::EngineError;
use crate::model::KeyPair;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackMethod {
    #[default]
    Dictionary,
    Hardnested,
    Nonce,
    Mkf32,
}

impl AttackMethod {
    pub fn label(self) -> &'static str {
        match self {
            AttackMethod::Dictionary => "dictionary",
            AttackMethod::Hardnested => "hardnested",
            AttackMethod::Nonce => "nonce",
            AttackMethod::Mkf32 => "mkf32",
        }
    }

    pub fn is_implemented(self) -> bool {
        matches!(self, AttackMethod::Dictionary)
    }
}

impl fmt::Display for AttackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AttackMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dictionary" => Ok(AttackMethod::Dictionary),
            "hardnested" => Ok(AttackMethod::Hardnested),
            "nonce" => Ok(AttackMethod::Nonce),
            "mkf32" => Ok(AttackMethod::Mkf32),
            other => Err(format!("unknown attack method '{}'", other)),
        }
    }
}

/// Result of one sector's recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRecovery {
    pub keys: Option<KeyPair>,
    pub attempts: u32,
}

/// Run `method` against one sector.
///
/// With `both_slots` the dictionary search continues for the slot the first
/// match did not cover.
pub async fn recover_sector<C: CardHandle + ?Sized>(
    method: AttackMethod,
    auth: &SectorAuthenticator,
    card: &mut C,
    sector: usize,
    both_slots: bool,
) -> Result<SectorRecovery, EngineError> {
    match method {
        AttackMethod::Dictionary => {
            let first = auth.authenticate(card, sector).await;
            let mut attempts = first.attempts;
            let Some(found) = first.found else {
                return Ok(SectorRecovery {
                    keys: None,
                    attempts,
                });
            };

            let mut pair = KeyPair::from_sector_key(found);
            if both_slots {
                let other = auth.search_slot(card, sector, found.slot.opposite()).await;
                attempts += other.attempts;
                if let Some(extra) = other.found {
                    pair.set(extra.slot, extra.key);
                }
            }
            Ok(SectorRecovery {
                keys: Some(pair),
                attempts,
            })
        }
        AttackMethod::Hardnested | AttackMethod::Nonce | AttackMethod::Mkf32 => {
            Err(EngineError::NotImplemented(method))
        }
    }
}
