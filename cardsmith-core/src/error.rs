use cardsmith_io::HwError;
use thiserror::Error;

use crate::attack::AttackMethod;

/// Everything an operation can fail with.
///
/// Block- and sector-scoped variants are normally rendered into result
/// records; only connection-scoped failures and cancellation end an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("hardware error: {0}")]
    Hardware(#[from] HwError),

    #[error("no dictionary key unlocks sector {sector}")]
    AuthFailed { sector: usize },

    #[error("recorded key rejected by sector {sector}")]
    KeyRejected { sector: usize },

    #[error("verification failed for block {block}: read-back differs from written data")]
    VerificationMismatch { block: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("attack method '{0}' is not implemented")]
    NotImplemented(AttackMethod),

    #[error("no key recorded for block {block}")]
    NoKeyRecorded { block: usize },

    #[error("operation cancelled")]
    Cancelled,
}
