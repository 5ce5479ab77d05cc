use thiserror::Error;

/// Failure reported by the card or the reader in front of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("card is not connected")]
    NotConnected,
    #[error("tag was lost")]
    TagLost,
    #[error("transceive failed: {0}")]
    Transceive(String),
    #[error("block {block} is out of range")]
    OutOfRange { block: usize },
    #[error("sector {sector} does not exist on this card")]
    NoSuchSector { sector: usize },
    #[error("block {block} is not readable in the current authentication state")]
    ReadDenied { block: usize },
    #[error("card rejected write to block {block}")]
    WriteRejected { block: usize },
    #[error("operation not supported by this card: {0}")]
    Unsupported(&'static str),
}

impl HwError {
    /// True for errors that mean the card is gone rather than uncooperative.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, HwError::NotConnected | HwError::TagLost)
    }
}
