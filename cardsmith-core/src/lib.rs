pub mod attack;
pub mod auth;
pub mod block_io;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod keys;
pub mod model;
pub mod recorder;
pub mod state_machine;
pub mod stream;
pub mod vault;

// Re-export the main struct so users can just use `cardsmith_core::CardEngine`
pub use engine::{CardEngine, CrackOutcome, Operation, ReadOutcome};

pub use attack::AttackMethod;
pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{CardEvent, CloneResult, CloneStep, CrackResult, FormatResult, ProgressEvent, WriteResult};
pub use keys::KeyDictionary;
pub use model::{BlockRecord, HistoryRecord, KeyPair, OperationKind, SectorKey, SessionSummary};
pub use recorder::SessionRecorder;
pub use stream::{Emitter, ProgressStream};
pub use vault::Vault;
