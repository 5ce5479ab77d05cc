//! What an operation streams to its observer.

use serde::{Deserialize, Serialize};

use crate::attack::AttackMethod;
use crate::model::{BlockRecord, KeyPair, OperationKind, SessionSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneStep {
    ReadingSource,
    WritingTarget,
    CloningUid,
    Completed,
    Error,
}

/// Human-facing progress tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Reading { current: usize, total: usize, message: String },
    Writing { current: usize, total: usize, message: String },
    Cracking { current: usize, total: usize, message: String },
    Cloning { step: CloneStep, current: usize, total: usize, message: String },
    Formatting { current: usize, total: usize, message: String },
}

impl ProgressEvent {
    pub fn counters(&self) -> (usize, usize) {
        match self {
            ProgressEvent::Reading { current, total, .. }
            | ProgressEvent::Writing { current, total, .. }
            | ProgressEvent::Cracking { current, total, .. }
            | ProgressEvent::Cloning { current, total, .. }
            | ProgressEvent::Formatting { current, total, .. } => (*current, *total),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Reading { message, .. }
            | ProgressEvent::Writing { message, .. }
            | ProgressEvent::Cracking { message, .. }
            | ProgressEvent::Cloning { message, .. }
            | ProgressEvent::Formatting { message, .. } => message,
        }
    }
}

/// Running state of a write after one block attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Block just attempted; `None` before any attempt.
    pub block: Option<usize>,
    pub written_blocks: usize,
    pub total_blocks: usize,
    pub errors: Vec<String>,
    pub success: bool,
    pub confirmation_required: bool,
}

impl WriteResult {
    pub fn confirmation_required(total_blocks: usize) -> Self {
        Self {
            block: None,
            written_blocks: 0,
            total_blocks,
            errors: Vec::new(),
            success: false,
            confirmation_required: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrackResult {
    pub sector: usize,
    pub key_pair: Option<KeyPair>,
    pub method: AttackMethod,
    pub success: bool,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneResult {
    pub step: CloneStep,
    /// 0 to 100.
    pub progress: f32,
    pub read_blocks: usize,
    pub written_blocks: usize,
    pub total_writable: usize,
    pub write_errors: Vec<String>,
    pub uid_cloned: Option<bool>,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatResult {
    pub current_block: usize,
    pub total_blocks: usize,
    pub formatted_blocks: usize,
    /// 0 to 100.
    pub progress: f32,
    pub completed: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl FormatResult {
    /// Whole-card failure: no partial counts.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            current_block: 0,
            total_blocks: 0,
            formatted_blocks: 0,
            progress: 0.0,
            completed: true,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// One item of an operation's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CardEvent {
    Progress(ProgressEvent),
    /// Every block read so far, in address order.
    Blocks(Vec<BlockRecord>),
    Write(WriteResult),
    Crack(CrackResult),
    Clone(CloneResult),
    Format(FormatResult),
    Completed(SessionSummary),
    Failed {
        operation: OperationKind,
        message: String,
    },
}

impl CardEvent {
    /// Last event of a stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            CardEvent::Completed(_) | CardEvent::Failed { .. } => true,
            CardEvent::Write(result) => result.confirmation_required,
            _ => false,
        }
    }
}
