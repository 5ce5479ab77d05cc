//! Per-operation lifecycle.
//!
//! Idle -> Connecting -> InProgress(unit) -> Finalizing -> Completed | Failed.
//! A fresh tracker is created for every operation; nothing carries over.

use std::fmt;
use tracing::{debug, warn};

use crate::model::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Connecting,
    /// Index of the sector or block being processed.
    InProgress(usize),
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }

    fn can_move_to(self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, InProgress(_)) | (InProgress(_), InProgress(_)) => true,
            (Connecting, Finalizing) | (InProgress(_), Finalizing) => true,
            (Finalizing, Completed) => true,
            (Connecting | InProgress(_) | Finalizing, Failed) => true,
            (Connecting | InProgress(_), Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Idle => f.write_str("idle"),
            OperationState::Connecting => f.write_str("connecting"),
            OperationState::InProgress(unit) => write!(f, "in-progress({})", unit),
            OperationState::Finalizing => f.write_str("finalizing"),
            OperationState::Completed => f.write_str("completed"),
            OperationState::Failed => f.write_str("failed"),
            OperationState::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug)]
pub struct StateTracker {
    operation: OperationKind,
    state: OperationState,
}

impl StateTracker {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            state: OperationState::Idle,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Move to `next`. Illegal moves are logged and ignored.
    pub fn advance(&mut self, next: OperationState) -> bool {
        if !self.state.can_move_to(next) {
            warn!(
                operation = %self.operation,
                "ignoring illegal transition {} -> {}", self.state, next
            );
            return false;
        }
        debug!(operation = %self.operation, "{} -> {}", self.state, next);
        self.state = next;
        true
    }
}
