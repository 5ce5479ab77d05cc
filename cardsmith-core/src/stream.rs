//! Bounded, ordered progress channel between an operation and its observer.
//!
//! The stream is finite and cannot be restarted. Dropping the
//! `ProgressStream` cancels the producing operation at its next emit.

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::events::CardEvent;

pub const DEFAULT_CAPACITY: usize = 64;

pub fn channel(capacity: usize) -> (Emitter, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Emitter { tx }, ProgressStream { rx, done: false })
}

/// Producer half, owned by the running operation.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: mpsc::Sender<CardEvent>,
}

impl Emitter {
    /// Push one event; waits while the channel is full.
    pub async fn emit(&self, event: CardEvent) -> Result<(), EngineError> {
        self.tx.send(event).await.map_err(|_| EngineError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::Receiver<CardEvent>,
    done: bool,
}

impl ProgressStream {
    /// Next event, or `None` once the terminal event has been taken or the
    /// operation went away.
    pub async fn next(&mut self) -> Option<CardEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        match &event {
            Some(ev) if ev.is_terminal() => self.done = true,
            None => self.done = true,
            _ => {}
        }
        event
    }

    /// Drain the stream up to and including its terminal event.
    pub async fn collect(mut self) -> Vec<CardEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Stop the operation at its next emission point.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}
