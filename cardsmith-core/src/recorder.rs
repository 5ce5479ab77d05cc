//! The session recorder seam.
//!
//! The engine calls these fire-and-forget: a failure is logged by the caller
//! and never fails the card operation.

use anyhow::Result;

use crate::attack::AttackMethod;
use crate::model::{HistoryRecord, KeyPair, SessionSummary};

pub trait SessionRecorder: Send + Sync {
    /// Operation start; `ended_at` is unset.
    fn insert_session(&self, session: &SessionSummary) -> Result<()>;

    /// The single end-of-operation update.
    fn update_session(&self, session: &SessionSummary) -> Result<()>;

    fn insert_found_key(
        &self,
        session_id: &str,
        sector: usize,
        keys: &KeyPair,
        method: AttackMethod,
    ) -> Result<()>;

    fn insert_history(&self, record: &HistoryRecord) -> Result<()>;
}

impl<R: SessionRecorder + ?Sized> SessionRecorder for std::sync::Arc<R> {
    fn insert_session(&self, session: &SessionSummary) -> Result<()> {
        (**self).insert_session(session)
    }

    fn update_session(&self, session: &SessionSummary) -> Result<()> {
        (**self).update_session(session)
    }

    fn insert_found_key(
        &self,
        session_id: &str,
        sector: usize,
        keys: &KeyPair,
        method: AttackMethod,
    ) -> Result<()> {
        (**self).insert_found_key(session_id, sector, keys, method)
    }

    fn insert_history(&self, record: &HistoryRecord) -> Result<()> {
        (**self).insert_history(record)
    }
}
