use cardsmith_io::{BLOCK_SIZE, BlockAddress, CardHandle, HwError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::attack::{self, AttackMethod};
use crate::auth::SectorAuthenticator;
use crate::block_io::BlockIo;
use crate::config::EngineConfig;
use crate::connection::ConnectedCard;
use crate::error::EngineError;
use crate::events::{
    CardEvent, CloneResult, CloneStep, CrackResult, FormatResult, ProgressEvent, WriteResult,
};
use crate::keys::KeyDictionary;
use crate::model::{
    BlockRecord, HistoryRecord, KeyPair, OperationKind, SessionSummary, cracked_sector_count,
};
use crate::recorder::SessionRecorder;
use crate::state_machine::{OperationState, StateTracker};
use crate::stream::{self, Emitter, ProgressStream};

/// Outcome of a completed read.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub session: SessionSummary,
    pub blocks: Vec<BlockRecord>,
}

/// Outcome of a completed crack.
#[derive(Debug, Clone)]
pub struct CrackOutcome {
    pub session: SessionSummary,
    pub results: Vec<CrackResult>,
}

/// Single-card operations that can run on a spawned task.
#[derive(Debug, Clone)]
pub enum Operation {
    Read,
    Write {
        records: Vec<BlockRecord>,
        confirmed: bool,
    },
    Crack,
    Format,
}

/// The protocol engine.
///
/// Holds no per-operation state: every call starts from Idle with a fresh
/// state tracker. Only one operation may run against a given card at a time,
/// which `&mut` access to the card enforces.
pub struct CardEngine<R: SessionRecorder> {
    recorder: Arc<R>,
    io: BlockIo,
    config: EngineConfig,
}

impl<R: SessionRecorder> Clone for CardEngine<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: self.recorder.clone(),
            io: self.io.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R: SessionRecorder> std::fmt::Debug for CardEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardEngine")
            .field("keys", &self.io.authenticator().dictionary().len())
            .field("config", &self.config)
            .finish()
    }
}

impl<R: SessionRecorder + 'static> CardEngine<R> {
    pub fn new(recorder: Arc<R>, dictionary: KeyDictionary, config: EngineConfig) -> Self {
        let io = BlockIo::new(SectorAuthenticator::new(dictionary), config.verify_writes);
        Self {
            recorder,
            io,
            config,
        }
    }

    /// Built-in dictionary, default configuration.
    pub fn with_recorder(recorder: Arc<R>) -> Self {
        Self::new(recorder, KeyDictionary::builtin(), EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &KeyDictionary {
        self.io.authenticator().dictionary()
    }

    pub fn recorder(&self) -> &Arc<R> {
        &self.recorder
    }

    /// A progress channel sized from the configuration.
    pub fn channel(&self) -> (Emitter, ProgressStream) {
        stream::channel(self.config.channel_capacity)
    }

    // ────────────────────────────────────────────────────────────────
    // Read
    // ────────────────────────────────────────────────────────────────

    /// Read every sector, emitting the accumulated blocks after each one.
    ///
    /// A connection failure is reported on the stream and returned.
    pub async fn read<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        out: &Emitter,
    ) -> Result<ReadOutcome, EngineError> {
        let mut state = StateTracker::new(OperationKind::Read);
        state.advance(OperationState::Connecting);
        let mut card = match ConnectedCard::open(card, "read").await {
            Ok(card) => card,
            Err(e) => return Err(self.fail(&mut state, OperationKind::Read, e.into(), out).await),
        };

        let total = card.sector_count();
        let session = SessionSummary::start(
            OperationKind::Read,
            &card.uid(),
            total,
            card.block_count(),
            AttackMethod::Dictionary,
        );
        self.record("insert session", |r| r.insert_session(&session));
        info!(session = %session.id, uid = %session.card_uid, sectors = total, "read started");

        let mut blocks = Vec::new();
        let result: Result<(), EngineError> = async {
            for sector in 0..total {
                state.advance(OperationState::InProgress(sector));
                let read = self.io.read_sector(&mut *card, sector).await;
                let unlocked = read.search.is_found();
                blocks.extend(read.records);

                out.emit(CardEvent::Progress(ProgressEvent::Reading {
                    current: sector + 1,
                    total,
                    message: if unlocked {
                        format!("Read sector {}", sector)
                    } else {
                        format!("Sector {} is locked", sector)
                    },
                }))
                .await?;
                out.emit(CardEvent::Blocks(blocks.clone())).await?;
            }
            Ok(())
        }
        .await;
        self.settle(&mut state, result)?;
        drop(card);

        state.advance(OperationState::Finalizing);
        let cracked = cracked_sector_count(&blocks);
        let snapshot = to_json(&blocks);
        let session = session.finish(
            cracked,
            snapshot.clone(),
            cracked > 0,
            format!("{} of {} sectors readable", cracked, total),
        );
        self.commit(&session, snapshot);
        info!(session = %session.id, cracked, total, "read finished");

        out.emit(CardEvent::Completed(session.clone())).await?;
        state.advance(OperationState::Completed);
        Ok(ReadOutcome { session, blocks })
    }

    // ────────────────────────────────────────────────────────────────
    // Write
    // ────────────────────────────────────────────────────────────────

    /// Write a block dump back to a card.
    ///
    /// Without `confirmed` nothing touches the card: a single
    /// confirmation-required result is emitted and returned.
    pub async fn write<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        records: &[BlockRecord],
        confirmed: bool,
        out: &Emitter,
    ) -> Result<WriteResult, EngineError> {
        if !confirmed {
            let total = records.iter().filter(|r| r.is_writable()).count();
            info!(blocks = total, "write needs confirmation");
            let pending = WriteResult::confirmation_required(total);
            out.emit(CardEvent::Write(pending.clone())).await?;
            return Ok(pending);
        }

        let mut state = StateTracker::new(OperationKind::Write);
        state.advance(OperationState::Connecting);
        let mut card = match ConnectedCard::open(card, "write").await {
            Ok(card) => card,
            Err(e) => return Err(self.fail(&mut state, OperationKind::Write, e.into(), out).await),
        };

        let session = SessionSummary::start(
            OperationKind::Write,
            &card.uid(),
            card.sector_count(),
            card.block_count(),
            AttackMethod::Dictionary,
        );
        self.record("insert session", |r| r.insert_session(&session));
        info!(session = %session.id, "write started");

        state.advance(OperationState::InProgress(0));
        let result = self.io.write_blocks(&mut *card, records, out).await;
        let result = self.settle(&mut state, result)?;
        drop(card);

        state.advance(OperationState::Finalizing);
        let payload = to_json(&result);
        let session = session.finish(
            0,
            to_json(records),
            result.success,
            format!(
                "wrote {} of {} blocks, {} errors",
                result.written_blocks,
                result.total_blocks,
                result.errors.len()
            ),
        );
        self.commit(&session, payload);
        info!(
            session = %session.id,
            written = result.written_blocks,
            errors = result.errors.len(),
            "write finished"
        );

        out.emit(CardEvent::Completed(session)).await?;
        state.advance(OperationState::Completed);
        Ok(result)
    }

    // ────────────────────────────────────────────────────────────────
    // Crack
    // ────────────────────────────────────────────────────────────────

    /// Recover keys sector by sector with the configured attack method.
    ///
    /// Every found key is persisted as soon as it is found.
    pub async fn crack<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        out: &Emitter,
    ) -> Result<CrackOutcome, EngineError> {
        let method = self.config.attack_method;
        let mut state = StateTracker::new(OperationKind::Crack);
        if !method.is_implemented() {
            error!(%method, "attack method not implemented");
            out.emit(CardEvent::Failed {
                operation: OperationKind::Crack,
                message: EngineError::NotImplemented(method).to_string(),
            })
            .await?;
            return Err(EngineError::NotImplemented(method));
        }

        state.advance(OperationState::Connecting);
        let mut card = match ConnectedCard::open(card, "crack").await {
            Ok(card) => card,
            Err(e) => return Err(self.fail(&mut state, OperationKind::Crack, e.into(), out).await),
        };

        let total = card.sector_count();
        let session = SessionSummary::start(
            OperationKind::Crack,
            &card.uid(),
            total,
            card.block_count(),
            method,
        );
        self.record("insert session", |r| r.insert_session(&session));
        info!(session = %session.id, %method, sectors = total, "crack started");

        let mut results = Vec::with_capacity(total);
        let result: Result<(), EngineError> = async {
            for sector in 0..total {
                state.advance(OperationState::InProgress(sector));
                let started = Instant::now();
                let recovery = attack::recover_sector(
                    method,
                    self.io.authenticator(),
                    &mut *card,
                    sector,
                    self.config.exhaustive_slots,
                )
                .await?;

                if let Some(keys) = &recovery.keys {
                    self.record("insert found key", |r| {
                        r.insert_found_key(&session.id, sector, keys, method)
                    });
                }

                let cracked = CrackResult {
                    sector,
                    key_pair: recovery.keys,
                    method,
                    success: recovery.keys.is_some(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    attempts: recovery.attempts,
                };
                out.emit(CardEvent::Progress(ProgressEvent::Cracking {
                    current: sector + 1,
                    total,
                    message: describe_crack(&cracked),
                }))
                .await?;
                out.emit(CardEvent::Crack(cracked.clone())).await?;
                results.push(cracked);
            }
            Ok(())
        }
        .await;
        self.settle(&mut state, result)?;
        drop(card);

        state.advance(OperationState::Finalizing);
        let found: Vec<(usize, KeyPair)> = results
            .iter()
            .filter_map(|r| r.key_pair.map(|keys| (r.sector, keys)))
            .collect();
        let session = session.finish(
            found.len(),
            to_json(&results),
            !found.is_empty(),
            format!("found keys for {} of {} sectors", found.len(), total),
        );
        self.commit(&session, to_json(&found));
        info!(session = %session.id, found = found.len(), total, "crack finished");

        out.emit(CardEvent::Completed(session.clone())).await?;
        state.advance(OperationState::Completed);
        Ok(CrackOutcome { session, results })
    }

    // ────────────────────────────────────────────────────────────────
    // Clone
    // ────────────────────────────────────────────────────────────────

    /// Copy readable data blocks from `source` onto `target`, then try the UID.
    ///
    /// Progress runs 0-50% while reading, 50-95% while writing, and reaches
    /// 100% after the UID step, which never fails the clone.
    pub async fn clone_card<S, T>(
        &self,
        source: &mut S,
        target: &mut T,
        out: &Emitter,
    ) -> Result<CloneResult, EngineError>
    where
        S: CardHandle + ?Sized,
        T: CardHandle + ?Sized,
    {
        let mut state = StateTracker::new(OperationKind::Clone);
        state.advance(OperationState::Connecting);
        let opened = match ConnectedCard::open(source, "clone source").await {
            Ok(src) => match ConnectedCard::open(target, "clone target").await {
                Ok(dst) => Ok((src, dst)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        let (mut source, mut target) = match opened {
            Ok(pair) => pair,
            Err(e) => return self.fail_clone(&mut state, e.into(), out).await,
        };

        let total_sectors = source.sector_count();
        let session = SessionSummary::start(
            OperationKind::Clone,
            &source.uid(),
            total_sectors,
            source.block_count(),
            AttackMethod::Dictionary,
        );
        self.record("insert session", |r| r.insert_session(&session));
        info!(session = %session.id, uid = %session.card_uid, "clone started");

        let mut progress = CloneResult {
            step: CloneStep::ReadingSource,
            progress: 0.0,
            read_blocks: 0,
            written_blocks: 0,
            total_writable: 0,
            write_errors: Vec::new(),
            uid_cloned: None,
            message: String::new(),
            error: None,
        };
        let mut blocks: Vec<BlockRecord> = Vec::new();

        let result: Result<(), EngineError> = async {
            // Phase 1: read the source.
            for sector in 0..total_sectors {
                state.advance(OperationState::InProgress(sector));
                let read = self.io.read_sector(&mut *source, sector).await;
                blocks.extend(read.records);

                progress.read_blocks = blocks.iter().filter(|b| b.cracked).count();
                progress.progress = scale(sector + 1, total_sectors, 0.0, 50.0);
                progress.message = format!("Read source sector {}/{}", sector + 1, total_sectors);
                self.emit_clone(out, &progress, sector + 1, total_sectors).await?;
            }

            // Phase 2: write data blocks to the target.
            let writable: Vec<&BlockRecord> = blocks.iter().filter(|b| b.is_writable()).collect();
            let total = writable.len();
            progress.step = CloneStep::WritingTarget;
            progress.total_writable = total;
            let mut target_keys = HashMap::new();

            for (index, record) in writable.into_iter().enumerate() {
                state.advance(OperationState::InProgress(record.block()));
                match self.io.write_single(&mut *target, record, &mut target_keys).await {
                    Ok(()) => progress.written_blocks += 1,
                    Err(e) => {
                        warn!(block = record.block(), "clone write failed: {}", e);
                        progress.write_errors.push(format!("block {}: {}", record.block(), e));
                    }
                }
                progress.progress = 50.0 + scale(index + 1, total, 0.0, 45.0);
                progress.message = format!("Wrote block {} ({}/{})", record.block(), index + 1, total);
                self.emit_clone(out, &progress, index + 1, total).await?;
            }
            if total == 0 {
                progress.progress = 95.0;
                progress.message = "No writable blocks on source".to_string();
                self.emit_clone(out, &progress, 0, 0).await?;
            }

            // Phase 3: best-effort UID.
            progress.step = CloneStep::CloningUid;
            let uid = source.uid();
            let (cloned, message) = match target.write_uid(&uid).await {
                Ok(()) => (true, "UID cloned".to_string()),
                Err(HwError::Unsupported(_)) => {
                    (false, "UID clone not supported by target card".to_string())
                }
                Err(e) => (false, format!("UID clone failed: {}", e)),
            };
            info!(cloned, "{}", message);
            progress.uid_cloned = Some(cloned);
            progress.progress = 100.0;
            progress.message = message;
            self.emit_clone(out, &progress, 1, 1).await?;
            Ok(())
        }
        .await;
        self.settle(&mut state, result)?;
        drop(target);
        drop(source);

        state.advance(OperationState::Finalizing);
        let success =
            progress.write_errors.is_empty() && progress.written_blocks == progress.total_writable;
        let session = session.finish(
            cracked_sector_count(&blocks),
            to_json(&blocks),
            success,
            format!(
                "wrote {} of {} blocks; {}",
                progress.written_blocks, progress.total_writable, progress.message
            ),
        );
        self.commit(&session, to_json(&progress));

        progress.step = CloneStep::Completed;
        progress.message = "Clone complete".to_string();
        self.emit_clone(out, &progress, 1, 1).await?;
        out.emit(CardEvent::Completed(session)).await?;
        state.advance(OperationState::Completed);
        Ok(progress)
    }

    async fn emit_clone(
        &self,
        out: &Emitter,
        progress: &CloneResult,
        current: usize,
        total: usize,
    ) -> Result<(), EngineError> {
        out.emit(CardEvent::Progress(ProgressEvent::Cloning {
            step: progress.step,
            current,
            total,
            message: progress.message.clone(),
        }))
        .await?;
        out.emit(CardEvent::Clone(progress.clone())).await
    }

    async fn fail_clone(
        &self,
        state: &mut StateTracker,
        err: EngineError,
        out: &Emitter,
    ) -> Result<CloneResult, EngineError> {
        let message = err.to_string();
        let failed = CloneResult {
            step: CloneStep::Error,
            progress: 0.0,
            read_blocks: 0,
            written_blocks: 0,
            total_writable: 0,
            write_errors: Vec::new(),
            uid_cloned: None,
            message: message.clone(),
            error: Some(message),
        };
        out.emit(CardEvent::Clone(failed.clone())).await?;
        self.fail(state, OperationKind::Clone, err, out).await;
        Ok(failed)
    }

    // ────────────────────────────────────────────────────────────────
    // Format
    // ────────────────────────────────────────────────────────────────

    /// Zero every data block the dictionary can unlock. Trailers are never
    /// touched.
    pub async fn format<C: CardHandle + ?Sized>(
        &self,
        card: &mut C,
        out: &Emitter,
    ) -> Result<FormatResult, EngineError> {
        let mut state = StateTracker::new(OperationKind::Format);
        state.advance(OperationState::Connecting);
        let mut card = match ConnectedCard::open(card, "format").await {
            Ok(card) => card,
            Err(e) => {
                let failed = FormatResult::failed(EngineError::from(e.clone()).to_string());
                out.emit(CardEvent::Format(failed.clone())).await?;
                self.fail(&mut state, OperationKind::Format, e.into(), out).await;
                return Ok(failed);
            }
        };

        let total = card.block_count();
        let session = SessionSummary::start(
            OperationKind::Format,
            &card.uid(),
            card.sector_count(),
            total,
            AttackMethod::Dictionary,
        );
        self.record("insert session", |r| r.insert_session(&session));
        info!(session = %session.id, blocks = total, "format started");

        let zero = [0u8; BLOCK_SIZE];
        let mut formatted = 0;
        let mut touched = BTreeSet::new();
        let result: Result<(), EngineError> = async {
            for block in 0..total {
                state.advance(OperationState::InProgress(block));
                let address = BlockAddress::from_block(block);

                if !address.is_trailer() {
                    let search = self
                        .io
                        .authenticator()
                        .authenticate(&mut *card, address.sector)
                        .await;
                    if search.is_found() {
                        match card.write_block(block, &zero).await {
                            Ok(()) => {
                                formatted += 1;
                                touched.insert(address.sector);
                            }
                            Err(e) => warn!(block, "format write failed: {}", e),
                        }
                    }
                }

                let tick = FormatResult {
                    current_block: block,
                    total_blocks: total,
                    formatted_blocks: formatted,
                    progress: scale(block + 1, total, 0.0, 100.0),
                    completed: false,
                    success: true,
                    error: None,
                };
                out.emit(CardEvent::Progress(ProgressEvent::Formatting {
                    current: block + 1,
                    total,
                    message: format!("Block {}/{}", block + 1, total),
                }))
                .await?;
                out.emit(CardEvent::Format(tick)).await?;
            }
            Ok(())
        }
        .await;
        self.settle(&mut state, result)?;
        drop(card);

        state.advance(OperationState::Finalizing);
        let done = FormatResult {
            current_block: total.saturating_sub(1),
            total_blocks: total,
            formatted_blocks: formatted,
            progress: 100.0,
            completed: true,
            success: true,
            error: None,
        };
        let session = session.finish(
            touched.len(),
            String::new(),
            true,
            format!("formatted {} of {} blocks", formatted, total),
        );
        self.commit(&session, to_json(&done));
        info!(session = %session.id, formatted, total, "format finished");

        out.emit(CardEvent::Format(done.clone())).await?;
        out.emit(CardEvent::Completed(session)).await?;
        state.advance(OperationState::Completed);
        Ok(done)
    }

    // ────────────────────────────────────────────────────────────────
    // Spawning
    // ────────────────────────────────────────────────────────────────

    /// Run a single-card operation on its own task.
    ///
    /// The card comes back through the join handle. Aborting the task
    /// releases the card connection.
    pub fn spawn<C>(
        &self,
        mut card: C,
        operation: Operation,
    ) -> (ProgressStream, JoinHandle<(C, Result<(), EngineError>)>)
    where
        C: CardHandle + 'static,
    {
        let (out, stream) = self.channel();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let result = match operation {
                Operation::Read => engine.read(&mut card, &out).await.map(|_| ()),
                Operation::Write { records, confirmed } => engine
                    .write(&mut card, &records, confirmed, &out)
                    .await
                    .map(|_| ()),
                Operation::Crack => engine.crack(&mut card, &out).await.map(|_| ()),
                Operation::Format => engine.format(&mut card, &out).await.map(|_| ()),
            };
            (card, result)
        });
        (stream, handle)
    }

    /// Run a clone on its own task; both cards come back through the handle.
    pub fn spawn_clone<S, T>(
        &self,
        mut source: S,
        mut target: T,
    ) -> (ProgressStream, JoinHandle<(S, T, Result<CloneResult, EngineError>)>)
    where
        S: CardHandle + 'static,
        T: CardHandle + 'static,
    {
        let (out, stream) = self.channel();
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let result = engine.clone_card(&mut source, &mut target, &out).await;
            (source, target, result)
        });
        (stream, handle)
    }

    // ────────────────────────────────────────────────────────────────
    // Helpers
    // ────────────────────────────────────────────────────────────────

    /// Fire-and-forget recorder call.
    fn record<F: FnOnce(&R) -> anyhow::Result<()>>(&self, what: &str, call: F) {
        if let Err(e) = call(&self.recorder) {
            warn!("session recorder failed to {}: {:#}", what, e);
        }
    }

    /// End-of-operation commit: session update, then history.
    fn commit(&self, session: &SessionSummary, payload: String) {
        self.record("update session", |r| r.update_session(session));
        let history = HistoryRecord::from_session(session, payload);
        self.record("insert history", |r| r.insert_history(&history));
    }

    /// Report a connection-level failure as the terminal event.
    async fn fail(
        &self,
        state: &mut StateTracker,
        operation: OperationKind,
        err: EngineError,
        out: &Emitter,
    ) -> EngineError {
        state.advance(OperationState::Failed);
        error!(%operation, "operation failed: {}", err);
        let _ = out
            .emit(CardEvent::Failed {
                operation,
                message: err.to_string(),
            })
            .await;
        err
    }

    /// Track cancellation of the per-unit loop.
    fn settle<T>(
        &self,
        state: &mut StateTracker,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match &result {
            Err(EngineError::Cancelled) => {
                state.advance(OperationState::Cancelled);
                info!("operation cancelled by observer");
            }
            Err(e) => {
                state.advance(OperationState::Failed);
                error!("operation aborted: {}", e);
            }
            Ok(_) => {}
        }
        result
    }
}

/// `done/total` mapped onto `[from, to]`; `to` when there is nothing to do.
fn scale(done: usize, total: usize, from: f32, to: f32) -> f32 {
    if total == 0 {
        return to;
    }
    from + (to - from) * done as f32 / total as f32
}

fn describe_crack(result: &CrackResult) -> String {
    match &result.key_pair {
        Some(keys) => {
            let slots: Vec<&str> = [keys.key_a.map(|_| "A"), keys.key_b.map(|_| "B")]
                .into_iter()
                .flatten()
                .collect();
            format!("Sector {}: key {} found", result.sector, slots.join("+"))
        }
        None => format!("Sector {}: no key found", result.sector),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!("failed to serialize snapshot: {}", e);
        String::new()
    })
}
