// cardsmith-core/src/vault/mod.rs

use cardsmith_io::MifareKey;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::attack::AttackMethod;
use crate::model::{HistoryRecord, KeyPair, OperationKind, SessionSummary, now_millis};
use crate::recorder::SessionRecorder;

pub mod schema;

// ════════════════════════════════════════════════════════════════════
// Data types
// ════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct FoundKeyRecord {
    pub id: i64,
    pub session_id: String,
    pub sector: usize,
    pub keys: KeyPair,
    pub method: String,
    pub found_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VaultStats {
    pub total_sessions: i64,
    pub finished_sessions: i64,
    pub total_found_keys: i64,
    pub history_entries: i64,
    pub unique_cards: i64,
    pub db_size_bytes: i64,
}

// ════════════════════════════════════════════════════════════════════
// Vault
// ════════════════════════════════════════════════════════════════════

/// SQLite-backed session store. Cheap to clone; clones share one connection.
#[derive(Debug, Clone)]
pub struct Vault {
    conn: Arc<Mutex<Connection>>,
}

impl Vault {
    /// Open the Vault at the specified path.
    /// Creates the database file and runs all migrations if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(&path)?;

        // WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::migrate(conn)
    }

    /// Throwaway vault, used by tests and the probe binary.
    pub fn open_in_memory() -> Result<Self> {
        Self::migrate(Connection::open_in_memory()?)
    }

    fn migrate(conn: Connection) -> Result<Self> {
        // Run migrations in order
        conn.execute_batch(schema::MIGRATION_INIT)?;
        conn.execute_batch(schema::MIGRATION_V2)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ────────────────────────────────────────────────────────────────
    // Sessions
    // ────────────────────────────────────────────────────────────────

    pub fn save_session(&self, s: &SessionSummary) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (id, operation, card_uid, started_at, ended_at, sector_count,
                                   block_count, cracked_sectors, snapshot, attack_method, success, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                s.id,
                s.operation.as_str(),
                s.card_uid,
                s.started_at,
                s.ended_at,
                s.sector_count as i64,
                s.block_count as i64,
                s.cracked_sectors as i64,
                s.snapshot,
                s.attack_method,
                s.success,
                s.notes
            ],
        )?;
        Ok(())
    }

    /// Returns false when no session has that id.
    pub fn finish_session(&self, s: &SessionSummary) -> Result<bool> {
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE sessions
             SET ended_at = ?1, cracked_sectors = ?2, snapshot = ?3, success = ?4, notes = ?5
             WHERE id = ?6",
            params![
                s.ended_at,
                s.cracked_sectors as i64,
                s.snapshot,
                s.success,
                s.notes,
                s.id
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn session(&self, id: &str) -> Result<Option<SessionSummary>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, operation, card_uid, started_at, ended_at, sector_count, block_count,
                    cracked_sectors, snapshot, attack_method, success, notes
             FROM sessions WHERE id = ?1",
            params![id],
            session_from_row,
        )
        .optional()
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, operation, card_uid, started_at, ended_at, sector_count, block_count,
                    cracked_sectors, snapshot, attack_method, success, notes
             FROM sessions
             ORDER BY started_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], session_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // ────────────────────────────────────────────────────────────────
    // Found keys
    // ────────────────────────────────────────────────────────────────

    pub fn save_found_key(
        &self,
        session_id: &str,
        sector: usize,
        keys: &KeyPair,
        method: AttackMethod,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO found_keys (session_id, sector, key_a, key_b, method, found_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                sector as i64,
                keys.key_a.map(|k| k.to_hex()),
                keys.key_b.map(|k| k.to_hex()),
                method.label(),
                now_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Keys found during one session, in sector order.
    pub fn found_keys(&self, session_id: &str) -> Result<Vec<FoundKeyRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sector, key_a, key_b, method, found_at
             FROM found_keys
             WHERE session_id = ?1
             ORDER BY sector ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(FoundKeyRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                sector: row.get::<_, i64>(2)? as usize,
                keys: KeyPair {
                    key_a: key_column(row, 3)?,
                    key_b: key_column(row, 4)?,
                },
                method: row.get(5)?,
                found_at: row.get(6)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // ────────────────────────────────────────────────────────────────
    // History
    // ────────────────────────────────────────────────────────────────

    pub fn save_history(&self, h: &HistoryRecord) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO history (session_id, operation, card_uid, total_sectors, cracked_sectors,
                                  success_rate, duration_ms, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                h.session_id,
                h.operation.as_str(),
                h.card_uid,
                h.total_sectors as i64,
                h.cracked_sectors as i64,
                h.success_rate,
                h.duration_ms,
                h.payload,
                h.created_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent entries first.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, operation, card_uid, total_sectors, cracked_sectors,
                    success_rate, duration_ms, payload, created_at
             FROM history
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(HistoryRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                operation: operation_column(row, 2)?,
                card_uid: row.get(3)?,
                total_sectors: row.get::<_, i64>(4)? as usize,
                cracked_sectors: row.get::<_, i64>(5)? as usize,
                success_rate: row.get(6)?,
                duration_ms: row.get(7)?,
                payload: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Explicit user purge. Returns the number of removed entries.
    pub fn purge_history(&self) -> Result<usize> {
        let conn = self.conn();
        conn.execute("DELETE FROM history", [])
    }

    // ────────────────────────────────────────────────────────────────
    // Statistics
    // ────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<VaultStats> {
        let conn = self.conn();

        let total_sessions: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;

        let finished_sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE ended_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let total_found_keys: i64 =
            conn.query_row("SELECT COUNT(*) FROM found_keys", [], |row| row.get(0))?;

        let history_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;

        let unique_cards: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT card_uid) FROM sessions",
            [],
            |row| row.get(0),
        )?;

        // page_count * page_size gives approximate DB size
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(VaultStats {
            total_sessions,
            finished_sessions,
            total_found_keys,
            history_entries,
            unique_cards,
            db_size_bytes: page_count * page_size,
        })
    }

    // ────────────────────────────────────────────────────────────────
    // Config (key-value settings)
    // ────────────────────────────────────────────────────────────────

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
    }
}

impl SessionRecorder for Vault {
    fn insert_session(&self, session: &SessionSummary) -> anyhow::Result<()> {
        self.save_session(session)?;
        Ok(())
    }

    fn update_session(&self, session: &SessionSummary) -> anyhow::Result<()> {
        if !self.finish_session(session)? {
            anyhow::bail!("session {} does not exist", session.id);
        }
        Ok(())
    }

    fn insert_found_key(
        &self,
        session_id: &str,
        sector: usize,
        keys: &KeyPair,
        method: AttackMethod,
    ) -> anyhow::Result<()> {
        self.save_found_key(session_id, sector, keys, method)?;
        Ok(())
    }

    fn insert_history(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        self.save_history(record)?;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════
// Row mapping
// ════════════════════════════════════════════════════════════════════

fn session_from_row(row: &Row<'_>) -> Result<SessionSummary> {
    Ok(SessionSummary {
        id: row.get(0)?,
        operation: operation_column(row, 1)?,
        card_uid: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        sector_count: row.get::<_, i64>(5)? as usize,
        block_count: row.get::<_, i64>(6)? as usize,
        cracked_sectors: row.get::<_, i64>(7)? as usize,
        snapshot: row.get(8)?,
        attack_method: row.get(9)?,
        success: row.get(10)?,
        notes: row.get(11)?,
    })
}

fn operation_column(row: &Row<'_>, idx: usize) -> Result<OperationKind> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn key_column(row: &Row<'_>, idx: usize) -> Result<Option<MifareKey>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse::<MifareKey>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
    })
    .transpose()
}
