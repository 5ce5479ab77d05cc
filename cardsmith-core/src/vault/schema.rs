/// cardsmith-core/src/vault/schema.rs
/// The initial schema for the Cardsmith Vault.
pub const MIGRATION_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    card_uid TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    sector_count INTEGER NOT NULL,
    block_count INTEGER NOT NULL,
    cracked_sectors INTEGER NOT NULL DEFAULT 0,
    snapshot TEXT NOT NULL DEFAULT '',
    attack_method TEXT NOT NULL,
    success INTEGER NOT NULL DEFAULT 0,
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS found_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    sector INTEGER NOT NULL,
    key_a TEXT,
    key_b TEXT,
    method TEXT NOT NULL,
    found_at INTEGER NOT NULL,
    FOREIGN KEY(session_id) REFERENCES sessions(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_found_keys_session ON found_keys(session_id);
"#;

/// V2 migration: operation history and settings.
pub const MIGRATION_V2: &str = r#"
-- Append-only operation history; only removed by explicit purge
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    card_uid TEXT NOT NULL,
    total_sectors INTEGER NOT NULL,
    cracked_sectors INTEGER NOT NULL,
    success_rate REAL NOT NULL,
    duration_ms INTEGER NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Simple key-value config (settings that persist across runs)
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);
CREATE INDEX IF NOT EXISTS idx_history_uid ON history(card_uid);
"#;
