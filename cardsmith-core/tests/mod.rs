use cardsmith_core::config::{EngineConfig, default_db_path};
use cardsmith_core::model::{cracked_sector_count, success_rate};
use cardsmith_core::state_machine::{OperationState, StateTracker};
use cardsmith_core::stream;
use cardsmith_core::{
    AttackMethod, BlockRecord, CardEvent, EngineError, HistoryRecord, KeyDictionary, KeyPair,
    OperationKind, SectorKey, SessionRecorder, SessionSummary, Vault, WriteResult,
};
use cardsmith_io::{BlockAddress, DEFAULT_KEY, HwError, KeySlot, MifareKey};
use std::io::Write;

const KEY_X: MifareKey = MifareKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
const KEY_Z: MifareKey = MifareKey::new([0x13, 0x37, 0xC0, 0xFF, 0xEE, 0x42]);

fn data_record(block: usize, fill: u8) -> BlockRecord {
    BlockRecord::read(
        BlockAddress::from_block(block),
        false,
        &[fill; 16],
        SectorKey::new(DEFAULT_KEY, KeySlot::A),
    )
}

fn session(op: OperationKind) -> SessionSummary {
    SessionSummary::start(op, &[0xDE, 0xAD, 0xBE, 0xEF], 16, 64, AttackMethod::Dictionary)
}

// ============================================================================
// Key Dictionary Tests
// ============================================================================

#[test]
fn test_builtin_dictionary_starts_with_factory_default() {
    let dict = KeyDictionary::builtin();
    assert_eq!(dict.keys()[0], DEFAULT_KEY);
    assert!(dict.contains(&KEY_X));
    assert!(!dict.contains(&KEY_Z));
    assert!(dict.len() > 40);
}

#[test]
fn test_builtin_dictionary_has_no_duplicates() {
    let dict = KeyDictionary::builtin();
    let mut keys = dict.keys().to_vec();
    keys.sort_by_key(|k| *k.as_bytes());
    keys.dedup();
    assert_eq!(keys.len(), dict.len());
}

#[test]
fn test_from_keys_keeps_first_occurrence() {
    let dict = KeyDictionary::from_keys([KEY_X, DEFAULT_KEY, KEY_X]);
    assert_eq!(dict.keys(), &[KEY_X, DEFAULT_KEY]);
    assert_eq!(dict.position(&DEFAULT_KEY), Some(1));
}

#[test]
fn test_parse_skips_comments_and_blank_lines() {
    let text = "# site keys\n\n  1337C0FFEE42\nffffffffffff  # factory\n";
    let dict = KeyDictionary::parse(text).unwrap();
    assert_eq!(dict.keys(), &[KEY_Z, DEFAULT_KEY]);
}

#[test]
fn test_parse_reports_line_number() {
    let err = KeyDictionary::parse("FFFFFFFFFFFF\nnot-a-key\n").unwrap_err();
    assert!(err.to_string().contains("line 2"), "got: {}", err);
}

#[test]
fn test_parse_rejects_short_key() {
    assert!(KeyDictionary::parse("FFFF\n").is_err());
}

#[test]
fn test_with_extra_puts_user_keys_first() {
    let extra = KeyDictionary::from_keys([KEY_Z, DEFAULT_KEY]);
    let merged = KeyDictionary::builtin().with_extra(&extra);
    assert_eq!(merged.keys()[0], KEY_Z);
    assert_eq!(merged.keys()[1], DEFAULT_KEY);
    assert_eq!(merged.len(), KeyDictionary::builtin().len() + 1);
}

#[test]
fn test_load_key_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "1337C0FFEE42").unwrap();
    let dict = KeyDictionary::load(file.path()).unwrap();
    assert_eq!(dict.keys(), &[KEY_Z]);
}

#[test]
fn test_load_missing_file_fails() {
    assert!(KeyDictionary::load("/definitely/not/here.keys").is_err());
}

// ============================================================================
// Model Tests
// ============================================================================

#[test]
fn test_key_pair_prefers_a() {
    let mut pair = KeyPair::from_sector_key(SectorKey::new(KEY_X, KeySlot::B));
    assert_eq!(pair.best(), Some(SectorKey::new(KEY_X, KeySlot::B)));
    pair.set(KeySlot::A, DEFAULT_KEY);
    assert_eq!(pair.best(), Some(SectorKey::new(DEFAULT_KEY, KeySlot::A)));
    assert_eq!(pair.get(KeySlot::B), Some(KEY_X));
    assert!(!pair.is_empty());
    assert!(KeyPair::default().is_empty());
}

#[test]
fn test_failed_record_keeps_key() {
    let used = SectorKey::new(KEY_X, KeySlot::A);
    let record = BlockRecord::failed(BlockAddress::from_block(5), false, Some(used), "timeout");
    assert!(!record.cracked);
    assert!(record.is_empty());
    assert_eq!(record.sector_key(), Some(used));
    assert_eq!(record.error.as_deref(), Some("timeout"));
    assert!(!record.is_writable());
}

#[test]
fn test_trailer_is_never_writable() {
    let mut record = data_record(3, 0xFF);
    assert!(record.is_writable());
    record.is_trailer = true;
    assert!(!record.is_writable());
}

#[test]
fn test_block_record_serializes_data_as_hex() {
    let record = data_record(4, 0xAB);
    let json = serde_json::to_string(&record).unwrap();
    assert!(json.contains(&"ab".repeat(16)));
    let back: BlockRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_cracked_sector_count_counts_distinct_sectors() {
    let blocks = vec![
        data_record(4, 0),
        data_record(5, 0),
        data_record(8, 0),
        BlockRecord::failed(BlockAddress::from_block(12), false, None, "locked"),
    ];
    assert_eq!(cracked_sector_count(&blocks), 2);
    assert_eq!(cracked_sector_count(&[]), 0);
}

#[test]
fn test_success_rate() {
    assert_eq!(success_rate(0, 0), 0.0);
    assert_eq!(success_rate(4, 16), 25.0);
    assert_eq!(success_rate(16, 16), 100.0);
}

#[test]
fn test_operation_kind_round_trip() {
    for op in [
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::Crack,
        OperationKind::Clone,
        OperationKind::Format,
    ] {
        assert_eq!(op.as_str().parse::<OperationKind>().unwrap(), op);
    }
    assert!("erase".parse::<OperationKind>().is_err());
}

#[test]
fn test_session_start_and_finish() {
    let s = session(OperationKind::Read);
    assert_eq!(s.card_uid, "DEADBEEF");
    assert!(!s.is_finished());
    assert_eq!(s.duration_ms(), 0);
    assert_eq!(s.attack_method, "dictionary");

    let done = s.clone().finish(12, "[]".into(), true, "ok");
    assert!(done.is_finished());
    assert!(done.ended_at.unwrap() >= done.started_at);
    assert_eq!(done.id, s.id);
    assert_eq!(done.cracked_sectors, 12);
}

#[test]
fn test_history_from_session() {
    let s = session(OperationKind::Crack).finish(4, String::new(), true, "");
    let h = HistoryRecord::from_session(&s, "{}".into());
    assert_eq!(h.session_id, s.id);
    assert_eq!(h.total_sectors, 16);
    assert_eq!(h.success_rate, 25.0);
    assert!(h.id.is_none());
}

// ============================================================================
// Attack Method Tests
// ============================================================================

#[test]
fn test_attack_method_parse() {
    assert_eq!("Dictionary".parse::<AttackMethod>().unwrap(), AttackMethod::Dictionary);
    assert_eq!(" hardnested ".parse::<AttackMethod>().unwrap(), AttackMethod::Hardnested);
    assert!("bruteforce".parse::<AttackMethod>().is_err());
    assert_eq!(AttackMethod::default(), AttackMethod::Dictionary);
}

#[test]
fn test_only_dictionary_is_implemented() {
    assert!(AttackMethod::Dictionary.is_implemented());
    assert!(!AttackMethod::Hardnested.is_implemented());
    assert!(!AttackMethod::Nonce.is_implemented());
    assert!(!AttackMethod::Mkf32.is_implemented());
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn test_hw_error_converts_into_engine_error() {
    let err: EngineError = HwError::TagLost.into();
    assert_eq!(err, EngineError::Hardware(HwError::TagLost));
    assert!(err.to_string().starts_with("hardware error"));
}

#[test]
fn test_not_implemented_names_method() {
    let err = EngineError::NotImplemented(AttackMethod::Nonce);
    assert!(err.to_string().contains("nonce"));
}

// ============================================================================
// State Machine Tests
// ============================================================================

#[test]
fn test_state_tracker_happy_path() {
    let mut t = StateTracker::new(OperationKind::Read);
    assert_eq!(t.state(), OperationState::Idle);
    assert!(t.advance(OperationState::Connecting));
    assert!(t.advance(OperationState::InProgress(0)));
    assert!(t.advance(OperationState::InProgress(1)));
    assert!(t.advance(OperationState::Finalizing));
    assert!(t.advance(OperationState::Completed));
    assert!(t.state().is_terminal());
}

#[test]
fn test_state_tracker_ignores_illegal_moves() {
    let mut t = StateTracker::new(OperationKind::Format);
    assert!(!t.advance(OperationState::Completed));
    assert_eq!(t.state(), OperationState::Idle);

    t.advance(OperationState::Connecting);
    t.advance(OperationState::Failed);
    assert!(!t.advance(OperationState::InProgress(0)));
    assert_eq!(t.state(), OperationState::Failed);
}

#[test]
fn test_cancel_only_before_finalizing() {
    let mut t = StateTracker::new(OperationKind::Clone);
    t.advance(OperationState::Connecting);
    t.advance(OperationState::InProgress(3));
    t.advance(OperationState::Finalizing);
    assert!(!t.advance(OperationState::Cancelled));
}

#[test]
fn test_state_display() {
    assert_eq!(OperationState::InProgress(7).to_string(), "in-progress(7)");
    assert_eq!(OperationState::Idle.to_string(), "idle");
}

// ============================================================================
// Progress Stream Tests
// ============================================================================

#[tokio::test]
async fn test_stream_stops_after_terminal_event() {
    let (out, mut rx) = stream::channel(8);
    out.emit(CardEvent::Write(WriteResult::confirmation_required(3)))
        .await
        .unwrap();
    out.emit(CardEvent::Blocks(Vec::new())).await.unwrap();

    assert!(matches!(rx.next().await, Some(CardEvent::Write(_))));
    assert!(rx.next().await.is_none());
}

#[tokio::test]
async fn test_stream_ends_when_producer_goes_away() {
    let (out, rx) = stream::channel(8);
    out.emit(CardEvent::Blocks(Vec::new())).await.unwrap();
    drop(out);
    assert_eq!(rx.collect().await.len(), 1);
}

#[tokio::test]
async fn test_cancel_makes_emit_fail() {
    let (out, rx) = stream::channel(0);
    assert!(!out.is_cancelled());
    rx.cancel();
    assert!(out.is_cancelled());
    let err = out.emit(CardEvent::Blocks(Vec::new())).await.unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
}

// ============================================================================
// Vault Tests
// ============================================================================

#[test]
fn test_vault_session_round_trip() {
    let vault = Vault::open_in_memory().unwrap();
    let s = session(OperationKind::Read);
    vault.save_session(&s).unwrap();

    let loaded = vault.session(&s.id).unwrap().unwrap();
    assert_eq!(loaded, s);

    let done = s.finish(3, "[]".into(), true, "3 of 16");
    assert!(vault.finish_session(&done).unwrap());
    let loaded = vault.session(&done.id).unwrap().unwrap();
    assert_eq!(loaded, done);
}

#[test]
fn test_vault_update_unknown_session_is_error() {
    let vault = Vault::open_in_memory().unwrap();
    let s = session(OperationKind::Write);
    assert!(!vault.finish_session(&s).unwrap());
    assert!(vault.update_session(&s).is_err());
    assert!(vault.session("missing").unwrap().is_none());
}

#[test]
fn test_vault_found_keys_in_sector_order() {
    let vault = Vault::open_in_memory().unwrap();
    let s = session(OperationKind::Crack);
    vault.save_session(&s).unwrap();

    let both = KeyPair {
        key_a: Some(KEY_X),
        key_b: Some(DEFAULT_KEY),
    };
    let only_b = KeyPair {
        key_a: None,
        key_b: Some(KEY_Z),
    };
    vault.save_found_key(&s.id, 5, &only_b, AttackMethod::Dictionary).unwrap();
    vault.save_found_key(&s.id, 1, &both, AttackMethod::Dictionary).unwrap();

    let found = vault.found_keys(&s.id).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].sector, 1);
    assert_eq!(found[0].keys, both);
    assert_eq!(found[1].keys, only_b);
    assert_eq!(found[1].method, "dictionary");
    assert!(vault.found_keys("other").unwrap().is_empty());
}

#[test]
fn test_vault_history_and_purge() {
    let vault = Vault::open_in_memory().unwrap();
    for op in [OperationKind::Read, OperationKind::Format] {
        let s = session(op).finish(8, String::new(), true, "");
        vault.save_session(&s).unwrap();
        vault
            .save_history(&HistoryRecord::from_session(&s, "{}".into()))
            .unwrap();
    }

    let history = vault.recent_history(10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.id.is_some() && h.success_rate == 50.0));
    assert_eq!(vault.recent_history(1).unwrap().len(), 1);

    assert_eq!(vault.purge_history().unwrap(), 2);
    assert!(vault.recent_history(10).unwrap().is_empty());
    // Sessions outlive history.
    assert_eq!(vault.recent_sessions(10).unwrap().len(), 2);
}

#[test]
fn test_vault_stats() {
    let vault = Vault::open_in_memory().unwrap();
    let open = session(OperationKind::Read);
    let closed = SessionSummary::start(
        OperationKind::Crack,
        &[0x01, 0x02, 0x03, 0x04],
        16,
        64,
        AttackMethod::Dictionary,
    )
    .finish(1, String::new(), true, "");
    vault.save_session(&open).unwrap();
    vault.save_session(&closed).unwrap();
    vault
        .save_found_key(&closed.id, 0, &KeyPair::default(), AttackMethod::Dictionary)
        .unwrap();

    let stats = vault.stats().unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.finished_sessions, 1);
    assert_eq!(stats.total_found_keys, 1);
    assert_eq!(stats.history_entries, 0);
    assert_eq!(stats.unique_cards, 2);
    assert!(stats.db_size_bytes > 0);
}

#[test]
fn test_vault_config_overwrites() {
    let vault = Vault::open_in_memory().unwrap();
    assert!(vault.get_config("verify_writes").unwrap().is_none());
    vault.set_config("verify_writes", "true").unwrap();
    vault.set_config("verify_writes", "false").unwrap();
    assert_eq!(vault.get_config("verify_writes").unwrap().as_deref(), Some("false"));
}

#[test]
fn test_vault_file_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cardsmith.db");
    let s = session(OperationKind::Clone);
    {
        let vault = Vault::open(&path).unwrap();
        vault.save_session(&s).unwrap();
    }
    let vault = Vault::open(&path).unwrap();
    assert_eq!(vault.session(&s.id).unwrap().unwrap().operation, OperationKind::Clone);
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = EngineConfig::default();
    assert!(config.verify_writes);
    assert!(!config.exhaustive_slots);
    assert_eq!(config.attack_method, AttackMethod::Dictionary);
    assert_eq!(config.channel_capacity, stream::DEFAULT_CAPACITY);
    assert!(config.dictionary_path.is_none());
}

#[test]
fn test_config_vault_overrides() {
    let vault = Vault::open_in_memory().unwrap();
    vault.set_config("channel_capacity", "8").unwrap();
    vault.set_config("verify_writes", "off").unwrap();
    vault.set_config("exhaustive_slots", "YES").unwrap();
    vault.set_config("attack_method", "nonce").unwrap();

    let mut config = EngineConfig::default();
    config.apply_vault(&vault).unwrap();
    assert_eq!(config.channel_capacity, 8);
    assert!(!config.verify_writes);
    assert!(config.exhaustive_slots);
    assert_eq!(config.attack_method, AttackMethod::Nonce);
}

#[test]
fn test_config_ignores_invalid_values() {
    let vault = Vault::open_in_memory().unwrap();
    vault.set_config("channel_capacity", "lots").unwrap();
    vault.set_config("attack_method", "rainbow").unwrap();
    vault.set_config("verify_writes", "ture").unwrap();
    vault.set_config("exhaustive_slots", "maybe").unwrap();

    let mut config = EngineConfig::default();
    config.apply_vault(&vault).unwrap();
    assert_eq!(config, EngineConfig::default());
    assert!(config.verify_writes);
}

#[test]
fn test_config_flags_accept_both_spellings() {
    let vault = Vault::open_in_memory().unwrap();
    vault.set_config("verify_writes", " Off ").unwrap();
    vault.set_config("exhaustive_slots", "YES").unwrap();

    let mut config = EngineConfig::default();
    config.apply_vault(&vault).unwrap();
    assert!(!config.verify_writes);
    assert!(config.exhaustive_slots);

    vault.set_config("verify_writes", "1").unwrap();
    vault.set_config("exhaustive_slots", "0").unwrap();
    config.apply_vault(&vault).unwrap();
    assert!(config.verify_writes);
    assert!(!config.exhaustive_slots);
}

#[test]
fn test_config_dictionary_prepends_key_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# site\n1337C0FFEE42").unwrap();

    let config = EngineConfig {
        dictionary_path: Some(file.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let dict = config.dictionary().unwrap();
    assert_eq!(dict.keys()[0], KEY_Z);
    assert_eq!(dict.keys()[1], DEFAULT_KEY);
}

#[test]
fn test_config_empty_dictionary_setting_clears_path() {
    let vault = Vault::open_in_memory().unwrap();
    vault.set_config("dictionary", "  ").unwrap();
    let mut config = EngineConfig {
        dictionary_path: Some("/tmp/keys.txt".into()),
        ..EngineConfig::default()
    };
    config.apply_vault(&vault).unwrap();
    assert!(config.dictionary_path.is_none());
    assert_eq!(config.dictionary().unwrap(), KeyDictionary::builtin());
}

#[test]
fn test_default_db_path_file_name() {
    assert!(default_db_path().ends_with("cardsmith.db"));
}
