//! Engine configuration.
//!
//! Loaded from `CARDSMITH_*` environment variables, then optionally
//! overridden by settings persisted in the vault's `config` table.

use anyhow::Result;
use directories::ProjectDirs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::attack::AttackMethod;
use crate::keys::KeyDictionary;
use crate::stream::DEFAULT_CAPACITY;
use crate::vault::Vault;

pub const DB_FILE_NAME: &str = "cardsmith.db";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Bound of every progress channel.
    pub channel_capacity: usize,
    /// Read back every written block and compare.
    pub verify_writes: bool,
    /// Keep searching the other slot after the first key is found.
    pub exhaustive_slots: bool,
    pub attack_method: AttackMethod,
    /// Extra keys tried before the built-in dictionary.
    pub dictionary_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CAPACITY,
            verify_writes: true,
            exhaustive_slots: false,
            attack_method: AttackMethod::Dictionary,
            dictionary_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply(|key| std::env::var(format!("CARDSMITH_{}", key.to_uppercase())).ok());
        config
    }

    /// Overlay settings stored in the vault (`channel_capacity`, ...).
    pub fn apply_vault(&mut self, vault: &Vault) -> Result<()> {
        let mut failure = None;
        self.apply(|key| match vault.get_config(key) {
            Ok(value) => value,
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
                None
            }
        });
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn apply<F: FnMut(&str) -> Option<String>>(&mut self, mut lookup: F) {
        if let Some(v) = parse_setting(&mut lookup, "channel_capacity") {
            self.channel_capacity = v;
        }
        if let Some(v) = parse_flag(&mut lookup, "verify_writes") {
            self.verify_writes = v;
        }
        if let Some(v) = parse_flag(&mut lookup, "exhaustive_slots") {
            self.exhaustive_slots = v;
        }
        if let Some(v) = parse_setting(&mut lookup, "attack_method") {
            self.attack_method = v;
        }
        if let Some(v) = lookup("dictionary") {
            self.dictionary_path = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
    }

    /// Built-in keys, preceded by the user's key file when one is configured.
    pub fn dictionary(&self) -> Result<KeyDictionary> {
        let builtin = KeyDictionary::builtin();
        match &self.dictionary_path {
            Some(path) => Ok(builtin.with_extra(&KeyDictionary::load(path)?)),
            None => Ok(builtin),
        }
    }
}

fn parse_setting<T: FromStr, F: FnMut(&str) -> Option<String>>(
    lookup: &mut F,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

fn parse_flag<F: FnMut(&str) -> Option<String>>(lookup: &mut F, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

/// `cardsmith.db` in the platform data directory, or the working directory.
pub fn default_db_path() -> PathBuf {
    ProjectDirs::from("com", "DrTomLLC", "cardsmith")
        .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
}
