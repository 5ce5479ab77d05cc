// cardsmith-core/src/bin/card_probe.rs

use anyhow::{Context, Result};
use cardsmith_core::config::{EngineConfig, default_db_path};
use cardsmith_core::{CardEngine, CardEvent, ProgressStream, Vault};
use cardsmith_io::{CardHandle, CardType, MifareKey, SimulatedCard};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_env("CARDSMITH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    eprintln!("[card_probe] starting…");

    // `--persist` writes to the real vault; otherwise nothing leaves memory.
    let persist = std::env::args().any(|a| a == "--persist");
    let vault = if persist {
        let path = default_db_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        eprintln!("[card_probe] vault at {}", path.display());
        Vault::open(&path).context("Vault::open failed")?
    } else {
        Vault::open_in_memory().context("Vault::open_in_memory failed")?
    };

    let mut config = EngineConfig::from_env();
    config
        .apply_vault(&vault)
        .context("reading vault config failed")?;
    let dictionary = config.dictionary().context("loading key dictionary failed")?;
    let engine = CardEngine::new(Arc::new(vault), dictionary, config);

    // A 1K card: sector 1 uses a transport key, sector 2 a key nobody knows.
    let card = SimulatedCard::new(CardType::Classic1K)
        .with_uid(&[0x04, 0xA2, 0x19, 0x7C])
        .with_sector_keys(
            1,
            MifareKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]),
            MifareKey::new([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]),
        )
        .with_sector_keys(
            2,
            MifareKey::new([0x13, 0x37, 0xC0, 0xFF, 0xEE, 0x42]),
            MifareKey::new([0x13, 0x37, 0xC0, 0xFF, 0xEE, 0x43]),
        )
        .with_block(4, *b"CARDSMITH PROBE!");
    eprintln!(
        "[card_probe] simulated {} uid={}",
        card.card_type(),
        hex::encode_upper(card.uid())
    );

    let (stream, task) = engine.spawn(card, cardsmith_core::Operation::Read);
    print_events(stream).await;
    let (card, result) = task.await.context("read task panicked")?;
    result.context("read failed")?;

    let (stream, task) = engine.spawn(card, cardsmith_core::Operation::Crack);
    print_events(stream).await;
    let (card, result) = task.await.context("crack task panicked")?;
    result.context("crack failed")?;

    let stats = card.stats();
    eprintln!(
        "[card_probe] done: {} connects, {} closes, {} auth attempts, {} reads",
        stats.connects, stats.closes, stats.auth_attempts, stats.reads
    );

    let summary = engine.recorder().stats().context("vault stats failed")?;
    eprintln!(
        "[card_probe] vault: {} sessions, {} found keys, {} history entries",
        summary.total_sessions, summary.total_found_keys, summary.history_entries
    );
    Ok(())
}

async fn print_events(mut stream: ProgressStream) {
    while let Some(event) = stream.next().await {
        match event {
            CardEvent::Progress(p) => {
                let (current, total) = p.counters();
                println!("[{:>2}/{:>2}] {}", current, total, p.message());
            }
            CardEvent::Blocks(blocks) => {
                let cracked = blocks.iter().filter(|b| b.cracked).count();
                println!("        {} blocks so far, {} readable", blocks.len(), cracked);
            }
            CardEvent::Crack(c) => match c.key_pair.and_then(|p| p.best()) {
                Some(k) => println!(
                    "        sector {:>2}: key {} = {} ({} attempts)",
                    c.sector,
                    k.slot,
                    k.key.redacted(),
                    c.attempts
                ),
                None => println!("        sector {:>2}: locked ({} attempts)", c.sector, c.attempts),
            },
            CardEvent::Completed(s) => println!(
                "== {} complete: {}/{} sectors, {}",
                s.operation, s.cracked_sectors, s.sector_count, s.notes
            ),
            CardEvent::Failed { operation, message } => {
                println!("== {} failed: {}", operation, message)
            }
            other => println!("        {:?}", other),
        }
    }
}
