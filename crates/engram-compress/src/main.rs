//! Compression backfill worker
//!
//! Standalone batch tool that fills in missing pyramid levels for stored
//! episodes. Opens the store read-write, enumerates every episode, computes
//! the missing level set (or all levels under `--wipe`), and fans the work
//! out to N parallel workers over a bounded channel. Resumable: levels that
//! already exist are skipped, so an interrupted run just continues next
//! time.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{Mutex, mpsc};
use tracing_subscriber::EnvFilter;

use engram_core::llm::HttpGateway;
use engram_core::pyramid::LEVELS;
use engram_core::{Compressor, CompressorOptions, LanguageModel, Store};

#[derive(Parser)]
#[command(name = "engram-compress")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Backfill missing compression-pyramid levels for stored episodes")]
struct Args {
    /// State directory containing memory.db
    #[arg(long)]
    state: PathBuf,

    /// Number of parallel compression workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Report what would be generated without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Regenerate every level, not only the missing ones
    #[arg(long)]
    wipe: bool,

    /// LLM gateway base URL
    #[arg(long, env = "ENGRAM_GATEWAY_URL", default_value = "http://127.0.0.1:8601")]
    gateway: String,

    /// Embedding dimension of the gateway model (fixed per database)
    #[arg(long, default_value_t = 768)]
    embedding_dim: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let store = Arc::new(
        Store::open(Some(args.state.clone()), args.embedding_dim)
            .with_context(|| format!("opening store in {}", args.state.display()))?,
    );

    let model: Arc<dyn LanguageModel> =
        Arc::new(HttpGateway::new(args.gateway.clone(), args.embedding_dim));
    let compressor = Arc::new(Compressor::new(
        Arc::clone(&model),
        CompressorOptions::default(),
    ));

    let episode_ids = store.all_episode_ids().context("enumerating episodes")?;
    let total = episode_ids.len();
    tracing::info!(total, workers = args.workers, "starting backfill");

    let (tx, rx) = mpsc::channel::<String>(args.workers * 2);
    let rx = Arc::new(Mutex::new(rx));
    let done = Arc::new(AtomicUsize::new(0));
    let written = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let mut handles = Vec::with_capacity(args.workers);
    for _ in 0..args.workers {
        let rx = Arc::clone(&rx);
        let store = Arc::clone(&store);
        let compressor = Arc::clone(&compressor);
        let done = Arc::clone(&done);
        let written = Arc::clone(&written);
        let dry_run = args.dry_run;
        let wipe = args.wipe;

        handles.push(tokio::spawn(async move {
            loop {
                let episode_id = {
                    let mut rx = rx.lock().await;
                    match rx.recv().await {
                        Some(id) => id,
                        None => break,
                    }
                };

                match process_episode(&store, &compressor, &episode_id, dry_run, wipe).await {
                    Ok(levels) => {
                        written.fetch_add(levels, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!("episode {}: {}", episode_id, e),
                }

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % 10 == 0 || finished == total {
                    let elapsed = started.elapsed().as_secs_f64().max(0.001);
                    let rate = finished as f64 / elapsed;
                    let eta = ((total - finished) as f64 / rate.max(0.001)).round() as u64;
                    eprintln!("Progress: {}/{} ({:.1}/s, ~{}s)", finished, total, rate, eta);
                }
            }
        }));
    }

    // Producer: write everything, then close the channel
    for episode_id in episode_ids {
        if tx.send(episode_id).await.is_err() {
            break;
        }
    }
    drop(tx);

    for handle in handles {
        handle.await.context("worker task panicked")?;
    }

    tracing::info!(
        episodes = total,
        levels_written = written.load(Ordering::Relaxed),
        elapsed_s = started.elapsed().as_secs(),
        dry_run = args.dry_run,
        "backfill complete"
    );
    Ok(())
}

/// Fill the missing levels for one episode. Returns how many levels were
/// written (or would be, under `--dry-run`).
async fn process_episode(
    store: &Store,
    compressor: &Compressor,
    episode_id: &str,
    dry_run: bool,
    wipe: bool,
) -> anyhow::Result<usize> {
    let Some(episode) = store.get_episode(episode_id)? else {
        return Ok(0);
    };

    let missing: Vec<u8> = if wipe {
        LEVELS.to_vec()
    } else {
        let existing = store.episode_summary_levels(episode_id)?;
        LEVELS
            .iter()
            .copied()
            .filter(|l| !existing.contains(l))
            .collect()
    };
    if missing.is_empty() {
        return Ok(0);
    }

    if dry_run {
        tracing::debug!("would generate L{:?} for {}", missing, episode_id);
        return Ok(missing.len());
    }

    if wipe {
        store.delete_episode_summaries(episode_id)?;
    }
    let written = compressor.episode_pyramid(store, &episode, &missing).await?;
    Ok(written)
}
