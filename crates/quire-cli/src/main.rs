//! quire command-line client.
//!
//! One-shot commands over the local mirror and the configured remote.
//!
//! Usage:
//!   quire status
//!   quire sync
//!   quire notes --folder inbox
//!   quire notes --trashed --offline
//!   quire folders
//!   quire outbox
//!   quire history note <id>
//!
//! Logs go to stderr; set `RUST_LOG=quire_sync=debug` for flush detail.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use quire_store::{Mirror, SqliteStore};
use quire_sync::{HttpRemote, NoteFilter, SyncConfig, SyncEngine};
use quire_types::{EntityKind, NoteRecord, Timestamp};

/// Offline-first notes sync.
#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(about = "Inspect and sync the local quire mirror")]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Mirror database, overriding the config
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay the outbox against the remote
    Sync,
    /// List notes
    Notes {
        /// Only notes in this folder
        #[arg(long)]
        folder: Option<String>,
        /// List the trash instead
        #[arg(long)]
        trashed: bool,
        /// Print the mirror without waiting for a refresh
        #[arg(long)]
        offline: bool,
    },
    /// List folders
    Folders {
        #[arg(long)]
        offline: bool,
    },
    /// Show queued mutations
    Outbox,
    /// Show history snapshots for a note or folder
    History {
        /// note | folder
        kind: String,
        id: String,
    },
    /// Summarize mirror and outbox state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let engine = open_engine(config)?;

    let result = run(&engine, args.command).await;
    engine.shutdown().await;
    result
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let path = args.config.clone().or_else(SyncConfig::default_path);
    let config = match path {
        Some(path) => SyncConfig::load_or_default(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SyncConfig::default(),
    };
    Ok(match &args.store {
        Some(store) => config.with_store_path(store.clone()),
        None => config,
    })
}

fn open_engine(config: SyncConfig) -> Result<SyncEngine> {
    let Some(path) = config.store.resolved_path() else {
        bail!("no mirror path configured and no platform data directory");
    };
    let store = SqliteStore::open(&path)
        .with_context(|| format!("opening mirror {}", path.display()))?;
    let remote = HttpRemote::new(
        config.remote.base_url.clone(),
        config.remote.resolve_token(),
        config.remote.timeout(),
    )
    .context("building HTTP client")?;
    tracing::debug!(mirror = %path.display(), remote = %remote.base_url(), "engine ready");
    Ok(SyncEngine::new(Mirror::new(store), Arc::new(remote), config))
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
    match command {
        Command::Sync => cmd_sync(engine).await,
        Command::Notes {
            folder,
            trashed,
            offline,
        } => {
            let mut filter = match folder {
                Some(folder) => NoteFilter::in_folder(folder),
                None => NoteFilter::all(),
            };
            filter.trashed = trashed;
            cmd_notes(engine, filter, offline).await
        }
        Command::Folders { offline } => cmd_folders(engine, offline).await,
        Command::Outbox => cmd_outbox(engine).await,
        Command::History { kind, id } => cmd_history(engine, &kind, &id).await,
        Command::Status => cmd_status(engine).await,
    }
}

async fn cmd_sync(engine: &SyncEngine) -> Result<()> {
    let report = engine.flush().await?;

    println!(
        "replayed {}, deferred {}, failed {}, dropped {}, conflicts {}",
        report.replayed, report.deferred, report.failed, report.dropped, report.conflicts
    );
    for (temp, server) in &report.reconciled {
        println!("folder {temp} -> {server}");
    }
    let remaining = engine.pending().await?.len();
    if remaining > 0 {
        println!("{remaining} entries still queued");
    }
    Ok(())
}

async fn cmd_notes(engine: &SyncEngine, filter: NoteFilter, offline: bool) -> Result<()> {
    let cached = engine.notes(filter.clone()).await?;
    let notes = if offline {
        cached.into_value()
    } else {
        cached.refresh.wait().await;
        engine.notes(filter).await?.into_value()
    };
    for note in &notes {
        print_note(note);
    }
    if notes.is_empty() {
        println!("(no notes)");
    }
    Ok(())
}

fn print_note(note: &NoteRecord) {
    let state = match (note.dirty, note.is_trashed()) {
        (_, true) => "trashed",
        (true, false) => "dirty",
        (false, false) => "synced",
    };
    println!(
        "{}  {:<12} {:>6} words  {:>7}  {} bytes  {}",
        note.id.short(),
        note.folder_id.short(),
        note.word_count,
        state,
        note.content.ciphertext.len(),
        stamp(note.server_updated_at),
    );
}

async fn cmd_folders(engine: &SyncEngine, offline: bool) -> Result<()> {
    let cached = engine.folders().await?;
    let folders = if offline {
        cached.into_value()
    } else {
        cached.refresh.wait().await;
        engine.folders().await?.into_value()
    };
    for folder in folders {
        let marker = if folder.is_default { "*" } else { " " };
        let parent = folder.parent_id.as_ref().map(|p| p.short()).unwrap_or("-");
        let goal = folder
            .goal_word_count
            .map(|g| g.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{marker} {:<12} parent {:<12} order {:>3}  goal {goal}",
            folder.id.as_str(),
            parent,
            folder.order
        );
    }
    Ok(())
}

async fn cmd_outbox(engine: &SyncEngine) -> Result<()> {
    let pending = engine.pending().await?;
    if pending.is_empty() {
        println!("outbox empty");
        return Ok(());
    }
    for entry in pending {
        println!(
            "#{:<5} {:<16} {:<24} base {}  queued {}",
            entry.id,
            entry.mutation.kind().as_str(),
            entry.mutation.target().to_string(),
            stamp(entry.base_server_updated_at),
            entry.created_at
        );
    }
    Ok(())
}

async fn cmd_history(engine: &SyncEngine, kind: &str, id: &str) -> Result<()> {
    let Some(kind) = EntityKind::from_str(kind) else {
        bail!("unknown entity kind {kind:?}; expected note or folder");
    };
    let snapshots = engine.history(kind, id).await?;
    if snapshots.is_empty() {
        println!("no history for {kind} {id}");
    }
    for snapshot in snapshots {
        println!(
            "#{:<5} {:<8} {}  {} bytes",
            snapshot.id,
            snapshot.reason.as_str(),
            snapshot.created_at,
            snapshot.snapshot.ciphertext.len()
        );
    }
    Ok(())
}

async fn cmd_status(engine: &SyncEngine) -> Result<()> {
    let config = engine.config();
    let notes: Vec<NoteRecord> = engine.mirror().all().await?;
    let dirty = notes.iter().filter(|n| n.dirty).count();
    let pending = engine.pending().await?;
    let default = engine.default_folder().await?;

    println!("remote   {}", config.remote.base_url);
    if let Some(path) = config.store.resolved_path() {
        println!("mirror   {}", path.display());
    }
    println!("notes    {} ({dirty} dirty)", notes.len());
    println!("outbox   {}", pending.len());
    match default {
        Some(folder) => println!("default  {}", folder.id),
        None => println!("default  (not mirrored yet; run `quire folders`)"),
    }
    Ok(())
}

fn stamp(ts: Option<Timestamp>) -> String {
    ts.map(|t| t.to_string()).unwrap_or_else(|| "-".into())
}
