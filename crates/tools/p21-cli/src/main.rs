//! Command-line access to P21 local storage
//!
//! This tool allows:
//! - Inspecting the live and demo slots
//! - Seeding a slot from snapshot JSON
//! - Exporting and importing `.p21` backups
//! - Restoring media from a backup

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use p21_core::{Slot, Snapshot};
use p21_storage_sqlite::{Error, ImportedArchive, Storage, StorageConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "p21-cli")]
#[command(about = "P21 storage and backup tool", long_about = None)]
struct Cli {
    /// Data directory (defaults to P21_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a slot
    Inspect {
        /// Slot to read
        #[arg(short, long, default_value = "live")]
        slot: Slot,

        /// Print the stored record (journal content stays encrypted)
        #[arg(long)]
        raw: bool,
    },

    /// Replace a slot with a snapshot read from a JSON file
    Seed {
        /// Snapshot JSON file
        file: PathBuf,

        /// Slot to write
        #[arg(short, long, default_value = "live")]
        slot: Slot,
    },

    /// Export a slot as an encrypted backup
    Export {
        /// Output file or directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Slot to export
        #[arg(short, long, default_value = "live")]
        slot: Slot,

        /// Archive password
        #[arg(long, env = "P21_ARCHIVE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Open a backup and show what it contains
    Import {
        /// Backup file
        file: PathBuf,

        /// Archive password
        #[arg(long, env = "P21_ARCHIVE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Write the backup into local storage
        #[arg(long)]
        commit: bool,

        /// Slot to write when committing
        #[arg(short, long, default_value = "live")]
        slot: Slot,
    },

    /// Restore only the media files of a backup
    RestoreMedia {
        /// Backup file
        file: PathBuf,

        /// Archive password
        #[arg(long, env = "P21_ARCHIVE_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.data_dir {
        Some(dir) => StorageConfig::load_in(dir),
        None => StorageConfig::load(),
    }
    .context("failed to load storage config")?;
    let storage = Arc::new(Storage::open(config).map_err(user_facing)?);

    match cli.command {
        Commands::Inspect { slot, raw } => run_inspect(&storage, slot, raw)?,
        Commands::Seed { file, slot } => run_seed(&storage, &file, slot).await?,
        Commands::Export {
            out,
            slot,
            password,
        } => run_export(storage, &out, slot, password).await?,
        Commands::Import {
            file,
            password,
            commit,
            slot,
        } => run_import(storage, &file, password, commit.then_some(slot)).await?,
        Commands::RestoreMedia { file, password } => {
            run_restore_media(storage, &file, password).await?
        }
    }

    Ok(())
}

fn user_facing(err: Error) -> anyhow::Error {
    warn!("{} error: {}", err.category(), err);
    anyhow::anyhow!(err.user_message())
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn run_inspect(storage: &Storage, slot: Slot, raw: bool) -> anyhow::Result<()> {
    if raw {
        match storage.state_store().load_raw(slot).map_err(user_facing)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("{} slot is empty", slot),
        }
        return Ok(());
    }

    let loaded = match storage.state_store().load_detailed(slot).map_err(user_facing)? {
        Some(loaded) => loaded,
        None => {
            println!("{} slot is empty", slot);
            return Ok(());
        }
    };
    let snapshot = &loaded.snapshot;
    let updated_at = storage
        .state_store()
        .updated_at(slot)
        .map_err(user_facing)?
        .unwrap_or_default();

    println!("slot:            {}", slot);
    println!("updated:         {}", updated_at);
    println!("demo mode:       {}", snapshot.settings.demo_mode);
    println!("habits:          {}", snapshot.habits.len());
    println!("logs:            {}", snapshot.logs.len());
    println!("journal entries: {}", snapshot.journal.len());
    println!("anchors:         {}", snapshot.stop_crane.len());
    println!("media refs:      {}", p21_core::media_references(snapshot).len());
    for failure in &loaded.failures {
        println!("unreadable entry {}: {}", failure.id, failure.reason);
    }
    Ok(())
}

async fn run_seed(storage: &Storage, file: &Path, slot: Slot) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let snapshot = Snapshot::from_json(&bytes)
        .with_context(|| format!("{} is not a snapshot", file.display()))?;

    storage
        .scheduler()
        .save_now(slot, snapshot)
        .await
        .map_err(user_facing)?;
    info!("Seeded {} slot from {}", slot, file.display());
    Ok(())
}

async fn run_export(
    storage: Arc<Storage>,
    out: &Path,
    slot: Slot,
    password: String,
) -> anyhow::Result<()> {
    if password.is_empty() {
        bail!("an archive password is required");
    }

    let pb = spinner("Encrypting backup");
    let exported = tokio::task::spawn_blocking(move || storage.export_archive(slot, &password))
        .await?
        .map_err(user_facing);
    pb.finish_and_clear();
    let exported = exported?;

    let path = if out.is_dir() {
        out.join(&exported.file_name)
    } else {
        out.to_path_buf()
    };
    std::fs::write(&path, &exported.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!(
        "Wrote {} ({} bytes, {} media files)",
        path.display(),
        exported.bytes.len(),
        exported.included_media.len()
    );
    for skipped in &exported.skipped_media {
        warn!("Media not included: {} ({})", skipped.name, skipped.reason);
    }
    Ok(())
}

async fn open_archive(
    storage: Arc<Storage>,
    file: &Path,
    password: String,
) -> anyhow::Result<ImportedArchive> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let pb = spinner("Decrypting backup");
    let imported = tokio::task::spawn_blocking(move || storage.import_archive(&bytes, &password))
        .await?
        .map_err(user_facing);
    pb.finish_and_clear();
    imported
}

async fn run_import(
    storage: Arc<Storage>,
    file: &Path,
    password: String,
    commit_to: Option<Slot>,
) -> anyhow::Result<()> {
    let imported = open_archive(storage.clone(), file, password).await?;
    let data = &imported.data;

    println!("version:         {}", imported.version);
    println!(
        "exported:        {}",
        imported.exported_at.as_deref().unwrap_or("unknown")
    );
    println!("habits:          {}", data.habits.len());
    println!("logs:            {}", data.logs.len());
    println!("journal entries: {}", data.journal.len());
    println!("anchors:         {}", data.stop_crane.len());
    println!("media files:     {}", imported.media.len());

    let Some(slot) = commit_to else {
        info!("Nothing written; pass --commit to restore this backup");
        return Ok(());
    };

    let report = storage
        .commit_import(slot, &imported)
        .map_err(user_facing)?;
    info!(
        "Restored backup into {} slot ({} media files, {} failed)",
        slot,
        report.restored.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        warn!("Media not restored: {} ({})", failure.name, failure.reason);
    }
    Ok(())
}

async fn run_restore_media(
    storage: Arc<Storage>,
    file: &Path,
    password: String,
) -> anyhow::Result<()> {
    let imported = open_archive(storage.clone(), file, password).await?;
    let report = storage.restore_media(&imported.media).map_err(user_facing)?;

    info!(
        "Restored {} media files into {}",
        report.restored.len(),
        storage.config().media_path().display()
    );
    for failure in &report.failed {
        warn!("Media not restored: {} ({})", failure.name, failure.reason);
    }
    Ok(())
}
