// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod dump;
mod import;
mod info;
mod maint;

use std::path::PathBuf;

use anyhow::{Context, Result};
use catalog::config::{ENV_LOCK_DIR, ENV_MUSIC_PATH};
use catalog::{CatalogConfig, BACKUP_DEPTH};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Music catalog maintenance tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields, record counts and a CRC32 of a catalog file
    DbInfo {
        /// Catalog file (defaults to $CATALOG_PATH)
        path: Option<PathBuf>,
    },
    /// Print every live record as one JSON object per line
    DbDump {
        /// Catalog file (defaults to $CATALOG_PATH)
        path: Option<PathBuf>,
    },
    /// Scan a music folder and add files the catalog does not know yet
    DbImport {
        /// Directory containing music files (Artist/Album/track structure).
        /// Defaults to $MUSIC_PATH, then the catalog's directory.
        #[arg(long)]
        music_dir: Option<PathBuf>,
        /// Do not stamp LASTUPDATED on the new records
        #[arg(long)]
        keep_timestamps: bool,
        /// Catalog file (defaults to $CATALOG_PATH)
        path: Option<PathBuf>,
    },
    /// Rotate .bak.N copies of a catalog file
    DbBackup {
        /// Number of generations to keep
        #[arg(long, default_value_t = BACKUP_DEPTH)]
        count: u32,
        /// Catalog file (defaults to $CATALOG_PATH)
        path: Option<PathBuf>,
    },
    /// Rewrite live records densely into a new catalog file
    DbCompact {
        /// Source catalog file
        src: PathBuf,
        /// Destination file; must not exist or be empty
        dest: PathBuf,
    },
}

/// Explicit path wins; the music and lock directories still come from the
/// environment when set.
fn config_for(path: Option<PathBuf>) -> Result<CatalogConfig> {
    let Some(path) = path else {
        return CatalogConfig::from_env()
            .context("no catalog path given and CATALOG_PATH is not set");
    };
    let mut config = CatalogConfig::new(path);
    if let Ok(music_dir) = std::env::var(ENV_MUSIC_PATH) {
        config = config.with_music_dir(music_dir);
    }
    if let Ok(lock_dir) = std::env::var(ENV_LOCK_DIR) {
        config = config.with_lock_dir(lock_dir);
    }
    Ok(config)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::DbInfo { path } => info::run(config_for(path)?),
        Commands::DbDump { path } => dump::run(config_for(path)?),
        Commands::DbImport {
            music_dir,
            keep_timestamps,
            path,
        } => {
            let mut config = config_for(path)?;
            if let Some(music_dir) = music_dir {
                config = config.with_music_dir(music_dir);
            }
            import::run(config, keep_timestamps)
        }
        Commands::DbBackup { count, path } => maint::backup(config_for(path)?, count),
        Commands::DbCompact { src, dest } => maint::compact(config_for(Some(src))?, &dest),
    }
}
