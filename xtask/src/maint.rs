//! xtask db-backup / db-compact: catalog file maintenance.

use std::path::Path;

use anyhow::{Context, Result};
use catalog::{AnySource, Catalog, CatalogConfig};
use colored::Colorize;

/// Rotate `.bak.N` copies, keeping `count` generations.
pub fn backup(config: CatalogConfig, count: u32) -> Result<()> {
    let mut cat = Catalog::builder(config)
        .source(AnySource)
        .open()
        .context("Failed to load catalog")?;
    match cat.backup(count)? {
        Some(path) => println!("{}", format!("  ✓ Backed up to {}", path.display()).green()),
        None => println!("{}", "  Nothing to back up".yellow()),
    }
    cat.close()?;
    Ok(())
}

/// Rewrite the live records of `config.path` densely into `dest`.
///
/// Audio existence is checked, so records whose files are gone are dropped
/// from the compacted copy.
pub fn compact(config: CatalogConfig, dest: &Path) -> Result<()> {
    let src = config.path.clone();
    let mut cat = Catalog::open(config).context("Failed to load catalog")?;
    let slots_before = cat.count();
    let written = cat
        .rebuild_into(dest)
        .with_context(|| format!("Failed to rebuild into {}", dest.display()))?;
    cat.close()?;
    println!(
        "{}",
        format!(
            "  ✓ {} → {}: {written} records ({slots_before} loaded)",
            src.display(),
            dest.display()
        )
        .green()
    );
    Ok(())
}
